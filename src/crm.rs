//! Caller-facing facade over the repositories, the pipeline and the AI
//! orchestrator.

use chrono::Utc;

use crate::ai::{AiOrchestrator, LeadAnalysis, orchestrator_from_config};
use crate::config::Config;
use crate::db::{
    CreateQuoteParams, EntityRepository, Lead, Quote, QuoteItem, QuoteRepository, QuoteStatus,
    Repositories, Task, UpdateLeadParams, connect_from_config, sort_tasks_for_display,
};
use crate::error::RepositoryError;
use crate::pipeline::{self, Pipeline, QuoteSummary, StageColumn};

#[derive(Clone)]
pub struct Crm {
    pub repos: Repositories,
    pub pipeline: Pipeline,
    pub ai: AiOrchestrator,
}

impl Crm {
    pub fn new(repos: Repositories, ai: AiOrchestrator) -> Self {
        let pipeline = Pipeline::new(repos.leads.clone());
        Self {
            repos,
            pipeline,
            ai,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, RepositoryError> {
        let repos = connect_from_config(config)?;
        let ai = orchestrator_from_config(config, repos.mode);
        Ok(Self::new(repos, ai))
    }

    /// The lead with its `quotes` filled from the quotes repository.
    pub async fn lead_with_quotes(&self, id: &str) -> Result<Lead, RepositoryError> {
        let mut lead = self.repos.leads.get_one(id).await?;
        lead.quotes = self.repos.quotes.list_for_lead(id).await?;
        Ok(lead)
    }

    /// Persist suggested items as a draft quote dated today. Totals are
    /// recomputed by the repository.
    pub async fn save_quote_draft(
        &self,
        lead_id: &str,
        items: Vec<QuoteItem>,
    ) -> Result<Quote, RepositoryError> {
        let mut input = CreateQuoteParams::new(lead_id, items);
        input.status = QuoteStatus::Draft;
        input.date = Some(Utc::now().date_naive());
        let quote = self.repos.quotes.create(input).await?;
        tracing::info!(lead_id = %lead_id, quote_id = %quote.id, total = %quote.total_amount, "Saved quote draft");
        Ok(quote)
    }

    /// Store an analysis score on the lead.
    pub async fn record_score(
        &self,
        lead_id: &str,
        analysis: &LeadAnalysis,
    ) -> Result<Lead, RepositoryError> {
        let patch = UpdateLeadParams {
            score: Some(analysis.score),
            ..Default::default()
        };
        self.repos.leads.update(lead_id, patch).await
    }

    pub async fn tasks_for_display(&self) -> Result<Vec<Task>, RepositoryError> {
        let mut tasks = self.repos.tasks.get_all().await?;
        sort_tasks_for_display(&mut tasks);
        Ok(tasks)
    }

    pub async fn board(&self) -> Result<Vec<StageColumn>, RepositoryError> {
        let leads = self.repos.leads.get_all().await?;
        pipeline::board(&leads)
    }

    pub async fn quote_summary(&self) -> Result<QuoteSummary, RepositoryError> {
        let quotes = self.repos.quotes.get_all().await?;
        pipeline::quote_summary(&quotes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::local::LocalStore;

    fn crm() -> Crm {
        Crm::new(
            Repositories::local(Arc::new(LocalStore::in_memory())),
            AiOrchestrator::disabled(),
        )
    }

    #[tokio::test]
    async fn lead_with_quotes_materializes_attachments() {
        let crm = crm();
        let lead = crm.lead_with_quotes("l-1").await.expect("lead");
        assert_eq!(lead.quotes.len(), 1);
        assert_eq!(lead.quotes[0].id, "Q-2023-102");

        let bare = crm.lead_with_quotes("l-2").await.expect("lead");
        assert!(bare.quotes.is_empty());
    }

    #[tokio::test]
    async fn saved_draft_is_priced_and_dated_today() {
        let crm = crm();
        let items = vec![
            QuoteItem {
                description: "SEO audit".to_string(),
                quantity: dec!(2),
                unit_price: dec!(1250),
                total: dec!(1),
            },
            QuoteItem {
                description: "Ads setup".to_string(),
                quantity: dec!(1),
                unit_price: dec!(800),
                total: dec!(0),
            },
        ];
        let quote = crm.save_quote_draft("l-2", items).await.expect("save");
        assert_eq!(quote.status, QuoteStatus::Draft);
        assert_eq!(quote.date, Utc::now().date_naive());
        assert_eq!(quote.items[0].total, dec!(2500));
        assert_eq!(quote.total_amount, dec!(3300));
        assert_eq!(crm.lead_with_quotes("l-2").await.expect("lead").quotes.len(), 1);
    }

    #[tokio::test]
    async fn fallback_score_can_be_recorded() {
        let crm = crm();
        let lead = crm.repos.leads.get_one("l-3").await.expect("lead");
        let analysis = crm.ai.score_lead(&lead).await;
        let updated = crm.record_score("l-3", &analysis).await.expect("record");
        assert_eq!(updated.score, Some(50));
    }

    #[tokio::test]
    async fn board_and_summary_follow_the_store() {
        let crm = crm();
        crm.pipeline.advance("l-2").await.expect("advance");
        let board = crm.board().await.expect("board");
        assert_eq!(board[0].count, 0);
        assert_eq!(board[1].count, 2);
        assert_eq!(crm.quote_summary().await.expect("summary").count, 3);
        let tasks = crm.tasks_for_display().await.expect("tasks");
        assert_eq!(tasks[0].id, "t-1");
    }
}
