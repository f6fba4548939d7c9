//! Pipeline state machine.
//!
//! Stages run NEW -> QUALIFIED -> PROPOSAL_SENT -> NEGOTIATION -> CLOSED_WON.
//! CLOSED_LOST sits outside that chain and, like CLOSED_WON, has no forward
//! transition. A direct set may jump anywhere, including backwards.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{
    EntityRepository, Lead, LeadRepository, LeadStatus, Quote, QuoteStatus, checked_sum,
};
use crate::error::RepositoryError;

impl LeadStatus {
    /// Next stage in the forward chain. `None` for the terminal stages.
    pub fn next(self) -> Option<LeadStatus> {
        match self {
            Self::New => Some(Self::Qualified),
            Self::Qualified => Some(Self::ProposalSent),
            Self::ProposalSent => Some(Self::Negotiation),
            Self::Negotiation => Some(Self::ClosedWon),
            Self::ClosedWon | Self::ClosedLost => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// One step forward; a no-op on a terminal stage.
    Advance,
    /// Any stage, unconstrained.
    DirectSet(LeadStatus),
}

impl Transition {
    pub fn apply(self, current: LeadStatus) -> LeadStatus {
        match self {
            Self::Advance => current.next().unwrap_or(current),
            Self::DirectSet(target) => target,
        }
    }
}

/// Applies transitions through the lead repository.
#[derive(Clone)]
pub struct Pipeline {
    leads: Arc<dyn LeadRepository>,
}

impl Pipeline {
    pub fn new(leads: Arc<dyn LeadRepository>) -> Self {
        Self { leads }
    }

    pub async fn transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<Lead, RepositoryError> {
        match transition {
            Transition::Advance => self.advance(id).await,
            Transition::DirectSet(status) => self.move_to(id, status).await,
        }
    }

    /// Move one stage forward. A lead already on a terminal stage is
    /// returned as stored, without a write.
    pub async fn advance(&self, id: &str) -> Result<Lead, RepositoryError> {
        let lead = self.leads.get_one(id).await?;
        let target = Transition::Advance.apply(lead.status);
        if target == lead.status {
            tracing::debug!(lead_id = %id, status = %lead.status, "Lead already at terminal stage");
            return Ok(lead);
        }
        let updated = self.leads.update_status(id, target).await?;
        tracing::info!(lead_id = %id, from = %lead.status, to = %target, "Lead advanced");
        Ok(updated)
    }

    pub async fn move_to(&self, id: &str, status: LeadStatus) -> Result<Lead, RepositoryError> {
        let updated = self.leads.update_status(id, status).await?;
        tracing::info!(lead_id = %id, to = %status, "Lead moved");
        Ok(updated)
    }
}

/// One board column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageColumn {
    pub status: LeadStatus,
    pub label: &'static str,
    pub count: usize,
    pub total_value: Decimal,
    pub lead_ids: Vec<String>,
}

/// Group leads into one column per stage, in pipeline order. Lost leads
/// get the last column.
pub fn board(leads: &[Lead]) -> Result<Vec<StageColumn>, RepositoryError> {
    LeadStatus::ALL
        .into_iter()
        .map(|status| {
            let in_stage: Vec<&Lead> = leads.iter().filter(|l| l.status == status).collect();
            Ok(StageColumn {
                status,
                label: status.label(),
                count: in_stage.len(),
                total_value: checked_sum(in_stage.iter().map(|l| l.value))?,
                lead_ids: in_stage.iter().map(|l| l.id.clone()).collect(),
            })
        })
        .collect()
}

/// Value still in play: every lead not on a terminal stage.
pub fn open_pipeline_value(leads: &[Lead]) -> Result<Decimal, RepositoryError> {
    checked_sum(
        leads
            .iter()
            .filter(|l| !l.status.is_terminal())
            .map(|l| l.value),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummary {
    pub count: usize,
    pub total_amount: Decimal,
    pub accepted_count: usize,
    pub accepted_amount: Decimal,
}

pub fn quote_summary(quotes: &[Quote]) -> Result<QuoteSummary, RepositoryError> {
    let accepted: Vec<&Quote> = quotes
        .iter()
        .filter(|q| q.status == QuoteStatus::Accepted)
        .collect();
    Ok(QuoteSummary {
        count: quotes.len(),
        total_amount: checked_sum(quotes.iter().map(|q| q.total_amount))?,
        accepted_count: accepted.len(),
        accepted_amount: checked_sum(accepted.iter().map(|q| q.total_amount))?,
    })
}
