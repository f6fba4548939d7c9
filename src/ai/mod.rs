//! AI orchestration.
//!
//! [`AiOrchestrator`] is the only surface callers use. Every operation
//! returns a value of the same shape whether or not the generative call
//! succeeded: any failure (no backend, transport error, bad status,
//! malformed or out-of-range answer, timeout) collapses into a fixed
//! fallback and a `warn!` line.

pub mod gemini;
pub mod http;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::config::mode::BackingMode;
use crate::db::{Lead, QuoteItem};
use crate::error::AiError;

pub use gemini::{DirectAiBackend, GeminiClient, GenerativeModel};
pub use http::HttpAiBackend;

pub const FALLBACK_SCORE: u8 = 50;
pub const FALLBACK_SUMMARY: &str = "analysis unavailable";
pub const FALLBACK_NEXT_ACTION: &str = "manual review";
pub const FALLBACK_DEAL_PROBABILITY: &str = "unknown";
pub const FALLBACK_EMAIL: &str = "draft unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AiAction {
    AnalyzeLead,
    GenerateEmail,
    GenerateQuote,
}

impl AiAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnalyzeLead => "analyze-lead",
            Self::GenerateEmail => "generate-email",
            Self::GenerateQuote => "generate-quote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadAnalysis {
    pub score: u8,
    pub summary: String,
    pub next_action: String,
    pub deal_probability: String,
}

impl LeadAnalysis {
    pub fn fallback() -> Self {
        Self {
            score: FALLBACK_SCORE,
            summary: FALLBACK_SUMMARY.to_string(),
            next_action: FALLBACK_NEXT_ACTION.to_string(),
            deal_probability: FALLBACK_DEAL_PROBABILITY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDraft {
    pub email_draft: String,
}

impl EmailDraft {
    pub fn fallback() -> Self {
        Self {
            email_draft: FALLBACK_EMAIL.to_string(),
        }
    }
}

/// Suggested line items. Not persisted and not repriced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteDraft {
    pub items: Vec<QuoteItem>,
}

impl QuoteDraft {
    pub fn fallback() -> Self {
        Self::default()
    }
}

/// The fallback for `action`, in internal field naming.
pub fn fallback_value(action: AiAction) -> Value {
    let value = match action {
        AiAction::AnalyzeLead => serde_json::to_value(LeadAnalysis::fallback()),
        AiAction::GenerateEmail => serde_json::to_value(EmailDraft::fallback()),
        AiAction::GenerateQuote => serde_json::to_value(QuoteDraft::fallback()),
    };
    value.unwrap_or(Value::Null)
}

/// Something that can answer an AI action for a lead.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn invoke(&self, action: AiAction, lead: &Lead) -> Result<Value, AiError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Probability {
    Text(String),
    Number(f64),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    score: f64,
    summary: String,
    next_action: String,
    deal_probability: Probability,
}

fn malformed(e: impl std::fmt::Display) -> AiError {
    AiError::Malformed(e.to_string())
}

pub fn parse_analysis(value: Value) -> Result<LeadAnalysis, AiError> {
    let raw: RawAnalysis = serde_json::from_value(value).map_err(malformed)?;
    if !raw.score.is_finite() || !(0.0..=100.0).contains(&raw.score) {
        return Err(AiError::Malformed(format!(
            "score {} outside 0..=100",
            raw.score
        )));
    }
    let deal_probability = match raw.deal_probability {
        Probability::Text(text) => text,
        Probability::Number(n) => format!("{}%", n.round()),
    };
    Ok(LeadAnalysis {
        score: raw.score.round() as u8,
        summary: raw.summary,
        next_action: raw.next_action,
        deal_probability,
    })
}

pub fn parse_email(value: Value) -> Result<EmailDraft, AiError> {
    let draft: EmailDraft = serde_json::from_value(value).map_err(malformed)?;
    if draft.email_draft.trim().is_empty() {
        return Err(AiError::Malformed("empty email draft".to_string()));
    }
    Ok(draft)
}

pub fn parse_quote(value: Value) -> Result<QuoteDraft, AiError> {
    serde_json::from_value(value).map_err(malformed)
}

#[derive(Clone, Default)]
pub struct AiOrchestrator {
    backend: Option<Arc<dyn AiBackend>>,
    timeout: Option<Duration>,
}

impl AiOrchestrator {
    pub fn new(backend: Arc<dyn AiBackend>) -> Self {
        Self {
            backend: Some(backend),
            timeout: None,
        }
    }

    /// Every call returns its fallback.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Bound each call; an expired call counts as a failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    async fn call(&self, action: AiAction, lead: &Lead) -> Result<Value, AiError> {
        let backend = self.backend.as_ref().ok_or(AiError::NotConfigured)?;
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, backend.invoke(action, lead))
                .await
                .map_err(|_| AiError::Timeout(limit))?,
            None => backend.invoke(action, lead).await,
        }
    }

    async fn run<T>(
        &self,
        action: AiAction,
        lead: &Lead,
        parse: fn(Value) -> Result<T, AiError>,
        fallback: fn() -> T,
    ) -> T {
        match self.call(action, lead).await.and_then(parse) {
            Ok(result) => result,
            Err(AiError::NotConfigured) => {
                tracing::debug!(action = action.as_str(), "No AI backend; using fallback");
                fallback()
            }
            Err(e) => {
                tracing::warn!(
                    action = action.as_str(),
                    lead_id = %lead.id,
                    error = %e,
                    "AI call failed; using fallback"
                );
                fallback()
            }
        }
    }

    pub async fn score_lead(&self, lead: &Lead) -> LeadAnalysis {
        self.run(
            AiAction::AnalyzeLead,
            lead,
            parse_analysis,
            LeadAnalysis::fallback,
        )
        .await
    }

    pub async fn draft_email(&self, lead: &Lead) -> EmailDraft {
        self.run(AiAction::GenerateEmail, lead, parse_email, EmailDraft::fallback)
            .await
    }

    pub async fn draft_quote(&self, lead: &Lead) -> QuoteDraft {
        self.run(AiAction::GenerateQuote, lead, parse_quote, QuoteDraft::fallback)
            .await
    }
}

/// Pick the AI backend for this process:
///
/// 1. an explicit AI endpoint, called with the remote token when there is one
/// 2. `<api_url>/ai` in remote mode
/// 3. Gemini in-process when an API key is set
/// 4. none: every call returns its fallback
pub fn orchestrator_from_config(config: &Config, mode: BackingMode) -> AiOrchestrator {
    if !config.ai.enabled {
        tracing::info!("AI disabled by configuration");
        return AiOrchestrator::disabled();
    }
    match build_backend(config, mode) {
        Ok(Some(backend)) => {
            let orchestrator = AiOrchestrator::new(backend);
            match config.ai.timeout {
                Some(limit) => orchestrator.with_timeout(limit),
                None => orchestrator,
            }
        }
        Ok(None) => {
            tracing::info!("AI not configured; AI features return fallbacks");
            AiOrchestrator::disabled()
        }
        Err(e) => {
            tracing::warn!(error = %e, "AI backend could not be created; AI features return fallbacks");
            AiOrchestrator::disabled()
        }
    }
}

fn build_backend(
    config: &Config,
    mode: BackingMode,
) -> Result<Option<Arc<dyn AiBackend>>, AiError> {
    let token = config.remote.api_token.as_ref();
    if let Some(endpoint) = &config.ai.endpoint {
        let backend = HttpAiBackend::new(endpoint.clone(), token, config.ai.timeout)?;
        return Ok(Some(Arc::new(backend)));
    }
    if let (BackingMode::Remote, Some(remote)) = (mode, config.remote.resolved()) {
        let endpoint = format!("{}/ai", remote.api_url);
        let backend = HttpAiBackend::new(endpoint, Some(remote.api_token), config.ai.timeout)?;
        return Ok(Some(Arc::new(backend)));
    }
    if let Some(key) = &config.ai.api_key {
        let model = GeminiClient::new(
            key,
            config.ai.base_url.clone(),
            config.ai.model.clone(),
            config.ai.timeout,
        )?;
        return Ok(Some(Arc::new(DirectAiBackend::new(Arc::new(model)))));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::gemini::tests::ScriptedModel;
    use super::*;
    use crate::db::local::fixtures;

    fn lead() -> Lead {
        fixtures::leads().expect("fixtures").remove(1)
    }

    fn direct(model: ScriptedModel) -> AiOrchestrator {
        AiOrchestrator::new(Arc::new(DirectAiBackend::new(Arc::new(model))))
    }

    struct Stalled;

    #[async_trait]
    impl AiBackend for Stalled {
        async fn invoke(&self, _action: AiAction, _lead: &Lead) -> Result<Value, AiError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    #[test]
    fn fallbacks_are_fixed() {
        assert_eq!(
            fallback_value(AiAction::AnalyzeLead),
            json!({
                "score": 50,
                "summary": "analysis unavailable",
                "nextAction": "manual review",
                "dealProbability": "unknown"
            })
        );
        assert_eq!(fallback_value(AiAction::GenerateQuote), json!({"items": []}));
        assert_eq!(
            fallback_value(AiAction::GenerateEmail),
            json!({"emailDraft": FALLBACK_EMAIL})
        );
    }

    #[test]
    fn analysis_score_must_be_in_range() {
        let ok = json!({"score": 72.4, "summary": "s", "nextAction": "n", "dealProbability": 40});
        let analysis = parse_analysis(ok).expect("valid");
        assert_eq!(analysis.score, 72);
        assert_eq!(analysis.deal_probability, "40%");

        let high = json!({"score": 140, "summary": "s", "nextAction": "n", "dealProbability": "9%"});
        assert!(parse_analysis(high).is_err());
        let missing = json!({"score": 10, "summary": "s"});
        assert!(parse_analysis(missing).is_err());
    }

    #[tokio::test]
    async fn disabled_orchestrator_returns_fallbacks() {
        let ai = AiOrchestrator::disabled();
        assert!(!ai.is_configured());
        assert_eq!(ai.score_lead(&lead()).await, LeadAnalysis::fallback());
        assert_eq!(ai.draft_email(&lead()).await, EmailDraft::fallback());
        assert!(ai.draft_quote(&lead()).await.items.is_empty());
    }

    #[tokio::test]
    async fn model_error_collapses_to_fallback() {
        let ai = direct(ScriptedModel {
            answer: Err("connection reset".to_string()),
            calls: Default::default(),
        });
        assert_eq!(ai.score_lead(&lead()).await, LeadAnalysis::fallback());
    }

    #[tokio::test]
    async fn non_json_answer_collapses_to_fallback() {
        let ai = direct(ScriptedModel::answering("I think this lead is great!"));
        assert_eq!(ai.score_lead(&lead()).await, LeadAnalysis::fallback());
        assert_eq!(ai.draft_quote(&lead()).await, QuoteDraft::fallback());
    }

    #[tokio::test]
    async fn successful_analysis_passes_through() {
        let ai = direct(ScriptedModel::answering(
            r#"{"score": 88, "summary": "Ready to buy", "nextAction": "Call now", "dealProbability": "70%"}"#,
        ));
        let analysis = ai.score_lead(&lead()).await;
        assert_eq!(analysis.score, 88);
        assert_eq!(analysis.next_action, "Call now");
    }

    fn config(enabled: bool, api_key: Option<&str>) -> Config {
        config_with_timeout(enabled, api_key, None)
    }

    fn config_with_timeout(
        enabled: bool,
        api_key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Config {
        use crate::config::{AiConfig, RemoteConfig, ServerConfig, StoreConfig};
        Config {
            remote: RemoteConfig::default(),
            store: StoreConfig::memory(),
            ai: AiConfig {
                enabled,
                endpoint: None,
                api_key: api_key.map(|k| secrecy::SecretString::from(k.to_string())),
                model: "test-model".to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
                timeout,
            },
            server: ServerConfig {
                bind: "127.0.0.1:0".parse().expect("addr"),
                token: None,
                user_id: "u".to_string(),
                email: None,
            },
        }
    }

    #[test]
    fn backend_selection_follows_config() {
        assert!(!orchestrator_from_config(&config(true, None), BackingMode::Local).is_configured());
        assert!(
            orchestrator_from_config(&config(true, Some("key")), BackingMode::Local)
                .is_configured()
        );
        assert!(
            !orchestrator_from_config(&config(false, Some("key")), BackingMode::Local)
                .is_configured()
        );
    }

    #[test]
    fn timeout_is_opt_in() {
        let unbounded = orchestrator_from_config(&config(true, Some("key")), BackingMode::Local);
        assert!(unbounded.is_configured());
        assert_eq!(unbounded.timeout(), None);

        let bounded = orchestrator_from_config(
            &config_with_timeout(true, Some("key"), Some(Duration::from_secs(3))),
            BackingMode::Local,
        );
        assert_eq!(bounded.timeout(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let ai = AiOrchestrator::new(Arc::new(Stalled)).with_timeout(Duration::from_millis(50));
        assert_eq!(ai.score_lead(&lead()).await, LeadAnalysis::fallback());
    }
}
