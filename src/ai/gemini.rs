//! Direct Gemini `generateContent` client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ai::{AiAction, AiBackend, prompts};
use crate::db::Lead;
use crate::error::AiError;

/// A text generator. `json_mode` asks for a JSON-only response.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, json_mode: bool) -> Result<String, AiError>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        api_key: &SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, AiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(api_key.expose_secret())
            .map_err(|_| AiError::Request("invalid API key format".to_string()))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| AiError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: Value,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, prompt: &str, json_mode: bool) -> Result<String, AiError> {
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            generation_config: if json_mode {
                json!({ "responseMimeType": "application/json" })
            } else {
                json!({})
            },
        };

        let response = self
            .http
            .post(self.generate_url())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::Malformed(e.to_string()))?;
        parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text.filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| AiError::Malformed("no text in model response".to_string()))
    }
}

fn parse_json_text(text: &str) -> Result<Value, AiError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).map_err(|e| AiError::Malformed(e.to_string()))
}

/// Run one action against a model and shape the answer the way the AI
/// endpoint returns it (internal field names).
pub async fn run_action(
    model: &dyn GenerativeModel,
    action: AiAction,
    lead: &Lead,
) -> Result<Value, AiError> {
    match action {
        AiAction::AnalyzeLead => {
            let text = model.generate(&prompts::analyze_lead(lead), true).await?;
            parse_json_text(&text)
        }
        AiAction::GenerateEmail => {
            let text = model.generate(&prompts::generate_email(lead), false).await?;
            Ok(json!({ "emailDraft": text.trim() }))
        }
        AiAction::GenerateQuote => {
            let text = model.generate(&prompts::generate_quote(lead), true).await?;
            match parse_json_text(&text)? {
                items @ Value::Array(_) => Ok(json!({ "items": items })),
                wrapped @ Value::Object(_) if wrapped.get("items").is_some() => Ok(wrapped),
                other => Err(AiError::Malformed(format!(
                    "expected a list of items, got {other}"
                ))),
            }
        }
    }
}

/// Calls the model in-process.
pub struct DirectAiBackend {
    model: Arc<dyn GenerativeModel>,
}

impl DirectAiBackend {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl AiBackend for DirectAiBackend {
    async fn invoke(&self, action: AiAction, lead: &Lead) -> Result<Value, AiError> {
        run_action(self.model.as_ref(), action, lead).await
    }
}
