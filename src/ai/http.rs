//! AI backend reached over HTTP: one endpoint, an `action` discriminator and
//! the lead in external field naming.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::ai::{AiAction, AiBackend};
use crate::db::Lead;
use crate::error::AiError;
use crate::transcode::{encode, to_internal};

pub struct HttpAiBackend {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAiBackend {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<&SecretString>,
        timeout: Option<Duration>,
    ) -> Result<Self, AiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let mut auth_value =
                HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .map_err(|_| AiError::Request("invalid token format".to_string()))?;
            auth_value.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| AiError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AiBackend for HttpAiBackend {
    async fn invoke(&self, action: AiAction, lead: &Lead) -> Result<Value, AiError> {
        let lead = encode(lead).map_err(|e| AiError::Request(format!("encode lead: {e}")))?;
        let body = json!({ "action": action, "lead": lead });

        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| AiError::Malformed(e.to_string()))?;
        Ok(to_internal(value))
    }
}
