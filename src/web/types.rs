//! Request and response types for the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::AiAction;
use crate::db::LeadStatus;
use crate::error::RepositoryError;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: LeadStatus,
}

/// `lead` stays raw until the action is known to be valid.
#[derive(Debug, Deserialize)]
pub struct AiRequest {
    pub action: AiAction,
    pub lead: Value,
}

/// Error answer: `{"error": ...}` plus an optional AI fallback.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub fallback: Option<Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fallback: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Invalid or missing token")
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        let status = match &e {
            RepositoryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RepositoryError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RepositoryError::Validation(_) => StatusCode::BAD_REQUEST,
            RepositoryError::Upstream { .. } | RepositoryError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            RepositoryError::Serialization(_) | RepositoryError::Storage(_) => {
                tracing::error!(error = %e, "Repository failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            fallback: self.fallback,
        };
        (self.status, Json(body)).into_response()
    }
}
