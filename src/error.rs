//! Error types shared across the crate.

use thiserror::Error;

/// Errors surfaced by the entity repositories, in either backing mode.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("upstream service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("local store error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// One-line message suitable for a toast or status bar.
    pub fn notification(&self) -> String {
        match self {
            Self::NotFound { entity, .. } => format!("This {entity} no longer exists."),
            Self::Unauthenticated(_) => "Your session has expired. Please sign in again.".to_string(),
            Self::Validation(message) => format!("Some fields are invalid: {message}"),
            Self::Upstream { status, .. } => format!("The server could not complete the request ({status})."),
            Self::Transport(_) => "The server is unreachable. Check your connection.".to_string(),
            Self::Serialization(_) | Self::Storage(_) => {
                "Something went wrong while saving your data.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for RepositoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Serialization(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Failures of a generative call. Never leaves the AI orchestrator.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI backend is not configured")]
    NotConfigured,

    #[error("AI request failed: {0}")]
    Request(String),

    #[error("AI service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI response was malformed: {0}")]
    Malformed(String),

    #[error("AI request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to parse settings file {path}: {message}")]
    Parse { path: String, message: String },
}
