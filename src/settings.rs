//! On-disk settings file (TOML).
//!
//! Every value here can be overridden by an environment variable; see
//! [`crate::config::Config::resolve`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_AI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_AI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub remote: RemoteSettings,
    pub store: StoreSettings,
    pub ai: AiSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Directory for the local store, or `:memory:`.
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// `false` turns every AI operation into its fallback.
    pub enabled: bool,
    /// Hosted AI function. Takes precedence over a direct model key.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Unset or 0 means AI calls are not bounded.
    pub timeout_secs: Option<u64>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            api_key: None,
            model: DEFAULT_AI_MODEL.to_string(),
            base_url: DEFAULT_AI_BASE_URL.to_string(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub token: Option<String>,
    pub user_id: String,
    pub email: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            token: None,
            user_id: "server-user".to_string(),
            email: None,
        }
    }
}

impl Settings {
    /// `<config_dir>/leadpipe/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("leadpipe").join("config.toml"))
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Parse {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };
        Self::from_toml(&raw).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [remote]
            api_url = "https://crm.example.com/api"

            [ai]
            timeout_secs = 5
            "#,
        )
        .expect("parse");
        assert_eq!(
            settings.remote.api_url.as_deref(),
            Some("https://crm.example.com/api")
        );
        assert_eq!(settings.remote.api_token, None);
        assert_eq!(settings.ai.timeout_secs, Some(5));
        assert_eq!(settings.ai.model, DEFAULT_AI_MODEL);
        assert_eq!(settings.server.bind, DEFAULT_BIND);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.ai.timeout_secs, None);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote\napi_url = 1").expect("write");
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
