//! Runtime configuration: settings file overlaid with environment variables.

pub(crate) mod helpers;
pub mod mode;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{
    optional_env, optional_env_or, parse_bool_env, parse_optional_u64_env, parse_string_env,
    validate_http_url,
};
use crate::error::ConfigError;
use crate::settings::Settings;

pub const ENV_CONFIG_PATH: &str = "LEADPIPE_CONFIG";
pub const ENV_API_URL: &str = "LEADPIPE_API_URL";
pub const ENV_API_TOKEN: &str = "LEADPIPE_API_TOKEN";
pub const ENV_STORE_PATH: &str = "LEADPIPE_STORE_PATH";
pub const ENV_AI_URL: &str = "LEADPIPE_AI_URL";
pub const ENV_AI_KEY: &str = "GEMINI_API_KEY";

/// Special store path selecting the non-persistent store.
pub const MEMORY_STORE: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub ai: AiConfig,
    pub server: ServerConfig,
}

/// Remote service settings. Both values are required for remote mode.
#[derive(Debug, Clone, Default)]
pub struct RemoteConfig {
    pub api_url: Option<String>,
    pub api_token: Option<SecretString>,
}

/// Borrowed view of a complete [`RemoteConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RemoteEndpoint<'a> {
    pub api_url: &'a str,
    pub api_token: &'a SecretString,
}

impl RemoteConfig {
    pub fn resolved(&self) -> Option<RemoteEndpoint<'_>> {
        Some(RemoteEndpoint {
            api_url: self.api_url.as_deref()?,
            api_token: self.api_token.as_ref()?,
        })
    }

    /// Names of the env keys that are still unset.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_url.is_none() {
            missing.push(ENV_API_URL);
        }
        if self.api_token.is_none() {
            missing.push(ENV_API_TOKEN);
        }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: StoreLocation,
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            location: StoreLocation::Memory,
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::Directory(path.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub base_url: String,
    /// Per-call bound. `None` leaves AI calls unbounded.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub token: Option<SecretString>,
    pub user_id: String,
    pub email: Option<String>,
}

impl Config {
    /// Load the settings file (`LEADPIPE_CONFIG` or the per-user default)
    /// and apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = optional_env(ENV_CONFIG_PATH)?
            .map(PathBuf::from)
            .or_else(Settings::default_path);
        let settings = match path {
            Some(path) => Settings::load(&path)?,
            None => Settings::default(),
        };
        Self::resolve(&settings)
    }

    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            remote: RemoteConfig::resolve(settings)?,
            store: StoreConfig::resolve(settings)?,
            ai: AiConfig::resolve(settings)?,
            server: ServerConfig::resolve(settings)?,
        })
    }
}

impl RemoteConfig {
    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let api_url = optional_env_or(ENV_API_URL, settings.remote.api_url.clone())?
            .map(|raw| validate_http_url(ENV_API_URL, &raw))
            .transpose()?;
        let api_token = optional_env_or(ENV_API_TOKEN, settings.remote.api_token.clone())?
            .map(SecretString::from);
        Ok(Self { api_url, api_token })
    }
}

impl StoreConfig {
    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        match optional_env_or(ENV_STORE_PATH, settings.store.path.clone())? {
            Some(raw) if raw == MEMORY_STORE => Ok(Self::memory()),
            Some(raw) => Ok(Self::directory(raw)),
            None => {
                let dir = dirs::data_dir().ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_STORE_PATH.to_string(),
                    message: "no data directory on this platform; set a path or :memory:"
                        .to_string(),
                })?;
                Ok(Self::directory(dir.join("leadpipe")))
            }
        }
    }
}

impl AiConfig {
    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let endpoint = optional_env_or(ENV_AI_URL, settings.ai.endpoint.clone())?
            .map(|raw| validate_http_url(ENV_AI_URL, &raw))
            .transpose()?;
        let api_key =
            optional_env_or(ENV_AI_KEY, settings.ai.api_key.clone())?.map(SecretString::from);
        let base_url = validate_http_url(
            "LEADPIPE_AI_BASE_URL",
            &parse_string_env("LEADPIPE_AI_BASE_URL", settings.ai.base_url.clone())?,
        )?;
        let timeout_secs =
            parse_optional_u64_env("LEADPIPE_AI_TIMEOUT_SECS", settings.ai.timeout_secs)?;
        Ok(Self {
            enabled: parse_bool_env("LEADPIPE_AI_ENABLED", settings.ai.enabled)?,
            endpoint,
            api_key,
            model: parse_string_env("LEADPIPE_AI_MODEL", settings.ai.model.clone())?,
            base_url,
            timeout: timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs),
        })
    }
}

impl ServerConfig {
    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let raw_bind = parse_string_env("LEADPIPE_BIND", settings.server.bind.clone())?;
        let bind = raw_bind
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "LEADPIPE_BIND".to_string(),
                message: format!("'{raw_bind}' is not a socket address: {e}"),
            })?;
        Ok(Self {
            bind,
            token: optional_env_or("LEADPIPE_SERVER_TOKEN", settings.server.token.clone())?
                .map(SecretString::from),
            user_id: parse_string_env("LEADPIPE_SERVER_USER", settings.server.user_id.clone())?,
            email: optional_env_or("LEADPIPE_SERVER_EMAIL", settings.server.email.clone())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn missing_keys_lists_what_is_unset() {
        let empty = RemoteConfig::default();
        assert_eq!(empty.missing_keys(), vec![ENV_API_URL, ENV_API_TOKEN]);
        assert!(empty.resolved().is_none());

        let half = RemoteConfig {
            api_url: Some("https://crm.example.com".to_string()),
            api_token: None,
        };
        assert_eq!(half.missing_keys(), vec![ENV_API_TOKEN]);
        assert!(half.resolved().is_none());

        let full = RemoteConfig {
            api_url: Some("https://crm.example.com".to_string()),
            api_token: Some(SecretString::from("tok".to_string())),
        };
        assert!(full.missing_keys().is_empty());
        let endpoint = full.resolved().expect("complete config");
        assert_eq!(endpoint.api_url, "https://crm.example.com");
        assert_eq!(endpoint.api_token.expose_secret(), "tok");
    }

    #[test]
    fn memory_store_keyword_selects_memory() {
        let mut settings = Settings::default();
        settings.store.path = Some(MEMORY_STORE.to_string());
        // Env override wins when present; only assert when it is absent.
        if std::env::var(ENV_STORE_PATH).is_err() {
            let store = StoreConfig::resolve(&settings).expect("resolve");
            assert_eq!(store.location, StoreLocation::Memory);
        }
    }
}
