use std::env::VarError;

use crate::error::ConfigError;

/// Read an env var. Unset and blank values both come back as `None`.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

/// Env var first, then the settings file value.
pub(crate) fn optional_env_or(
    key: &str,
    fallback: Option<String>,
) -> Result<Option<String>, ConfigError> {
    Ok(optional_env(key)?.or_else(|| fallback.filter(|v| !v.trim().is_empty())))
}

pub(crate) fn parse_string_env(key: &str, default: String) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or(default))
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(raw) => parse_bool_value(key, &raw),
        None => Ok(default),
    }
}

/// Env var first, then the settings file value. Neither set is `None`.
pub(crate) fn parse_optional_u64_env(
    key: &str,
    fallback: Option<u64>,
) -> Result<Option<u64>, ConfigError> {
    match optional_env(key)? {
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a non-negative integer: {e}"),
            }),
        None => Ok(fallback),
    }
}

pub(crate) fn parse_bool_value(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Accept only absolute http(s) URLs. Returns the URL without a trailing
/// slash so paths can be appended directly.
pub(crate) fn validate_http_url(key: &str, raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("not a valid URL: {e}"),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}
