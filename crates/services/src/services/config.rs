//! Environment-driven configuration.

use std::{net::SocketAddr, time::Duration};

use thiserror::Error;
use utils::logging::LogFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} must be true or false, got {value:?}")]
    InvalidBool { key: &'static str, value: String },
    #[error("{key} must be a socket address, got {value:?}")]
    InvalidAddress { key: &'static str, value: String },
}

/// Features that can be switched off without a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub coach: bool,
    pub calendar: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            coach: true,
            calendar: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub database_url: String,
    pub api_base_url: String,
    pub api_timeout: Duration,
    pub firebase_project_id: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub automation_webhook_url: Option<String>,
    pub features: FeatureFlags,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database_url: "sqlite://goalflow.db?mode=rwc".to_string(),
            api_base_url: "http://127.0.0.1:8080/api".to_string(),
            api_timeout: Duration::from_millis(10_000),
            firebase_project_id: None,
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            automation_webhook_url: None,
            features: FeatureFlags::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let bind = match get("GOALFLOW_BIND") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidAddress {
                key: "GOALFLOW_BIND",
                value,
            })?,
            None => defaults.bind,
        };

        let api_timeout = match get("API_TIMEOUT_MS") {
            Some(value) => Duration::from_millis(value.trim().parse().map_err(|_| {
                ConfigError::InvalidNumber {
                    key: "API_TIMEOUT_MS",
                    value: value.clone(),
                }
            })?),
            None => defaults.api_timeout,
        };

        let features = FeatureFlags {
            coach: parse_bool("FEATURE_COACH", get("FEATURE_COACH"), true)?,
            calendar: parse_bool("FEATURE_CALENDAR", get("FEATURE_CALENDAR"), true)?,
        };

        Ok(Self {
            bind,
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            api_base_url: get("API_BASE_URL").unwrap_or(defaults.api_base_url),
            api_timeout,
            firebase_project_id: get("FIREBASE_PROJECT_ID"),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            automation_webhook_url: get("AUTOMATION_WEBHOOK_URL"),
            features,
            log_format: get("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
        })
    }
}

fn parse_bool(
    key: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.api_timeout, Duration::from_secs(10));
        assert!(config.features.coach && config.features.calendar);
        assert!(config.automation_webhook_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GOALFLOW_BIND", "0.0.0.0:9000"),
            ("API_TIMEOUT_MS", "2500"),
            ("FEATURE_COACH", "off"),
            ("AUTOMATION_WEBHOOK_URL", "https://hooks.example.com/focus"),
            ("FIREBASE_PROJECT_ID", "  "),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.api_timeout, Duration::from_millis(2500));
        assert!(!config.features.coach);
        assert!(config.firebase_project_id.is_none());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("API_TIMEOUT_MS", "soon")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("FEATURE_CALENDAR", "maybe")])),
            Err(ConfigError::InvalidBool { .. })
        ));
    }
}
