use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::core::analysis::cache::DEFAULT_ANALYSIS_TTL;
use crate::core::feed::cache::DEFAULT_FEED_TTL;
use crate::core::feed::fetcher::DEFAULT_FETCH_TIMEOUT;
use crate::core::llm::{
    validate_config, LlmConfig, LlmConfigError, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS,
};

const API_KEY_VARS: [&str; 2] = ["FEEDLENS_LLM_API_KEY", "COHERE_API_KEY"];
const MODEL_VARS: [&str; 2] = ["FEEDLENS_LLM_MODEL", "COHERE_MODEL"];
const BASE_URL_VAR: &str = "FEEDLENS_LLM_BASE_URL";
const LLM_TIMEOUT_VAR: &str = "FEEDLENS_LLM_TIMEOUT_SECS";
const FEED_TIMEOUT_VAR: &str = "FEEDLENS_FEED_TIMEOUT_SECS";
const FEED_TTL_VAR: &str = "FEEDLENS_FEED_TTL_SECS";
const ANALYSIS_TTL_VAR: &str = "FEEDLENS_ANALYSIS_TTL_SECS";
const CATALOG_VAR: &str = "FEEDLENS_CATALOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a positive whole number of seconds, got {value:?}")]
    InvalidSeconds { name: &'static str, value: String },
    #[error("invalid llm settings: {0}")]
    Llm(#[from] LlmConfigError),
}

/// Runtime settings resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `None` runs the service in heuristic-only mode.
    pub llm: Option<LlmConfig>,
    pub feed_timeout: Duration,
    pub feed_ttl: Duration,
    pub analysis_ttl: Duration,
    pub catalog_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: None,
            feed_timeout: DEFAULT_FETCH_TIMEOUT,
            feed_ttl: DEFAULT_FEED_TTL,
            analysis_ttl: DEFAULT_ANALYSIS_TTL,
            catalog_path: None,
        }
    }
}

impl AppConfig {
    /// Loads `.env.local` and `.env` if present, then reads the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        for file in [".env.local", ".env"] {
            if let Ok(path) = dotenvy::from_filename(file) {
                debug!(path = %path.display(), "loaded environment file");
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let first_of = |names: &[&str]| names.iter().find_map(|name| read(name));

        let llm = match first_of(&API_KEY_VARS) {
            Some(api_key) => {
                let config = LlmConfig {
                    base_url: read(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                    api_key,
                    model: first_of(&MODEL_VARS).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                    timeout_secs: seconds(LLM_TIMEOUT_VAR, read(LLM_TIMEOUT_VAR))?
                        .map_or(DEFAULT_TIMEOUT_SECS, |timeout| timeout.as_secs()),
                };
                validate_config(&config)?;
                Some(config)
            }
            None => None,
        };

        Ok(Self {
            llm,
            feed_timeout: seconds(FEED_TIMEOUT_VAR, read(FEED_TIMEOUT_VAR))?.unwrap_or(DEFAULT_FETCH_TIMEOUT),
            feed_ttl: seconds(FEED_TTL_VAR, read(FEED_TTL_VAR))?.unwrap_or(DEFAULT_FEED_TTL),
            analysis_ttl: seconds(ANALYSIS_TTL_VAR, read(ANALYSIS_TTL_VAR))?.unwrap_or(DEFAULT_ANALYSIS_TTL),
            catalog_path: read(CATALOG_VAR).map(PathBuf::from),
        })
    }
}

fn seconds(name: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = raw else {
        return Ok(None);
    };
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::InvalidSeconds { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from(&[]).expect("defaults");
        assert_eq!(config, AppConfig::default());
        assert!(config.llm.is_none());
    }

    #[test]
    fn blank_api_key_counts_as_unset() {
        let config = config_from(&[("FEEDLENS_LLM_API_KEY", "   ")]).expect("parses");
        assert!(config.llm.is_none());
    }

    #[test]
    fn reads_llm_settings_and_legacy_aliases() {
        let config = config_from(&[("COHERE_API_KEY", "legacy"), ("COHERE_MODEL", "command-r")]).expect("parses");
        let llm = config.llm.expect("llm configured");
        assert_eq!(llm.api_key, "legacy");
        assert_eq!(llm.model, "command-r");
        assert_eq!(llm.base_url, DEFAULT_BASE_URL);
        assert_eq!(llm.timeout_secs, DEFAULT_TIMEOUT_SECS);

        let config = config_from(&[
            ("FEEDLENS_LLM_API_KEY", "primary"),
            ("COHERE_API_KEY", "legacy"),
            ("FEEDLENS_LLM_BASE_URL", "http://localhost:8080/v1"),
            ("FEEDLENS_LLM_TIMEOUT_SECS", "5"),
        ])
        .expect("parses");
        let llm = config.llm.expect("llm configured");
        assert_eq!(llm.api_key, "primary");
        assert_eq!(llm.model, DEFAULT_MODEL);
        assert_eq!(llm.base_url, "http://localhost:8080/v1");
        assert_eq!(llm.timeout_secs, 5);
    }

    #[test]
    fn reads_durations_and_catalog_path() {
        let config = config_from(&[
            ("FEEDLENS_FEED_TIMEOUT_SECS", "10"),
            ("FEEDLENS_FEED_TTL_SECS", "60"),
            ("FEEDLENS_ANALYSIS_TTL_SECS", "120"),
            ("FEEDLENS_CATALOG", "/etc/feedlens/feeds.opml"),
        ])
        .expect("parses");
        assert_eq!(config.feed_timeout, Duration::from_secs(10));
        assert_eq!(config.feed_ttl, Duration::from_secs(60));
        assert_eq!(config.analysis_ttl, Duration::from_secs(120));
        assert_eq!(config.catalog_path, Some(PathBuf::from("/etc/feedlens/feeds.opml")));
    }

    #[test]
    fn rejects_bad_values() {
        for value in ["0", "-5", "soon"] {
            let error = config_from(&[("FEEDLENS_FEED_TTL_SECS", value)]).expect_err("rejected");
            assert!(matches!(
                error,
                ConfigError::InvalidSeconds {
                    name: "FEEDLENS_FEED_TTL_SECS",
                    ..
                }
            ));
        }

        let error = config_from(&[("FEEDLENS_LLM_API_KEY", "key"), ("FEEDLENS_LLM_BASE_URL", "localhost")])
            .expect_err("rejected");
        assert!(matches!(error, ConfigError::Llm(LlmConfigError::InvalidBaseUrl)));
    }
}
