//! Client configuration (environment-driven, serde-loadable).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for talking to the retail-management API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API base URL (no trailing slash needed).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-attempt request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum attempts for retryable reads (1 = no retry).
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * retry_backoff_ms` before the next try.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Verify the server's TLS certificate.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Lifetime of cached read responses, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Bearer token for the API.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_verify_tls() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    20
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            verify_tls: default_verify_tls(),
            cache_ttl_secs: default_cache_ttl_secs(),
            token: None,
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `STOREDESK_API_URL` | API base URL |
    /// | `STOREDESK_TIMEOUT_SECS` | Per-attempt timeout |
    /// | `STOREDESK_RETRY_MAX_ATTEMPTS` | Attempts for retryable reads |
    /// | `STOREDESK_RETRY_BACKOFF_MS` | Backoff unit |
    /// | `STOREDESK_VERIFY_TLS` | `false`/`0` disables certificate checks |
    /// | `STOREDESK_CACHE_TTL_SECS` | Read cache lifetime |
    /// | `STOREDESK_AUTH_TOKEN` | Bearer token |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            base_url: lookup("STOREDESK_API_URL").unwrap_or(defaults.base_url),
            timeout_secs: parse_var(&lookup, "STOREDESK_TIMEOUT_SECS")?
                .unwrap_or(defaults.timeout_secs),
            retry_max_attempts: parse_var(&lookup, "STOREDESK_RETRY_MAX_ATTEMPTS")?
                .unwrap_or(defaults.retry_max_attempts),
            retry_backoff_ms: parse_var(&lookup, "STOREDESK_RETRY_BACKOFF_MS")?
                .unwrap_or(defaults.retry_backoff_ms),
            verify_tls: match lookup("STOREDESK_VERIFY_TLS") {
                Some(v) => parse_bool("STOREDESK_VERIFY_TLS", &v)?,
                None => defaults.verify_tls,
            },
            cache_ttl_secs: parse_var(&lookup, "STOREDESK_CACHE_TTL_SECS")?
                .unwrap_or(defaults.cache_ttl_secs),
            token: lookup("STOREDESK_AUTH_TOKEN").filter(|t| !t.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.retry_max_attempts = max_attempts;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Base URL without a trailing slash.
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(None),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert_eq!(config.cache_ttl(), Duration::from_secs(20));
    }

    #[test]
    fn reads_every_variable() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("STOREDESK_API_URL", "https://api.example.test/"),
            ("STOREDESK_TIMEOUT_SECS", "5"),
            ("STOREDESK_RETRY_MAX_ATTEMPTS", "4"),
            ("STOREDESK_RETRY_BACKOFF_MS", "100"),
            ("STOREDESK_VERIFY_TLS", "false"),
            ("STOREDESK_CACHE_TTL_SECS", "15"),
            ("STOREDESK_AUTH_TOKEN", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.normalized_base_url(), "https://api.example.test");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.retry_max_attempts, 4);
        assert!(!config.verify_tls);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.backoff_for(3), Duration::from_millis(300));
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = ClientConfig::from_lookup(lookup_from(&[("STOREDESK_RETRY_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "STOREDESK_RETRY_MAX_ATTEMPTS",
                value: "many".to_string()
            }
        );
    }

    #[test]
    fn rejects_zero_attempts_and_non_http_urls() {
        assert!(ClientConfig::from_lookup(lookup_from(&[("STOREDESK_RETRY_MAX_ATTEMPTS", "0")])).is_err());
        assert!(ClientConfig::from_lookup(lookup_from(&[("STOREDESK_API_URL", "ftp://x")])).is_err());
    }
}
