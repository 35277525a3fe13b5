//! Engine configuration: defaults, environment overrides and validation

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const ENV_LOCAL_REGISTRY_URL: &str = "HARBOR_REPLICATION_LOCAL_REGISTRY_URL";
pub const ENV_MAX_FETCH_CONCURRENCY: &str = "HARBOR_REPLICATION_MAX_FETCH_CONCURRENCY";
pub const ENV_HTTP_TIMEOUT: &str = "HARBOR_REPLICATION_HTTP_TIMEOUT";
pub const ENV_STOP_WAIT_TIMEOUT: &str = "HARBOR_REPLICATION_STOP_WAIT_TIMEOUT";
pub const ENV_LOG_LEVEL: &str = "HARBOR_REPLICATION_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "HARBOR_REPLICATION_LOG_JSON";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// The local Harbor instance, used for the local side of policies
    pub local_registry_url: String,
    /// Concurrent tag listings per fetch
    pub max_fetch_concurrency: usize,
    pub http_timeout_secs: u64,
    /// How long a failed flow waits for its tasks to stop
    pub stop_wait_timeout_secs: u64,
    pub stop_poll_initial_interval_ms: u64,
    pub stop_poll_max_interval_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            local_registry_url: "http://core:8080".to_string(),
            max_fetch_concurrency: crate::concurrency::DEFAULT_CONCURRENCY,
            http_timeout_secs: 300,
            stop_wait_timeout_secs: 10,
            stop_poll_initial_interval_ms: 100,
            stop_poll_max_interval_ms: 1000,
            logging: LoggingConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Defaults overridden by the `HARBOR_REPLICATION_*` variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Reads a JSON config file; missing fields keep their defaults and the
    /// environment still overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Validation(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = env::var(ENV_LOCAL_REGISTRY_URL) {
            self.local_registry_url = url;
        }
        if let Some(value) = parse_env(ENV_MAX_FETCH_CONCURRENCY)? {
            self.max_fetch_concurrency = value;
        }
        if let Some(value) = parse_env(ENV_HTTP_TIMEOUT)? {
            self.http_timeout_secs = value;
        }
        if let Some(value) = parse_env(ENV_STOP_WAIT_TIMEOUT)? {
            self.stop_wait_timeout_secs = value;
        }
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Ok(json) = env::var(ENV_LOG_JSON) {
            self.logging.json = matches!(json.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.local_registry_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ReplicationError::Validation(format!(
                "invalid local registry URL: {}. Must start with http:// or https://",
                self.local_registry_url
            )));
        }
        if self.max_fetch_concurrency == 0 {
            return Err(ReplicationError::Validation(
                "max_fetch_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 || self.stop_wait_timeout_secs == 0 {
            return Err(ReplicationError::Validation(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.stop_poll_initial_interval_ms == 0
            || self.stop_poll_initial_interval_ms > self.stop_poll_max_interval_ms
        {
            return Err(ReplicationError::Validation(format!(
                "invalid stop poll intervals: initial {}ms, max {}ms",
                self.stop_poll_initial_interval_ms, self.stop_poll_max_interval_ms
            )));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn stop_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_wait_timeout_secs)
    }

    pub fn stop_poll_initial_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_initial_interval_ms)
    }

    pub fn stop_poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_max_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| {
                ReplicationError::Validation(format!("invalid value of {}: {}", key, raw))
            }),
        Err(_) => Ok(None),
    }
}
