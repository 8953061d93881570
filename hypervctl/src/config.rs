//! Configuration for polling, timeouts, retries and logging.
//!
//! Supports loading configuration from a TOML file.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::job::JobWaitConfig;
use crate::retry::RetryPolicy;
use crate::vm::ReconcileConfig;

/// Library configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// State and job polling
    #[serde(default)]
    pub polling: PollingConfig,

    /// Wait budgets
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Busy-host retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Polling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Interval between state and job polls in milliseconds (default: 100)
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

/// Timeout configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Budget for an entity to reach a requested state (default: 300)
    #[serde(default = "default_state_change_secs")]
    pub state_change_secs: u64,

    /// Budget for a single host job; unbounded when absent
    #[serde(default)]
    pub job_secs: Option<u64>,
}

/// Retry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Pause before re-issuing a call the host rejected as busy (default: 100)
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,

    /// Attempt ceiling; unbounded when absent
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level filter (default: "hypervctl=info")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_state_change_secs() -> u64 {
    300
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "hypervctl=info".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            state_change_secs: default_state_change_secs(),
            job_secs: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval_ms(),
            max_attempts: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.display().to_string(), e.to_string()))?;

        Self::parse(&content)
            .map_err(|e| ConfigError::ParseError(path.display().to_string(), e.to_string()))
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn state_change_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.state_change_secs)
    }

    pub fn job_wait(&self) -> JobWaitConfig {
        JobWaitConfig {
            timeout: self.timeouts.job_secs.map(Duration::from_secs),
            poll_interval: self.poll_interval(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.retry.interval_ms),
            max_attempts: self.retry.max_attempts,
        }
    }

    pub fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            poll_interval: self.poll_interval(),
            state_change_timeout: self.state_change_timeout(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    ReadError(String, String),
    #[error("Failed to parse config file '{0}': {1}")]
    ParseError(String, String),
}
