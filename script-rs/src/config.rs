//! Engine configuration.
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `SCRIPT_QUIET` | discard the log of sections that succeeded | `false` |
//! | `SCRIPT_RETRY_INTERVAL` | first backoff delay of a section retry | `100ms` |
//! | `SCRIPT_MAX_RETRY_INTERVAL` | cap on the backoff delay | `500ms` |
//!
//! Durations use humantime syntax (`250ms`, `1s`, `1m 30s`).

use std::time::Duration;

use crate::script::backoff::Backoff;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_millis(500);

const QUIET_KEY: &str = "SCRIPT_QUIET";
const RETRY_INTERVAL_KEY: &str = "SCRIPT_RETRY_INTERVAL";
const MAX_RETRY_INTERVAL_KEY: &str = "SCRIPT_MAX_RETRY_INTERVAL";

// ── Public API ────────────────────────────────────────────────────────────────

/// An unparsable configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{key}: {message}")]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Log only the headers of sections that succeed.
    pub quiet: bool,
    /// Zero means [`DEFAULT_RETRY_INTERVAL`].
    pub retry_interval: Duration,
    /// Zero means [`DEFAULT_MAX_RETRY_INTERVAL`].
    pub max_retry_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retry_interval: DEFAULT_MAX_RETRY_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`.  Missing keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(QUIET_KEY) {
            config.quiet = parse_bool(QUIET_KEY, &v)?;
        }
        if let Some(v) = lookup(RETRY_INTERVAL_KEY) {
            config.retry_interval = parse_duration(RETRY_INTERVAL_KEY, &v)?;
        }
        if let Some(v) = lookup(MAX_RETRY_INTERVAL_KEY) {
            config.max_retry_interval = parse_duration(MAX_RETRY_INTERVAL_KEY, &v)?;
        }
        Ok(config)
    }

    /// The effective (non-zero) retry intervals.  The initial interval never
    /// exceeds the maximum.
    pub fn retry_intervals(&self) -> (Duration, Duration) {
        let max = non_zero(self.max_retry_interval, DEFAULT_MAX_RETRY_INTERVAL);
        let initial = non_zero(self.retry_interval, DEFAULT_RETRY_INTERVAL).min(max);
        (initial, max)
    }

    /// A fresh backoff sequence for one retry loop.
    pub fn backoff(&self) -> Backoff {
        let (initial, max) = self.retry_intervals();
        Backoff::new(initial, max)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn non_zero(d: Duration, default: Duration) -> Duration {
    if d.is_zero() {
        default
    } else {
        d
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError { key: key.to_owned(), message: format!("not a boolean: {value:?}") }),
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError { key: key.to_owned(), message: format!("{value:?}: {e}") })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
