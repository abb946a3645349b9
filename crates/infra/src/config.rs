//! Environment-driven configuration.
//!
//! Absent variables fall back to defaults; present-but-invalid values are errors so a
//! typo never silently runs the publisher with unintended settings.

use std::time::Duration;

use crate::outbox::RetryPolicy;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Outbox publisher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// Interval between ticks.
    pub poll_interval: Duration,
    /// Maximum rows claimed per tick.
    pub batch_size: usize,
    /// Failed attempts after which a row is dead-lettered.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the random jitter, as a fraction of the backoff (0.1 = 0–10%).
    pub jitter: f64,
    /// Maximum stored length of `last_error`, in characters.
    pub error_cap: usize,
    /// Deadline for one acknowledged send.
    pub send_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
            max_retries: 10,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            jitter: 0.1,
            error_cap: 2000,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl PublisherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: self.base_backoff,
            max_backoff: self.max_backoff,
            jitter: self.jitter,
            error_cap: self.error_cap,
        }
    }

    /// Read `OUTBOX_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            poll_interval: parse_millis(&lookup, "OUTBOX_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            batch_size: parse_var(&lookup, "OUTBOX_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            max_retries: parse_var(&lookup, "OUTBOX_MAX_RETRIES")?
                .unwrap_or(defaults.max_retries),
            base_backoff: parse_millis(&lookup, "OUTBOX_BASE_BACKOFF_MS")?
                .unwrap_or(defaults.base_backoff),
            max_backoff: parse_millis(&lookup, "OUTBOX_MAX_BACKOFF_MS")?
                .unwrap_or(defaults.max_backoff),
            send_timeout: parse_millis(&lookup, "OUTBOX_SEND_TIMEOUT_MS")?
                .unwrap_or(defaults.send_timeout),
            ..defaults
        };

        if config.batch_size == 0 {
            return Err(invalid("OUTBOX_BATCH_SIZE", "0", "must be at least 1"));
        }
        if config.max_retries == 0 {
            return Err(invalid("OUTBOX_MAX_RETRIES", "0", "must be at least 1"));
        }
        if config.max_backoff < config.base_backoff {
            return Err(invalid(
                "OUTBOX_MAX_BACKOFF_MS",
                &config.max_backoff.as_millis().to_string(),
                "must not be below OUTBOX_BASE_BACKOFF_MS",
            ));
        }
        Ok(config)
    }
}

/// Process configuration of the `mrp-api` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    /// Partition streams are named `<prefix>:<n>`.
    pub stream_prefix: String,
    pub partitions: usize,
    pub consumer_group: String,
    pub consumer_name: String,
    pub http_addr: String,
    pub run_publisher: bool,
    pub run_projections: bool,
    pub publisher: PublisherConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let partitions = parse_var(&lookup, "EVENT_PARTITIONS")?.unwrap_or(8);
        if partitions == 0 {
            return Err(invalid("EVENT_PARTITIONS", "0", "must be at least 1"));
        }

        Ok(Self {
            database_url,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".into()),
            stream_prefix: lookup("EVENT_STREAM_PREFIX").unwrap_or_else(|| "mrp:events".into()),
            partitions,
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or_else(|| "mrp.projections".into()),
            consumer_name: lookup("CONSUMER_NAME").unwrap_or_else(|| "projection-1".into()),
            http_addr: lookup("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            run_publisher: parse_flag(&lookup, "RUN_PUBLISHER")?.unwrap_or(true),
            run_projections: parse_flag(&lookup, "RUN_PROJECTIONS")?.unwrap_or(true),
            publisher: PublisherConfig::from_lookup(&lookup)?,
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(var, &raw, e.to_string())),
    }
}

fn parse_millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<F, u64>(lookup, var)?.map(Duration::from_millis))
}

fn parse_flag<F>(lookup: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(var, &raw, "expected a boolean")),
        },
    }
}
