//! Engine configuration, from code or from the environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use accord_observability::ObservabilityConfig;

use crate::cache::{CacheConfig, MAX_CACHE_STALENESS};
use crate::decision_log::DecisionLogConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("cache ttl {0:?} exceeds the staleness bound")]
    StalenessTooLarge(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub decision_log: DecisionLogConfig,
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_decision_log(mut self, decision_log: DecisionLogConfig) -> Self {
        self.decision_log = decision_log;
        self
    }

    pub fn with_observability(mut self, observability: ObservabilityConfig) -> Self {
        self.observability = observability;
        self
    }

    /// Install the process-wide `tracing` subscriber. Idempotent.
    pub fn init_tracing(&self) {
        accord_observability::init_with(&self.observability);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        if self.decision_log.buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "decision_log.buffer_capacity",
                reason: "must be positive".to_string(),
            });
        }
        if self.decision_log.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "decision_log.batch_size",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Read `ACCORD_*` variables (and `RUST_LOG`) over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary source.
    ///
    /// A cache TTL above the staleness bound is clamped with a warning;
    /// unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "ACCORD_CACHE_TTL_MS")? {
            let ttl = Duration::from_millis(ms);
            config.cache.ttl = if ttl > MAX_CACHE_STALENESS {
                tracing::warn!(
                    requested_ms = ms,
                    max_ms = MAX_CACHE_STALENESS.as_millis() as u64,
                    "ACCORD_CACHE_TTL_MS clamped to staleness bound"
                );
                MAX_CACHE_STALENESS
            } else {
                ttl
            };
        }
        if let Some(n) = parse::<usize>(&lookup, "ACCORD_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = n;
        }
        if let Some(enabled) = parse::<bool>(&lookup, "ACCORD_CACHE_ENABLED")? {
            config.cache.enabled = enabled;
        }
        if let Some(n) = parse::<usize>(&lookup, "ACCORD_LOG_BUFFER")? {
            config.decision_log.buffer_capacity = n;
        }
        if let Some(ms) = parse::<u64>(&lookup, "ACCORD_LOG_FLUSH_MS")? {
            config.decision_log.flush_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&lookup, "ACCORD_LOG_BATCH")? {
            config.decision_log.batch_size = n;
        }
        if let Some(filter) = lookup("RUST_LOG") {
            config.observability = config.observability.with_default_filter(filter);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("'{raw}': {e}"),
        }),
    }
}
