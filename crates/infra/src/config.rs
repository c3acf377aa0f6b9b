//! Runtime configuration loaded from `TASKFORGE_*` environment variables.

use std::time::Duration;

use thiserror::Error;

use taskforge_observability::{LogFormat, ObservabilityConfig};

pub const STEP_TIMEOUT_MS: &str = "TASKFORGE_STEP_TIMEOUT_MS";
pub const INVITATION_TTL_HOURS: &str = "TASKFORGE_INVITATION_TTL_HOURS";
pub const LOG_FORMAT: &str = "TASKFORGE_LOG_FORMAT";
pub const LOG_FILTER: &str = "TASKFORGE_LOG_FILTER";

const DEFAULT_STEP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_INVITATION_TTL_HOURS: i64 = 168;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Bound applied to every storage step inside a flow.
    pub step_timeout: Duration,
    pub invitation_ttl: chrono::Duration,
    pub observability: ObservabilityConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS),
            invitation_ttl: chrono::Duration::hours(DEFAULT_INVITATION_TTL_HOURS),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Parse `key` with `parse`, falling back to `default` (with a warning) when
/// the value is present but unusable.
fn parsed_or<T, F>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T, parse: F) -> T
where
    F: FnOnce(&str) -> Option<T>,
{
    match lookup(key) {
        None => default,
        Some(raw) => parse(raw.trim()).unwrap_or_else(|| {
            tracing::warn!(key, value = %raw, "unparseable configuration value; using default");
            default
        }),
    }
}

impl CoreConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Missing keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let step_timeout = parsed_or(&lookup, STEP_TIMEOUT_MS, defaults.step_timeout, |raw| {
            raw.parse::<u64>().ok().map(Duration::from_millis)
        });
        let invitation_ttl = parsed_or(&lookup, INVITATION_TTL_HOURS, defaults.invitation_ttl, |raw| {
            raw.parse::<i64>().ok().and_then(chrono::Duration::try_hours)
        });
        let format = parsed_or(&lookup, LOG_FORMAT, LogFormat::default(), |raw| {
            raw.parse::<LogFormat>().ok()
        });
        let default_filter = lookup(LOG_FILTER)
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(defaults.observability.default_filter);

        Self {
            step_timeout,
            invitation_ttl,
            observability: ObservabilityConfig {
                default_filter,
                format,
            },
        }
    }

    /// Install the process-wide subscriber described by `observability`.
    pub fn init_observability(&self) {
        taskforge_observability::init_with(&self.observability);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_timeout.is_zero() {
            return Err(ConfigError::Invalid(format!("{STEP_TIMEOUT_MS} must be greater than zero")));
        }
        if self.invitation_ttl <= chrono::Duration::zero() {
            return Err(ConfigError::Invalid(format!(
                "{INVITATION_TTL_HOURS} must be greater than zero"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> CoreConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CoreConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.step_timeout, Duration::from_secs(5));
        assert_eq!(config.invitation_ttl, chrono::Duration::days(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_every_variable() {
        let config = from_pairs(&[
            (STEP_TIMEOUT_MS, "250"),
            (INVITATION_TTL_HOURS, "24"),
            (LOG_FORMAT, "pretty"),
            (LOG_FILTER, "taskforge=debug"),
        ]);
        assert_eq!(config.step_timeout, Duration::from_millis(250));
        assert_eq!(config.invitation_ttl, chrono::Duration::hours(24));
        assert_eq!(config.observability.format, LogFormat::Pretty);
        assert_eq!(config.observability.default_filter, "taskforge=debug");
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = from_pairs(&[(STEP_TIMEOUT_MS, "soon"), (LOG_FORMAT, "xml")]);
        assert_eq!(config.step_timeout, Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS));
        assert_eq!(config.observability.format, LogFormat::Json);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = from_pairs(&[(STEP_TIMEOUT_MS, "0")]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn logging_can_be_initialised_twice() {
        let config = from_pairs(&[(LOG_FORMAT, "pretty")]);
        config.init_observability();
        config.init_observability();
    }
}
