//! Client driver configuration.
//!
//! Values can be overridden through environment variables:
//! - `TASKBOARD_MUTATION_TIMEOUT_MS` - mutation round-trip timeout. Defaults to `10000`.
//! - `TASKBOARD_QUEUE_CAPACITY` - bounded command queue size. Defaults to `64`.
//! - `TASKBOARD_RECONNECT_DELAY_MS` - wait before resubscribing after a stream ends. Defaults to `1000`.
//! - `TASKBOARD_LOG_LEVEL` - `trace|debug|info|warn|error`. Defaults to the build-mode level.

use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const ENV_MUTATION_TIMEOUT_MS: &str = "TASKBOARD_MUTATION_TIMEOUT_MS";
pub const ENV_QUEUE_CAPACITY: &str = "TASKBOARD_QUEUE_CAPACITY";
pub const ENV_RECONNECT_DELAY_MS: &str = "TASKBOARD_RECONNECT_DELAY_MS";
pub const ENV_LOG_LEVEL: &str = "TASKBOARD_LOG_LEVEL";

const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable is set but not parseable or out of range.
    InvalidValue { name: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, value } => {
                write!(f, "invalid value for {name}: `{value}`")
            }
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Time allowed for one mutation before it is rolled back.
    pub mutation_timeout: Duration,
    pub command_queue_capacity: usize,
    pub reconnect_delay: Duration,
    pub log_level: &'static str,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
            command_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads overrides through `lookup`; unset names keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MUTATION_TIMEOUT_MS) {
            config.mutation_timeout =
                Duration::from_millis(parse_positive(ENV_MUTATION_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_QUEUE_CAPACITY) {
            config.command_queue_capacity = usize::try_from(parse_positive(ENV_QUEUE_CAPACITY, &value)?)
                .map_err(|_| invalid(ENV_QUEUE_CAPACITY, &value))?;
        }
        if let Some(value) = lookup(ENV_RECONNECT_DELAY_MS) {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(ENV_RECONNECT_DELAY_MS, &value))?;
            config.reconnect_delay = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            config.log_level = normalize_level(&value).map_err(|_| invalid(ENV_LOG_LEVEL, &value))?;
        }

        Ok(config)
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(invalid(name, value)),
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, ConfigError, ENV_LOG_LEVEL, ENV_MUTATION_TIMEOUT_MS, ENV_QUEUE_CAPACITY};
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_variables_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_MUTATION_TIMEOUT_MS, "250"),
            (ENV_QUEUE_CAPACITY, " 8 "),
            (ENV_LOG_LEVEL, "WARNING"),
        ]))
        .unwrap();
        assert_eq!(config.mutation_timeout, Duration::from_millis(250));
        assert_eq!(config.command_queue_capacity, 8);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_MUTATION_TIMEOUT_MS, "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name, .. } if name == ENV_MUTATION_TIMEOUT_MS
        ));
    }

    #[test]
    fn queue_capacity_beyond_usize_is_rejected() {
        let too_big = (u128::from(u64::MAX) + 1).to_string();
        let err = ClientConfig::from_lookup(lookup(&[(ENV_QUEUE_CAPACITY, too_big.as_str())])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name, .. } if name == ENV_QUEUE_CAPACITY
        ));
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_QUEUE_CAPACITY, "0")])).is_err());

        let max = u64::MAX.to_string();
        let parsed = ClientConfig::from_lookup(lookup(&[(ENV_QUEUE_CAPACITY, max.as_str())]));
        assert_eq!(parsed.is_ok(), usize::try_from(u64::MAX).is_ok());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_LOG_LEVEL, "verbose")])).is_err());
    }
}
