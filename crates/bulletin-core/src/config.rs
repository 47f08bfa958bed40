//! Configuration for Bulletin
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for the bulletin board controllers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulletinConfig {
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub restart: RestartConfig,
}

impl BulletinConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.convergence.validate()?;
        self.lifecycle.validate()?;
        self.events.validate()?;
        self.restart.validate()?;
        Ok(())
    }

    /// Defaults overlaid with environment variables
    ///
    /// Reads:
    /// - `BULLETIN_CONVERGENCE_INTERVAL_MS`
    /// - `BULLETIN_CONVERGENCE_WORKERS`
    /// - `BULLETIN_RETIRE_RETRY_ATTEMPTS`
    ///
    /// A variable that is set but does not parse is a configuration error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_parse::<u64>("BULLETIN_CONVERGENCE_INTERVAL_MS")? {
            config.convergence.interval_ms = value;
        }
        if let Some(value) = env_parse::<usize>("BULLETIN_CONVERGENCE_WORKERS")? {
            config.convergence.workers_size = value;
        }
        if let Some(value) = env_parse::<u32>("BULLETIN_RETIRE_RETRY_ATTEMPTS")? {
            config.lifecycle.retire_actual_lrp_retry_attempts = value;
        }

        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::InvalidConfiguration {
                field: name.into(),
                reason: format!("cannot parse '{}'", raw),
            }),
        Err(_) => Ok(None),
    }
}

/// Convergence loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Time between convergence passes (milliseconds)
    #[serde(default = "default_convergence_interval_ms")]
    pub interval_ms: u64,

    /// Bounded worker pool size for a pass
    #[serde(default = "default_convergence_workers_size")]
    pub workers_size: usize,

    /// Age at which an Unclaimed record is re-auctioned (milliseconds)
    #[serde(default = "default_stale_unclaimed_actual_lrp_ms")]
    pub stale_unclaimed_actual_lrp_ms: u64,
}

fn default_convergence_interval_ms() -> u64 {
    CONVERGENCE_INTERVAL_MS_DEFAULT
}

fn default_convergence_workers_size() -> usize {
    CONVERGENCE_WORKERS_COUNT_DEFAULT
}

fn default_stale_unclaimed_actual_lrp_ms() -> u64 {
    STALE_UNCLAIMED_ACTUAL_LRP_MS_DEFAULT
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_convergence_interval_ms(),
            workers_size: default_convergence_workers_size(),
            stale_unclaimed_actual_lrp_ms: default_stale_unclaimed_actual_lrp_ms(),
        }
    }
}

impl ConvergenceConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_ms < CONVERGENCE_INTERVAL_MS_MIN {
            return Err(Error::InvalidConfiguration {
                field: "convergence.interval_ms".into(),
                reason: format!(
                    "{} is below minimum {}",
                    self.interval_ms, CONVERGENCE_INTERVAL_MS_MIN
                ),
            });
        }

        if self.workers_size == 0 || self.workers_size > CONVERGENCE_WORKERS_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "convergence.workers_size".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.workers_size, CONVERGENCE_WORKERS_COUNT_MAX
                ),
            });
        }

        Ok(())
    }
}

/// Lifecycle controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Attempts made by the retire loop before giving up
    #[serde(default = "default_retire_actual_lrp_retry_attempts")]
    pub retire_actual_lrp_retry_attempts: u32,
}

fn default_retire_actual_lrp_retry_attempts() -> u32 {
    RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_DEFAULT
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retire_actual_lrp_retry_attempts: default_retire_actual_lrp_retry_attempts(),
        }
    }
}

impl LifecycleConfig {
    fn validate(&self) -> Result<()> {
        if self.retire_actual_lrp_retry_attempts == 0
            || self.retire_actual_lrp_retry_attempts > RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "lifecycle.retire_actual_lrp_retry_attempts".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.retire_actual_lrp_retry_attempts, RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_MAX
                ),
            });
        }
        Ok(())
    }
}

/// Event hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before it is disconnected
    #[serde(default = "default_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,
}

fn default_subscriber_buffer_size() -> usize {
    EVENT_SUBSCRIBER_BUFFER_COUNT_DEFAULT
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_size: default_subscriber_buffer_size(),
        }
    }
}

impl EventsConfig {
    fn validate(&self) -> Result<()> {
        if self.subscriber_buffer_size == 0
            || self.subscriber_buffer_size > EVENT_SUBSCRIBER_BUFFER_COUNT_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "events.subscriber_buffer_size".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.subscriber_buffer_size, EVENT_SUBSCRIBER_BUFFER_COUNT_MAX
                ),
            });
        }
        Ok(())
    }
}

/// Crash restart policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_immediate_restarts")]
    pub immediate_restarts: i32,

    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: i32,

    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// A Running instance older than this starts its crash count over
    #[serde(default = "default_crash_reset_timeout_ms")]
    pub crash_reset_timeout_ms: u64,
}

fn default_immediate_restarts() -> i32 {
    CRASH_IMMEDIATE_RESTARTS_COUNT_DEFAULT
}

fn default_max_restart_attempts() -> i32 {
    CRASH_RESTART_ATTEMPTS_COUNT_MAX
}

fn default_backoff_min_ms() -> u64 {
    CRASH_BACKOFF_MS_MIN
}

fn default_backoff_max_ms() -> u64 {
    CRASH_BACKOFF_MS_MAX
}

fn default_crash_reset_timeout_ms() -> u64 {
    CRASH_RESET_TIMEOUT_MS
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            immediate_restarts: default_immediate_restarts(),
            max_restart_attempts: default_max_restart_attempts(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            crash_reset_timeout_ms: default_crash_reset_timeout_ms(),
        }
    }
}

impl RestartConfig {
    fn validate(&self) -> Result<()> {
        if self.immediate_restarts < 0 {
            return Err(Error::InvalidConfiguration {
                field: "restart.immediate_restarts".into(),
                reason: "must not be negative".into(),
            });
        }

        if self.max_restart_attempts <= self.immediate_restarts {
            return Err(Error::InvalidConfiguration {
                field: "restart.max_restart_attempts".into(),
                reason: "must be greater than immediate_restarts".into(),
            });
        }

        if self.backoff_max_ms < self.backoff_min_ms {
            return Err(Error::InvalidConfiguration {
                field: "restart.backoff_max_ms".into(),
                reason: "must not be below backoff_min_ms".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BulletinConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.convergence.workers_size, 20);
        assert_eq!(config.lifecycle.retire_actual_lrp_retry_attempts, 5);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = BulletinConfig::default();
        config.convergence.workers_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retire_attempts_rejected() {
        let mut config = BulletinConfig::default();
        config.lifecycle.retire_actual_lrp_retry_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retire_actual_lrp_retry_attempts"));
    }

    #[test]
    fn test_restart_backoff_order() {
        let mut config = BulletinConfig::default();
        config.restart.backoff_max_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BulletinConfig =
            serde_json::from_str(r#"{"convergence": {"workers_size": 4}}"#).unwrap();
        assert_eq!(config.convergence.workers_size, 4);
        assert_eq!(config.convergence.interval_ms, CONVERGENCE_INTERVAL_MS_DEFAULT);
        assert_eq!(
            config.events.subscriber_buffer_size,
            EVENT_SUBSCRIBER_BUFFER_COUNT_DEFAULT
        );
        assert!(config.validate().is_ok());
    }
}
