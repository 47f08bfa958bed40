//! Crash restart policy
//!
//! TigerStyle: Bounded backoff, explicit thresholds.
//!
//! The first `immediate_restarts` crashes are restarted right away. After that
//! a Crashed record waits `backoff_min_ms * 2^(crash_count - immediate_restarts)`
//! capped at `backoff_max_ms`, and once `max_restart_attempts` is reached the
//! instance stays Crashed for good.

use crate::config::RestartConfig;
use crate::lrp::{ActualLrp, ActualLrpState};

/// Restart decisions made by the store when recording a crash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    immediate_restarts: i32,
    max_restart_attempts: i32,
    backoff_min_ms: u64,
    backoff_max_ms: u64,
    crash_reset_timeout_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&RestartConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(config: &RestartConfig) -> Self {
        debug_assert!(config.immediate_restarts >= 0);
        debug_assert!(config.backoff_max_ms >= config.backoff_min_ms);

        Self {
            immediate_restarts: config.immediate_restarts,
            max_restart_attempts: config.max_restart_attempts,
            backoff_min_ms: config.backoff_min_ms,
            backoff_max_ms: config.backoff_max_ms,
            crash_reset_timeout_ms: config.crash_reset_timeout_ms,
        }
    }

    /// Crash count after `lrp` crashes at `now_ms`
    pub fn next_crash_count(&self, lrp: &ActualLrp, now_ms: u64) -> i32 {
        let ran_long_enough = lrp.state == ActualLrpState::Running
            && now_ms.saturating_sub(lrp.since) > self.crash_reset_timeout_ms;

        if ran_long_enough {
            1
        } else {
            lrp.crash_count.saturating_add(1)
        }
    }

    pub fn should_restart_immediately(&self, crash_count: i32) -> bool {
        crash_count < self.immediate_restarts
    }

    /// Delay before a Crashed record with `crash_count` may be restarted
    pub fn backoff_ms(&self, crash_count: i32) -> u64 {
        if crash_count < self.immediate_restarts {
            return 0;
        }

        let exponent = (crash_count - self.immediate_restarts) as u32;
        // 2^32 overflows long before any realistic cap
        let multiplier = 1u64.checked_shl(exponent.min(32)).unwrap_or(u64::MAX);
        self.backoff_min_ms
            .saturating_mul(multiplier)
            .min(self.backoff_max_ms)
    }

    /// Whether convergence should restart a Crashed record now
    pub fn should_restart_crashed(&self, crash_count: i32, since_ms: u64, now_ms: u64) -> bool {
        if self.should_restart_immediately(crash_count) {
            return true;
        }
        if crash_count >= self.max_restart_attempts {
            return false;
        }
        now_ms.saturating_sub(since_ms) >= self.backoff_ms(crash_count)
    }
}
