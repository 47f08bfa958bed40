//! TigerStyle constants for Bulletin
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Record Limits
// =============================================================================

/// Maximum length of a process guid in bytes
pub const PROCESS_GUID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a domain name in bytes
pub const DOMAIN_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a cell ID in bytes
pub const CELL_ID_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of instances a single desired LRP may request
pub const DESIRED_LRP_INSTANCES_COUNT_MAX: i32 = 100_000;

/// Maximum length of a crash or placement error message in bytes
pub const ERROR_MESSAGE_LENGTH_BYTES_MAX: usize = 1024;

// =============================================================================
// Lifecycle
// =============================================================================

/// Default number of attempts made to retire a single actual LRP
pub const RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_DEFAULT: u32 = 5;

/// Maximum configurable retire attempts
pub const RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_MAX: u32 = 100;

// =============================================================================
// Crash Restart Policy
// =============================================================================

/// Crashes restarted without any backoff
pub const CRASH_IMMEDIATE_RESTARTS_COUNT_DEFAULT: i32 = 3;

/// Crash count at which an instance is never restarted again
pub const CRASH_RESTART_ATTEMPTS_COUNT_MAX: i32 = 200;

/// Minimum backoff after the immediate restarts are used up (30 sec)
pub const CRASH_BACKOFF_MS_MIN: u64 = 30 * 1000;

/// Backoff ceiling (16 min)
pub const CRASH_BACKOFF_MS_MAX: u64 = 16 * 60 * 1000;

/// A running instance older than this starts its crash count over (5 min)
pub const CRASH_RESET_TIMEOUT_MS: u64 = 5 * 60 * 1000;

// =============================================================================
// Convergence
// =============================================================================

/// Default interval between convergence passes (30 sec)
pub const CONVERGENCE_INTERVAL_MS_DEFAULT: u64 = 30 * 1000;

/// Minimum interval between convergence passes (100 ms)
pub const CONVERGENCE_INTERVAL_MS_MIN: u64 = 100;

/// Default size of the convergence worker pool
pub const CONVERGENCE_WORKERS_COUNT_DEFAULT: usize = 20;

/// Maximum size of the convergence worker pool
pub const CONVERGENCE_WORKERS_COUNT_MAX: usize = 1000;

/// Unclaimed records older than this are re-auctioned (30 sec)
pub const STALE_UNCLAIMED_ACTUAL_LRP_MS_DEFAULT: u64 = 30 * 1000;

// =============================================================================
// Events
// =============================================================================

/// Default per-subscriber event buffer
pub const EVENT_SUBSCRIBER_BUFFER_COUNT_DEFAULT: usize = 1024;

/// Maximum per-subscriber event buffer
pub const EVENT_SUBSCRIBER_BUFFER_COUNT_MAX: usize = 1_000_000;

/// Maximum concurrent subscribers per hub
pub const EVENT_SUBSCRIBERS_COUNT_MAX: usize = 10_000;

// =============================================================================
// DST Limits
// =============================================================================

/// Maximum simulated time in milliseconds (24 hours)
pub const DST_TIME_MS_MAX: u64 = 24 * 60 * 60 * 1000;

/// Default fault injection probability
pub const DST_FAULT_PROBABILITY_DEFAULT: f64 = 0.01;

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total convergence passes (counter)
pub const METRIC_NAME_CONVERGENCE_RUNS_TOTAL: &str = "bulletin_convergence_runs_total";

/// Metric: Convergence pass duration in seconds (histogram)
pub const METRIC_NAME_CONVERGENCE_DURATION_SECONDS: &str = "bulletin_convergence_duration_seconds";

/// Metric: Convergence passes aborted by an unrecoverable store error (counter)
pub const METRIC_NAME_CONVERGENCE_UNRECOVERABLE_TOTAL: &str =
    "bulletin_convergence_unrecoverable_total";

/// Metric: Keys per convergence category in the last pass (gauge, labels: category)
pub const METRIC_NAME_CONVERGENCE_KEYS_COUNT: &str = "bulletin_convergence_keys_count";

/// Metric: Total actual LRP crashes (counter)
pub const METRIC_NAME_LRP_CRASHES_TOTAL: &str = "bulletin_lrp_crashes_total";

/// Metric: Total failed retirements (counter)
pub const METRIC_NAME_LRP_RETIRE_FAILURES_TOTAL: &str = "bulletin_lrp_retire_failures_total";

/// Metric: Total start requests submitted to the auctioneer (counter, labels: status)
pub const METRIC_NAME_AUCTION_REQUESTS_TOTAL: &str = "bulletin_auction_requests_total";

/// Metric: Total events published (counter, labels: stream)
pub const METRIC_NAME_EVENTS_EMITTED_TOTAL: &str = "bulletin_events_emitted_total";

/// Metric: Current event subscribers (gauge, labels: stream)
pub const METRIC_NAME_EVENT_SUBSCRIBERS_COUNT: &str = "bulletin_event_subscribers_count";

/// Metric: Subscribers dropped for falling behind (counter)
pub const METRIC_NAME_EVENT_SUBSCRIBERS_DROPPED_TOTAL: &str =
    "bulletin_event_subscribers_dropped_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_DEFAULT >= 1);
    assert!(RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_DEFAULT <= RETIRE_ACTUAL_LRP_RETRY_ATTEMPTS_MAX);
    assert!(CRASH_BACKOFF_MS_MAX > CRASH_BACKOFF_MS_MIN);
    assert!(CRASH_RESTART_ATTEMPTS_COUNT_MAX > CRASH_IMMEDIATE_RESTARTS_COUNT_DEFAULT);
    assert!(CONVERGENCE_WORKERS_COUNT_DEFAULT <= CONVERGENCE_WORKERS_COUNT_MAX);
    assert!(CONVERGENCE_INTERVAL_MS_DEFAULT >= CONVERGENCE_INTERVAL_MS_MIN);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_have_units_in_names() {
        let _: usize = PROCESS_GUID_LENGTH_BYTES_MAX;
        let _: u64 = CRASH_BACKOFF_MS_MAX;
        let _: usize = CONVERGENCE_WORKERS_COUNT_MAX;
    }

    #[test]
    fn test_backoff_ceiling_is_reachable() {
        // 30s * 2^5 = 16 min
        assert_eq!(CRASH_BACKOFF_MS_MIN * 32, CRASH_BACKOFF_MS_MAX);
    }
}
