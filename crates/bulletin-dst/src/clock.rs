//! Deterministic clock for simulation
//!
//! TigerStyle: Explicit time control, no system time dependencies.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Deterministic simulation clock
///
/// Time only advances when told to. Stale-unclaimed detection, crash backoff
/// and `since` stamps in the store all read this clock in simulation.
#[derive(Debug, Clone)]
pub struct SimClock {
    current_time_ms: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl SimClock {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self::from_millis(start_time.timestamp_millis().max(0) as u64)
    }

    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let ms = self.current_time_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms as i64)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    pub fn advance(&self, duration: Duration) {
        debug_assert!(duration >= Duration::zero(), "cannot go back in time");
        self.advance_ms(duration.num_milliseconds().max(0) as u64);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until someone else advances the clock past `ms` from now
    pub async fn sleep_ms(&self, ms: u64) {
        let target_ms = self.now_ms() + ms;
        while self.now_ms() < target_ms {
            self.notify.notified().await;
        }
    }

    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }
}

impl Default for SimClock {
    /// 2024-01-01 00:00:00 UTC
    fn default() -> Self {
        Self::from_millis(1_704_067_200_000)
    }
}
