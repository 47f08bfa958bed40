//! I/O providers for time and randomness
//!
//! TigerStyle: All non-deterministic inputs go through a provider trait.
//!
//! The store stamps `since` and modification-tag epochs through these traits and
//! the convergence runner sleeps through them, so the same controller code runs
//! against the wall clock in production and against a simulated clock in DST.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Source of the current time and of sleeps
///
/// - `WallClockTime`: production
/// - `SimClock` (in bulletin-dst): manually advanced
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);

    /// Monotonic timestamp for measuring durations
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Production time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Source of randomness
///
/// - `StdRngProvider`: production
/// - `DeterministicRng` (in bulletin-dst): seeded, reproducible
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64
    fn next_u64(&self) -> u64;

    /// Generate a random f64 in [0, 1)
    fn next_f64(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a random v4 UUID string, used for modification-tag epochs
    fn gen_uuid(&self) -> String {
        let high = self.next_u64();
        let low = self.next_u64();

        let time_low = (high >> 32) as u32;
        let time_mid = ((high >> 16) & 0xffff) as u16;
        let time_hi = ((high & 0x0fff) | 0x4000) as u16;
        let clock_seq = (((low >> 48) & 0x3fff) | 0x8000) as u16;
        let node = low & 0xffff_ffff_ffff;

        format!(
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            time_low, time_mid, time_hi, clock_seq, node
        )
    }
}

/// Production RNG provider (xorshift64*, lock-free)
///
/// Not cryptographically secure.
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Create a new RNG provider seeded from system time
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }

    /// Create with specific seed
    pub fn with_seed(seed: u64) -> Self {
        // xorshift never leaves zero
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self {
            state: AtomicU64::new(seed),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;

            match self
                .state
                .compare_exchange_weak(state, x, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return x.wrapping_mul(0x2545F4914F6CDD1D),
                Err(s) => state = s,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of the I/O providers handed to the store and the runner
#[derive(Clone)]
pub struct IoContext {
    pub time: Arc<dyn TimeProvider>,
    pub rng: Arc<dyn RngProvider>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Wall clock and system-seeded RNG
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_time_now_ms() {
        let clock = WallClockTime::new();
        let now = clock.now_ms();

        // After Jan 1, 2020
        assert!(now > 1577836800000);
        assert!(clock.now_ms() >= now);
    }

    #[test]
    fn test_std_rng_provider_deterministic_with_seed() {
        let rng1 = StdRngProvider::with_seed(12345);
        let rng2 = StdRngProvider::with_seed(12345);
        assert_eq!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_gen_uuid_format() {
        let rng = StdRngProvider::with_seed(42);
        let uuid = rng.gen_uuid();

        assert_eq!(uuid.len(), 36);
        assert_eq!(&uuid[8..9], "-");
        assert_eq!(&uuid[13..14], "-");
        assert_eq!(&uuid[14..15], "4");
        assert_eq!(&uuid[18..19], "-");
        assert_eq!(&uuid[23..24], "-");
    }

    #[test]
    fn test_zero_seed_still_advances() {
        let rng = StdRngProvider::with_seed(0);
        assert_ne!(rng.next_u64(), 0);
    }
}
