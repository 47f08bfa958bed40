//! Simulated time provider
//!
//! TigerStyle: Sleeps advance the clock instead of waiting on it.
//!
//! The store and the convergence runner take an `Arc<dyn TimeProvider>`. In
//! simulation they get `SimTime`, so a runner interval passes instantly and
//! deterministically.

use crate::clock::SimClock;
use async_trait::async_trait;
use bulletin_core::TimeProvider;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SimTime {
    clock: Arc<SimClock>,
}

impl SimTime {
    pub fn new(clock: Arc<SimClock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }
}

#[async_trait]
impl TimeProvider for SimTime {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        self.clock.advance_ms(ms);
        // Without a yield a runner loop would never let other tasks in.
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_time_sleep_advances_clock() {
        let clock = Arc::new(SimClock::from_millis(1_000));
        let time = SimTime::new(clock.clone());

        time.sleep_ms(30_000).await;
        assert_eq!(time.now_ms(), 31_000);
        assert_eq!(clock.now_ms(), 31_000);
    }
}
