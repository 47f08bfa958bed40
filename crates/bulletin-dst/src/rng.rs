//! Deterministic RNG for simulation
//!
//! TigerStyle: ChaCha20-based RNG for reproducibility.

use bulletin_core::RngProvider;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Deterministic random number generator
///
/// Given the same seed, produces the same sequence. Drives fault injection and
/// modification-tag epochs in simulation.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    rng: Arc<Mutex<ChaCha20Rng>>,
    fork_counter: Arc<AtomicU64>,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            fork_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha20Rng) -> T) -> T {
        // A panic while holding the lock leaves the stream usable.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }

    pub fn next_u64(&self) -> u64 {
        self.with_rng(|rng| rng.gen())
    }

    pub fn next_f64(&self) -> f64 {
        self.with_rng(|rng| rng.gen())
    }

    pub fn next_bool(&self, probability: f64) -> bool {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );
        self.next_f64() < probability
    }

    /// Random value in [min, max)
    pub fn next_range(&self, min: u64, max: u64) -> u64 {
        debug_assert!(min < max, "min must be less than max");
        min + (self.next_u64() % (max - min))
    }

    pub fn next_index(&self, len: usize) -> usize {
        debug_assert!(len > 0, "length must be positive");
        (self.next_u64() as usize) % len
    }

    pub fn shuffle<T>(&self, slice: &mut [T]) {
        self.with_rng(|rng| {
            for i in (1..slice.len()).rev() {
                let j = rng.gen_range(0..=i);
                slice.swap(i, j);
            }
        });
    }

    pub fn choose<'a, T>(&self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            Some(&slice[self.next_index(slice.len())])
        }
    }

    /// Independent stream seeded deterministically from this one
    pub fn fork(&self) -> Self {
        let fork_id = self.fork_counter.fetch_add(1, Ordering::SeqCst);
        let fork_seed = self
            .seed
            .wrapping_add(fork_id)
            .wrapping_mul(0x9E3779B97F4A7C15);
        Self::new(fork_seed)
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RngProvider for DeterministicRng {
    fn next_u64(&self) -> u64 {
        DeterministicRng::next_u64(self)
    }

    fn next_f64(&self) -> f64 {
        DeterministicRng::next_f64(self)
    }
}
