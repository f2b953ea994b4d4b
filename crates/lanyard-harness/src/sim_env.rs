//! Seeded deterministic [`Environment`].

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use lanyard_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic environment: a seeded ChaCha RNG and a manual wall clock.
///
/// Two instances built from the same seed produce identical byte sequences,
/// so every nonce, epoch, key, and pairing code a test run generates is
/// reproducible. The wall clock ticks one millisecond per `unix_millis`
/// call, which keeps envelope timestamps distinct without real time, and
/// can be jumped forward with [`SimEnv::advance`].
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    clock_millis: Arc<AtomicU64>,
}

impl SimEnv {
    /// Creates an environment seeded for reproducibility.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            clock_millis: Arc::new(AtomicU64::new(1_700_000_000_000)),
        }
    }

    /// Jumps the wall clock forward.
    pub fn advance(&self, delta: Duration) {
        let millis = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX);
        self.clock_millis.fetch_add(millis, Ordering::Relaxed);
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        self.clock_millis.fetch_add(1, Ordering::Relaxed)
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        // Virtual time: sleeps complete immediately.
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
