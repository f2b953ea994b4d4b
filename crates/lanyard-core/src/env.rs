//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples protocol logic from system resources
//! (time, randomness, sleeping). This enables:
//!
//! - Deterministic Testing: the harness provides a seeded RNG and a manual
//!   clock, allowing perfect bug reproduction.
//!
//! - Production Runtime: Tokio implementations use real system resources
//!   without any code changes to the protocol logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time, randomness, and async primitives.
///
/// This trait is the foundation of the sans-IO architecture. It allows the
/// endpoint state machines to be completely deterministic and testable.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production (it feeds nonces, session keys, and connection epochs)
/// 3. Minimal panics: Methods are infallible except in exceptional
///    circumstances (e.g., OS entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current monotonic time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: This method MUST return values that never decrease
    ///   within a single execution context. Subsequent calls must return
    ///   times >= previous calls.
    fn now(&self) -> Instant;

    /// Returns the wall clock as milliseconds since the Unix epoch.
    ///
    /// Used only to stamp the `ts` field of outbound envelopes. Unlike
    /// [`Environment::now`], this value may jump when the system clock is
    /// adjusted; nothing in the protocol depends on it advancing.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be
    /// used by driver code (not protocol logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Determinism during simulations: Given the same RNG seed, this
    ///   produces the same sequence of bytes
    /// - Unpredictability in production: Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// This is a convenience method for common use cases like generating
    /// connection epochs or pairing codes.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
