//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling backoff with a cap, reset on success.
///
/// Both endpoints run one of these around their reconnect loop. The delay
/// for attempt `n` (zero-based) is `initial * 2^n`, saturating at `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and saturating at `cap`.
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap, attempt: 0 }
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        // Clamp the shift; the cap takes over long before 2^31.
        let doublings = self.attempt.min(31);
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(1 << doublings).min(self.cap)
    }

    /// Resets the attempt counter after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
