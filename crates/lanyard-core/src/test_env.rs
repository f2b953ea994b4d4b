//! Deterministic environment for in-crate unit tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crate::env::Environment;

/// Future that completes immediately, so tests never actually sleep.
pub struct ImmediateFuture;

impl std::future::Future for ImmediateFuture {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::task::Poll::Ready(())
    }
}

/// Deterministic environment: a counter-fed RNG and a ticking wall clock.
///
/// Every `random_bytes` call draws fresh values, so consecutive nonces and
/// epochs always differ, while a given call sequence is fully reproducible.
#[derive(Clone, Default)]
pub struct TestEnv {
    rng_state: Arc<AtomicU64>,
    clock_millis: Arc<AtomicU64>,
}

impl Environment for TestEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        self.clock_millis.fetch_add(1, Ordering::Relaxed)
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        ImmediateFuture
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let draw = self
                .rng_state
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1)
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .to_be_bytes();
            for (byte, source) in chunk.iter_mut().zip(draw.iter()) {
                *byte = *source;
            }
        }
    }
}
