//! Fuzz target for the host connection machine
//!
//! Drive [`HostMachine`] with event sequences mixing well-formed traffic,
//! replays, raw garbage, and connection resets.
//!
//! # Strategy
//!
//! - Event sequences: handshakes, pairing attempts, RPC, keepalives,
//!   graceful closes, in arbitrary order
//! - A shadow client channel produces genuinely decryptable frames, kept
//!   in sync with the machine's negotiated context
//! - Garbage frames and verbatim replays exercise the reject paths
//! - Resets model relay-reported client reattachment mid-stream
//!
//! # Invariants
//!
//! - NEVER panic, whatever the event order
//! - `WaitHello -> Ready` happens only on a `HELLO` event
//! - The pairing gate opens only on the correct code
//! - A rejected frame leaves handshake state and the pairing gate unchanged
//! - Every error on the receive path is non-fatal (only seal failures are)
//! - A frame the machine already admitted is never admitted again

#![no_main]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use lanyard_core::{
    Channel, ChannelState, Environment, HostAction, HostConfig, HostError, HostMachine, Session,
};
use lanyard_proto::{Hello, MessageKind, Pair, raw_payload};
use libfuzzer_sys::fuzz_target;

/// Deterministic environment: a counter-derived RNG and clock.
#[derive(Clone)]
struct FuzzEnv {
    counter: Arc<AtomicU64>,
}

impl FuzzEnv {
    fn new(seed: u64) -> Self {
        Self { counter: Arc::new(AtomicU64::new(seed)) }
    }
}

impl Environment for FuzzEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let word = self
                .counter
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .to_le_bytes();
            for (byte, src) in chunk.iter_mut().zip(word) {
                *byte = src;
            }
        }
    }
}

#[derive(Debug, Arbitrary)]
enum Event {
    Hello { protocols: Vec<u8> },
    PairCorrect,
    PairWrong { code: u32 },
    Rpc { tag: u8 },
    Ping,
    CloseNotice,
    Garbage(Vec<u8>),
    ReplayLast,
    Reset,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: u64,
    allow_v1: bool,
    events: Vec<Event>,
}

fuzz_target!(|input: FuzzInput| {
    let env = FuzzEnv::new(input.seed);
    let mut session = Session::generate(&env);
    let config = HostConfig { allow_v1: input.allow_v1 };
    let mut machine = HostMachine::new(&env, &session, config);
    let mut shadow = Channel::client(session.id());

    let mut last_frame: Option<Vec<u8>> = None;
    let mut last_admitted = false;

    for event in input.events {
        let state_before = machine.state();
        let gate_before = session.pairing_required();
        let was_hello = matches!(event, Event::Hello { .. });
        let was_correct_pair = matches!(event, Event::PairCorrect);

        let frame = match &event {
            Event::Hello { protocols } => {
                // A client opening a (new) connection starts from a fresh
                // channel, whatever it had before.
                shadow = Channel::client(session.id());
                let payload = match raw_payload(&Hello {
                    client_id: None,
                    protocols: protocols.clone(),
                }) {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                seal_or_skip(&env, &session, &mut shadow, MessageKind::Hello, Some(payload))
            },
            Event::PairCorrect => {
                let payload = match raw_payload(&Pair { code: session.pairing_code().to_string() })
                {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                seal_or_skip(&env, &session, &mut shadow, MessageKind::Pair, Some(payload))
            },
            Event::PairWrong { code } => {
                let code = format!("{:06}", code % 1_000_000);
                if session.verify_pairing_code(&code) {
                    continue;
                }
                let payload = match raw_payload(&Pair { code }) {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                seal_or_skip(&env, &session, &mut shadow, MessageKind::Pair, Some(payload))
            },
            Event::Rpc { tag } => {
                let payload = match raw_payload(&serde_json::json!({"tag": tag})) {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                seal_or_skip(&env, &session, &mut shadow, MessageKind::Rpc, Some(payload))
            },
            Event::Ping => seal_or_skip(&env, &session, &mut shadow, MessageKind::Ping, None),
            Event::CloseNotice => {
                seal_or_skip(&env, &session, &mut shadow, MessageKind::Close, None)
            },
            Event::Garbage(bytes) => Some(bytes.clone()),
            Event::ReplayLast => last_frame.clone(),
            Event::Reset => {
                machine.reset(&env);
                shadow = Channel::client(session.id());
                last_frame = None;
                last_admitted = false;
                assert_eq!(machine.state(), ChannelState::WaitHello);
                continue;
            },
        };

        let Some(frame) = frame else { continue };
        let replayed = matches!(event, Event::ReplayLast);
        let result = machine.on_frame(&env, &mut session, &frame);

        match &result {
            Ok(actions) => {
                // An already-admitted frame must never be admitted again.
                assert!(!(replayed && last_admitted), "replay admitted");

                if machine.state() == ChannelState::Ready
                    && state_before == ChannelState::WaitHello
                {
                    assert!(was_hello, "became Ready without a HELLO");
                    // Mirror the negotiated context onto the shadow client.
                    shadow.set_version(machine.version());
                    shadow.set_epoch(machine.epoch().map(str::to_string));
                    shadow.mark_ready();
                }

                for action in actions {
                    if matches!(action, HostAction::Paired) {
                        assert!(was_correct_pair, "gate opened without the correct code");
                    }
                }
            },
            Err(err) => {
                // Only seal failures may be fatal, and the receive path
                // never seals before admission.
                if err.is_fatal() {
                    assert!(matches!(err, HostError::Seal(_)));
                }
                assert_eq!(machine.state(), state_before);
                assert_eq!(session.pairing_required(), gate_before);
            },
        }

        if session.pairing_required() != gate_before {
            assert!(gate_before, "pairing gate re-armed");
            assert!(was_correct_pair, "gate opened by {event:?}");
        }

        if !replayed {
            last_admitted = result.is_ok();
            last_frame = Some(frame);
        }
    }
});

/// Seals on the shadow channel, skipping frames that fail to seal.
fn seal_or_skip(
    env: &FuzzEnv,
    session: &Session,
    shadow: &mut Channel,
    kind: MessageKind,
    payload: Option<Box<serde_json::value::RawValue>>,
) -> Option<Vec<u8>> {
    shadow.seal(env, session.key(), kind, payload).ok()
}
