//! Lanyard wire protocol types.
//!
//! This crate defines the plaintext shapes both peers must agree on: the
//! [`Envelope`] exchanged inside encrypted frames, the typed payloads for
//! handshake and pairing, the relay's plaintext control messages, and the
//! AAD string that binds every frame to its connection context.
//!
//! Everything here is pure data. Encryption lives in `lanyard-crypto`;
//! connection state lives in `lanyard-core`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aad;
pub mod control;
pub mod envelope;
pub mod error;
pub mod payloads;

pub use aad::{DOMAIN_TAG, build_aad};
pub use control::{CloseCode, PeerStatus, RelayControl};
pub use envelope::{Direction, Envelope, MessageKind, raw_payload};
pub use error::ProtoError;
pub use payloads::{ERR_VERSION_MISMATCH, ErrorInfo, Hello, HelloAck, Pair, PairAck};

/// Legacy protocol version without epoch binding.
pub const PROTOCOL_V1: u8 = 1;

/// Current protocol version. Binds a per-connection epoch into the AAD.
pub const PROTOCOL_V2: u8 = 2;

/// Versions a client offers in its `HELLO`, least-preferred first.
///
/// The host picks by its own preference order, so the order here only
/// documents what the client is willing to speak.
pub const OFFERED_PROTOCOLS: [u8; 2] = [PROTOCOL_V1, PROTOCOL_V2];
