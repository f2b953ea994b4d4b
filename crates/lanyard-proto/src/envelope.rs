//! The logical message unit exchanged between host and client.
//!
//! An [`Envelope`] is what a frame decrypts to: routing metadata (`dir`,
//! `seq`, `epoch`) plus an opaque `payload`. The payload stays an
//! uninterpreted JSON blob at this layer; typed views live in
//! [`crate::payloads`] and only the handler that owns a message kind parses
//! it.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::value::RawValue;

use crate::error::ProtoError;

/// Message kinds carried in the envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Client's handshake offer (first message on every connection).
    Hello,
    /// Host's handshake acknowledgement with the selected version.
    HelloAck,
    /// Pairing code submission.
    Pair,
    /// Successful pairing acknowledgement.
    PairAck,
    /// Remote operation request (c2h) or its result (h2c).
    Rpc,
    /// Unsolicited host-to-client push.
    Event,
    /// Reported failure: version mismatch or rejected pairing.
    Error,
    /// Keepalive probe.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Graceful shutdown notice.
    Close,
}

/// Message direction relative to the host/client pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to host.
    C2h,
    /// Host to client.
    H2c,
}

impl Direction {
    /// String form used in the AAD and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::C2h => "c2h",
            Self::H2c => "h2c",
        }
    }

    /// The opposite direction.
    pub fn flip(self) -> Self {
        match self {
            Self::C2h => Self::H2c,
            Self::H2c => Self::C2h,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plaintext envelope, serialized as JSON inside each encrypted frame.
///
/// Invariants enforced by the connection layer, not by this type:
///
/// - `seq` on a given direction is exactly one greater than the previous
///   accepted `seq` on that direction
/// - `epoch` is present on every post-handshake message of a v2 connection
///   and matches the connection's epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version of the sender.
    pub v: u8,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message direction.
    pub dir: Direction,
    /// Per-direction sequence number, starting at 1.
    pub seq: u64,
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub ts: u64,
    /// Connection epoch, 16 hex characters (v2 post-handshake only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub epoch: Option<String>,
    /// Kind-specific payload, kept opaque at this layer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    /// Serialize to the plaintext byte form that gets encrypted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        serde_json::to_vec(self).map_err(ProtoError::Encode)
    }

    /// Parse a decrypted plaintext back into an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        serde_json::from_slice(bytes).map_err(ProtoError::Decode)
    }

    /// Parse the payload as a typed value.
    ///
    /// # Errors
    ///
    /// [`ProtoError::MissingPayload`] when the envelope carries none,
    /// [`ProtoError::Payload`] when it does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtoError> {
        let raw = self.payload.as_deref().ok_or(ProtoError::MissingPayload { kind: self.kind })?;
        serde_json::from_str(raw.get()).map_err(ProtoError::Payload)
    }
}

/// Build an opaque payload blob from a typed value.
pub fn raw_payload<T: Serialize>(value: &T) -> Result<Box<RawValue>, ProtoError> {
    serde_json::value::to_raw_value(value).map_err(ProtoError::Encode)
}
