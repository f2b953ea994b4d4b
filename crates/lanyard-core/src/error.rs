//! Error types for channels and endpoint state machines.
//!
//! The protocol's fail-silent policy is expressed through `is_fatal()`:
//! non-fatal errors mean "drop this frame, tell no one" and the owning
//! runtime logs them locally; fatal errors tear the connection down.

use lanyard_crypto::CryptoError;
use lanyard_proto::{Direction, MessageKind, ProtoError};
use thiserror::Error;

/// Errors from sealing and admitting frames on a [`crate::Channel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Decryption, authentication, or frame-shape failure.
    #[error("frame rejected: {0}")]
    Crypto(#[from] CryptoError),

    /// Plaintext did not parse as an envelope, or a payload failed to
    /// serialize.
    #[error("envelope rejected: {0}")]
    Proto(#[from] ProtoError),

    /// The envelope arrived on the wrong direction.
    #[error("direction mismatch: got {got}")]
    Direction {
        /// Direction claimed by the envelope.
        got: Direction,
    },

    /// The envelope's sequence number is not the next expected value.
    ///
    /// Covers replays (`got` <= accepted max) and gaps (`got` > expected)
    /// alike; both drop identically.
    #[error("sequence mismatch: expected {expected}, got {got}")]
    Sequence {
        /// The only sequence number that would have been admitted.
        expected: u64,
        /// Sequence number the envelope carried.
        got: u64,
    },

    /// A post-handshake v2 envelope did not echo the connection epoch.
    #[error("epoch mismatch")]
    Epoch,
}

/// Errors from parsing a share URL fragment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShareUrlError {
    /// A required fragment parameter is absent.
    #[error("share URL missing `{field}`")]
    MissingField {
        /// Name of the absent parameter.
        field: &'static str,
    },

    /// The `session` parameter is not a v4 UUID.
    #[error("share URL session id is not a v4 UUID")]
    InvalidSessionId,

    /// The `key` parameter does not decode to exactly 32 bytes.
    #[error("share URL key is not 32 base64-encoded bytes")]
    InvalidKey,
}

/// Errors from the host state machine.
#[derive(Debug, Error)]
pub enum HostError {
    /// An inbound frame failed decryption or admission. Dropped silently.
    #[error("inbound frame dropped: {0}")]
    Reject(#[source] ChannelError),

    /// An inbound payload was missing or malformed. Dropped silently.
    #[error("inbound payload dropped: {0}")]
    Payload(#[source] ProtoError),

    /// A message kind arrived that this state does not accept.
    #[error("unexpected {kind:?} message")]
    UnexpectedKind {
        /// Kind of the dropped envelope.
        kind: MessageKind,
    },

    /// A non-`PAIR` message arrived while pairing is still required.
    #[error("{kind:?} blocked by pairing gate")]
    PairingGate {
        /// Kind of the dropped envelope.
        kind: MessageKind,
    },

    /// The operation needs a ready, paired client channel.
    #[error("no ready paired client channel")]
    NotReady,

    /// Sealing an outbound frame failed.
    #[error("outbound seal failed: {0}")]
    Seal(#[source] ChannelError),
}

impl HostError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Non-fatal errors are the drop class: the frame is discarded and the
    /// connection continues. Fatal errors tear the connection down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Reject(_)
            | Self::Payload(_)
            | Self::UnexpectedKind { .. }
            | Self::PairingGate { .. }
            | Self::NotReady => false,

            Self::Seal(_) => true,
        }
    }
}

/// Errors from the client state machine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An inbound frame failed decryption or admission. Dropped silently.
    #[error("inbound frame dropped: {0}")]
    Reject(#[source] ChannelError),

    /// An inbound payload was missing or malformed. Dropped silently.
    #[error("inbound payload dropped: {0}")]
    Payload(#[source] ProtoError),

    /// A message kind arrived that this state does not accept.
    #[error("unexpected {kind:?} message")]
    UnexpectedKind {
        /// Kind of the dropped envelope.
        kind: MessageKind,
    },

    /// The acknowledgement selected a version this client never offered.
    #[error("host selected unsupported version {version}")]
    UnsupportedVersion {
        /// Version quoted by the acknowledgement.
        version: u8,
    },

    /// A v2 acknowledgement arrived without the epoch it must advertise.
    #[error("v2 acknowledgement carried no epoch")]
    MissingEpoch,

    /// The operation needs a ready (and, for traffic, paired) channel.
    #[error("channel not ready")]
    NotReady,

    /// Sealing an outbound frame failed.
    #[error("outbound seal failed: {0}")]
    Seal(#[source] ChannelError),
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Reject(_)
            | Self::Payload(_)
            | Self::UnexpectedKind { .. }
            | Self::UnsupportedVersion { .. }
            | Self::MissingEpoch
            | Self::NotReady => false,

            Self::Seal(_) => true,
        }
    }
}
