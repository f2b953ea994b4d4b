//! Relay-layer plaintext messages and close codes.
//!
//! The relay never sees inside encrypted frames; the only thing it says in
//! its own voice is a [`RelayControl`] text frame about peer attachment, or
//! a close code when it rejects a connection. Both peers consume these for
//! reconnection logic only and never feed them into the envelope codec.

use serde::{Deserialize, Serialize};

/// Attachment status of the opposite peer, as observed by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerStatus {
    /// A host socket attached to the registration.
    HostConnected,
    /// The registration's host socket detached.
    HostDisconnected,
    /// A client socket attached to the registration.
    ClientConnected,
    /// The registration's client socket detached.
    ClientDisconnected,
}

/// Plaintext control frame emitted by the relay as a WebSocket text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayControl {
    /// Peer attach/detach notification.
    RelayStatus {
        /// What happened to the opposite peer.
        status: PeerStatus,
    },
}

impl RelayControl {
    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(self) -> String {
        // A two-field tagged enum over plain data cannot fail to serialize.
        serde_json::to_string(&self).unwrap_or_default()
    }

    /// Parse a relay text frame. Returns `None` for anything unrecognized,
    /// which callers treat as a frame to ignore.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// WebSocket close codes used by this system, one per rejection cause.
///
/// All codes sit in the application range (4000-4999) so they pass through
/// proxies untouched and never collide with transport-defined codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Missing or malformed `role`/`session` query parameters.
    InvalidParams,
    /// A client quoted a session id with no registered host.
    UnknownSession,
    /// The socket was replaced by a newer attachment for the same role.
    Superseded,
    /// A throughput or connection-churn ceiling was exceeded.
    RateLimited,
    /// Per-source-address connection ceiling reached.
    TooManyConnections,
    /// Version negotiation found no common protocol version.
    VersionMismatch,
    /// The relay's global registration cap is reached.
    RelayFull,
}

impl CloseCode {
    /// Numeric close code for the WebSocket close frame.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::InvalidParams => 4400,
            Self::UnknownSession => 4404,
            Self::Superseded => 4409,
            Self::RateLimited => 4420,
            Self::TooManyConnections => 4429,
            Self::VersionMismatch => 4490,
            Self::RelayFull => 4503,
        }
    }

    /// Short human-readable reason carried alongside the code.
    pub fn reason(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid connection parameters",
            Self::UnknownSession => "unknown session",
            Self::Superseded => "replaced by a newer connection",
            Self::RateLimited => "rate limit exceeded",
            Self::TooManyConnections => "too many connections",
            Self::VersionMismatch => "protocol version mismatch",
            Self::RelayFull => "relay at capacity",
        }
    }

    /// Map a numeric close code back to its meaning, if it is one of ours.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            4400 => Some(Self::InvalidParams),
            4404 => Some(Self::UnknownSession),
            4409 => Some(Self::Superseded),
            4420 => Some(Self::RateLimited),
            4429 => Some(Self::TooManyConnections),
            4490 => Some(Self::VersionMismatch),
            4503 => Some(Self::RelayFull),
            _ => None,
        }
    }
}
