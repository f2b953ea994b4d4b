//! Typed payloads for handshake, pairing, and error reporting.
//!
//! `RPC` and `EVENT` payloads are deliberately absent: they belong to the
//! tool-execution collaborator and pass through the protocol layer as opaque
//! blobs.

use serde::{Deserialize, Serialize};

/// Error code reported when version negotiation finds no common version.
pub const ERR_VERSION_MISMATCH: &str = "VERSION_MISMATCH";

/// Client handshake offer (`HELLO` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    /// Optional stable identifier for the client device, for host-side logs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
    /// Protocol versions the client is willing to speak.
    pub protocols: Vec<u8>,
}

/// Host handshake acknowledgement (`HELLO_ACK` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    /// Version the host selected from the client's offer.
    pub selected_version: u8,
    /// Whether the session still requires a pairing code.
    pub requires_pairing: bool,
    /// The connection epoch the client must echo on every v2 message.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub epoch: Option<String>,
}

/// Pairing code submission (`PAIR` payload).
///
/// # Security
///
/// - **Debug Redaction**: The `Debug` impl redacts `code`. The pairing code
///   is the one human-carried secret in the protocol and must never reach
///   logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    /// The 6-digit pairing code as entered by the operator.
    pub code: String,
}

impl std::fmt::Debug for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pair").field("code", &"<redacted>").finish()
    }
}

/// Pairing outcome (`PAIR_ACK` payload, and the payload of a pairing-failure
/// `ERROR`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairAck {
    /// Whether the submitted code was accepted.
    pub success: bool,
    /// Human-readable detail, present on failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// Generic `ERROR` payload view.
///
/// Covers both shapes the host emits: negotiation failures carry `code`,
/// pairing rejections carry `success: false`. All fields optional so one
/// parse handles either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Machine-readable error code, e.g. [`ERR_VERSION_MISMATCH`].
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    /// Pairing-shaped failure marker.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub success: Option<bool>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl ErrorInfo {
    /// Negotiation failure payload.
    pub fn version_mismatch() -> Self {
        Self {
            code: Some(ERR_VERSION_MISMATCH.to_string()),
            success: None,
            message: Some("no common protocol version".to_string()),
        }
    }
}
