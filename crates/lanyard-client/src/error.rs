//! Client runtime error types.

use lanyard_core::ClientError;
use thiserror::Error;

/// Errors from the client runtime.
///
/// Transport drops and per-frame rejections never appear here: the
/// reconnect loop absorbs the former and the fail-silent drop policy logs
/// the latter. What remains is what the embedding application must act on.
#[derive(Debug, Error)]
pub enum ClientRuntimeError {
    /// The WebSocket transport failed mid-connection.
    #[error("transport failed: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The state machine reported an unrecoverable failure.
    #[error("protocol failure: {0}")]
    Machine(#[from] ClientError),

    /// The host reported a negotiation failure. Reconnecting will not help
    /// until one side is upgraded, so the runtime stops.
    #[error("protocol rejected by host: {message}")]
    Rejected {
        /// Host-supplied detail.
        message: String,
    },

    /// The operation needs a ready (and, for traffic, paired) connection.
    #[error("no ready connection to the host")]
    NotReady,

    /// The runtime is gone, or the connection dropped while a command was
    /// in flight.
    #[error("client runtime unavailable")]
    Stopped,
}
