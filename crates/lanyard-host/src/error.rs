//! Host runtime error types.

use lanyard_core::HostError;
use thiserror::Error;

/// Errors from the host runtime.
///
/// Connect failures and per-frame rejections never appear here: the
/// reconnect loop absorbs the former and the fail-silent drop policy logs
/// the latter. What remains is what the embedding application must act on.
#[derive(Debug, Error)]
pub enum HostRuntimeError {
    /// The WebSocket transport failed mid-connection.
    #[error("transport failed: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The state machine reported an unrecoverable failure.
    #[error("protocol failure: {0}")]
    Machine(#[from] HostError),

    /// An event push needs an attached, ready, paired client.
    #[error("no ready paired client attached")]
    NotReady,

    /// The runtime is gone, or the connection dropped while a command was
    /// in flight.
    #[error("host runtime unavailable")]
    Stopped,
}
