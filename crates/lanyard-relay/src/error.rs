//! Relay error types.

use thiserror::Error;

/// Errors surfaced by the relay's accept path.
///
/// Per-connection protocol violations never appear here; those end with a
/// close code on the offending socket and the relay keeps running.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket-level failure binding, accepting, or resolving addresses.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket upgrade failure on an inbound connection.
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}
