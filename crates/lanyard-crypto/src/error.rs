//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from sealing and opening envelope frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Frame is shorter than a nonce plus an authentication tag.
    #[error("frame too short: {len} bytes, need at least {min}", min = crate::frame::MIN_FRAME_SIZE)]
    FrameTooShort {
        /// Length of the rejected frame.
        len: usize,
    },

    /// No candidate context authenticated the frame.
    ///
    /// Deliberately carries no detail: a wrong key, a tampered frame, and a
    /// mismatched AAD are indistinguishable to the caller.
    #[error("frame authentication failed")]
    DecryptFailed,

    /// The cipher rejected the seal request.
    #[error("frame encryption failed")]
    EncryptFailed,
}
