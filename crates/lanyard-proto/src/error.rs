//! Protocol-layer error types.

use thiserror::Error;

use crate::envelope::MessageKind;

/// Errors from envelope and payload (de)serialization.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Serializing an envelope or payload failed.
    #[error("envelope encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Decrypted plaintext is not a valid envelope.
    #[error("envelope decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The message kind requires a payload but none was present.
    #[error("missing payload for {kind:?}")]
    MissingPayload {
        /// Kind of the envelope lacking its payload.
        kind: MessageKind,
    },

    /// The payload does not match the expected shape for its kind.
    #[error("payload decode failed: {0}")]
    Payload(#[source] serde_json::Error),
}
