//! Tool-execution seam between the protocol runtime and the embedding
//! application.

use async_trait::async_trait;
use serde_json::value::RawValue;

/// Collaborator that performs the remote operations a client requests.
///
/// The runtime hands every decrypted `RPC` payload to this trait, awaited
/// inline so frame handling stays strictly sequential, and seals only the
/// final element of the returned sequence back to the client. Earlier
/// elements are incremental results for local consumption; a single result
/// is a one-element sequence, and an empty sequence sends nothing.
///
/// Payloads are opaque to the protocol. Request schema, result schema, and
/// error reporting all belong to the implementor; a failed operation is
/// still a result, encoded however the implementor's schema says.
#[async_trait]
pub trait ToolExecutor: Send + Sync + 'static {
    /// Execute one request to completion.
    async fn execute(&self, request: Box<RawValue>) -> Vec<Box<RawValue>>;
}
