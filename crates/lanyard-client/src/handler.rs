//! Callback seam between the protocol runtime and the embedding UI.

use async_trait::async_trait;
use lanyard_proto::PeerStatus;
use serde_json::value::RawValue;

/// Collaborator the runtime notifies about session events.
///
/// All callbacks are awaited inline by the connection task, one at a time,
/// so an implementation that blocks stalls frame processing. Slow work
/// (rendering, persistence) belongs on a channel the implementor drains
/// elsewhere.
///
/// Only the two callbacks an operator cannot ignore are required; the rest
/// default to no-ops.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// The host requires a pairing code before it will talk.
    async fn on_pairing_required(&self);

    /// Result for an earlier [`crate::ClientHandle::send_rpc`] request.
    async fn on_rpc_result(&self, payload: Box<RawValue>);

    /// Handshake completed at the given protocol version.
    async fn on_ready(&self, version: u8) {
        let _ = version;
    }

    /// Outcome of a submitted pairing code.
    async fn on_pair_result(&self, success: bool, message: Option<String>) {
        let _ = (success, message);
    }

    /// Unsolicited host push.
    async fn on_event(&self, payload: Option<Box<RawValue>>) {
        let _ = payload;
    }

    /// The relay reported the host attaching or detaching.
    async fn on_relay_status(&self, status: PeerStatus) {
        let _ = status;
    }
}
