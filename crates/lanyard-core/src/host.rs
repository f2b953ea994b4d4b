//! Host-side connection state machine.
//!
//! Pure state machine in the action style: every entry point returns the
//! list of effects the owning runtime must perform (frames to write, the
//! socket to close, payloads to hand to the tool executor). The machine
//! never touches I/O itself.

use lanyard_proto::{
    CloseCode, ErrorInfo, Hello, HelloAck, MessageKind, PROTOCOL_V1, PROTOCOL_V2, Pair, PairAck,
    raw_payload,
};
use serde_json::value::RawValue;

use crate::{
    channel::{Channel, ChannelState, generate_epoch},
    env::Environment,
    error::{ChannelError, HostError},
    session::Session,
};

/// Host-side protocol knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostConfig {
    /// Accept transitional v1 clients (no epoch binding). Off by default.
    pub allow_v1: bool,
}

impl HostConfig {
    /// Versions this host will negotiate, most-preferred first.
    pub fn supported_versions(&self) -> Vec<u8> {
        if self.allow_v1 { vec![PROTOCOL_V2, PROTOCOL_V1] } else { vec![PROTOCOL_V2] }
    }
}

/// Effect requested by the host machine.
#[derive(Debug)]
pub enum HostAction {
    /// Write this sealed frame to the client.
    Send(Vec<u8>),
    /// Close the socket with the given code after flushing prior sends.
    Close {
        /// Close code to report.
        code: CloseCode,
    },
    /// Hand this decrypted `RPC` payload to the tool executor. The runtime
    /// seals the result via [`HostMachine::seal_rpc_result`].
    Execute {
        /// Opaque request payload.
        payload: Box<RawValue>,
    },
    /// Pairing just completed; informational.
    Paired,
    /// The peer asked for a graceful shutdown of this connection.
    CloseRequested,
}

/// Host connection state machine.
///
/// One per physical connection. The long-lived [`Session`] stays outside
/// and is passed into each call, since pairing state and the key outlive
/// any single connection.
#[derive(Debug)]
pub struct HostMachine {
    channel: Channel,
    supported: Vec<u8>,
}

impl HostMachine {
    /// Creates a machine for a new physical connection, with a fresh epoch.
    pub fn new<E: Environment>(env: &E, session: &Session, config: HostConfig) -> Self {
        Self {
            channel: Channel::host(session.id(), generate_epoch(env)),
            supported: config.supported_versions(),
        }
    }

    /// Discards all connection state: fresh epoch, zeroed counters, back to
    /// `WaitHello`. Used when the relay reports a client (re)attachment, so
    /// the newcomer's `HELLO{seq: 1}` passes admission.
    pub fn reset<E: Environment>(&mut self, env: &E) {
        self.channel = Channel::host(self.channel.session_id(), generate_epoch(env));
    }

    /// Current handshake state.
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Negotiated protocol version, meaningful once `Ready`.
    pub fn version(&self) -> u8 {
        self.channel.version()
    }

    /// This connection's epoch, absent on v1 connections.
    pub fn epoch(&self) -> Option<&str> {
        self.channel.epoch()
    }

    /// Processes one inbound frame to completion.
    ///
    /// Non-fatal errors mean the frame was dropped and the connection
    /// continues; the runtime logs them and sends nothing back.
    pub fn on_frame<E: Environment>(
        &mut self,
        env: &E,
        session: &mut Session,
        frame: &[u8],
    ) -> Result<Vec<HostAction>, HostError> {
        match self.channel.state() {
            ChannelState::WaitHello => self.on_handshake_frame(env, session, frame),
            ChannelState::Ready => self.on_steady_frame(env, session, frame),
        }
    }

    /// Seals a tool-execution result as the next outbound `RPC`.
    pub fn seal_rpc_result<E: Environment>(
        &mut self,
        env: &E,
        session: &Session,
        payload: Box<RawValue>,
    ) -> Result<Vec<u8>, HostError> {
        if self.channel.state() != ChannelState::Ready {
            return Err(HostError::NotReady);
        }
        self.channel
            .seal(env, session.key(), MessageKind::Rpc, Some(payload))
            .map_err(HostError::Seal)
    }

    /// Seals an unsolicited `EVENT` push for the client.
    ///
    /// Requires a ready channel past the pairing gate; otherwise the caller
    /// gets [`HostError::NotReady`] instead of a frame.
    pub fn seal_event<E: Environment>(
        &mut self,
        env: &E,
        session: &Session,
        payload: Box<RawValue>,
    ) -> Result<Vec<u8>, HostError> {
        if self.channel.state() != ChannelState::Ready || session.pairing_required() {
            return Err(HostError::NotReady);
        }
        self.channel
            .seal(env, session.key(), MessageKind::Event, Some(payload))
            .map_err(HostError::Seal)
    }

    fn on_handshake_frame<E: Environment>(
        &mut self,
        env: &E,
        session: &mut Session,
        frame: &[u8],
    ) -> Result<Vec<HostAction>, HostError> {
        let inbound = self.channel.open(session.key(), frame).map_err(HostError::Reject)?;
        if inbound.envelope.kind != MessageKind::Hello {
            return Err(HostError::UnexpectedKind { kind: inbound.envelope.kind });
        }
        let hello: Hello = inbound.envelope.payload_as().map_err(HostError::Payload)?;

        // Host preference wins: first of our versions in the peer's offer.
        let selected =
            self.supported.iter().copied().find(|version| hello.protocols.contains(version));

        let Some(selected) = selected else {
            tracing::debug!(offered = ?hello.protocols, "no common protocol version");
            self.channel.set_version(inbound.used_version);
            let payload = encode(&ErrorInfo::version_mismatch())?;
            let frame = self
                .channel
                .seal(env, session.key(), MessageKind::Error, Some(payload))
                .map_err(HostError::Seal)?;
            return Ok(vec![
                HostAction::Send(frame),
                HostAction::Close { code: CloseCode::VersionMismatch },
            ]);
        };

        tracing::debug!(version = selected, client_id = ?hello.client_id, "handshake accepted");
        self.channel.set_version(selected);
        // set_version already dropped the epoch if v1 won.
        let ack = HelloAck {
            selected_version: selected,
            requires_pairing: session.pairing_required(),
            epoch: self.channel.epoch().map(str::to_string),
        };
        let payload = encode(&ack)?;
        let frame = self
            .channel
            .seal(env, session.key(), MessageKind::HelloAck, Some(payload))
            .map_err(HostError::Seal)?;
        self.channel.mark_ready();
        Ok(vec![HostAction::Send(frame)])
    }

    fn on_steady_frame<E: Environment>(
        &mut self,
        env: &E,
        session: &mut Session,
        frame: &[u8],
    ) -> Result<Vec<HostAction>, HostError> {
        let inbound = self.channel.open(session.key(), frame).map_err(HostError::Reject)?;
        let envelope = inbound.envelope;

        // While unpaired, PAIR is the only admissible kind. PING included.
        if session.pairing_required() && envelope.kind != MessageKind::Pair {
            return Err(HostError::PairingGate { kind: envelope.kind });
        }

        match envelope.kind {
            MessageKind::Pair => {
                let pair: Pair = envelope.payload_as().map_err(HostError::Payload)?;
                self.on_pair(env, session, &pair)
            },
            MessageKind::Rpc => {
                let payload = envelope
                    .payload
                    .ok_or(lanyard_proto::ProtoError::MissingPayload { kind: MessageKind::Rpc })
                    .map_err(HostError::Payload)?;
                Ok(vec![HostAction::Execute { payload }])
            },
            MessageKind::Ping => {
                let pong = self
                    .channel
                    .seal(env, session.key(), MessageKind::Pong, None)
                    .map_err(HostError::Seal)?;
                Ok(vec![HostAction::Send(pong)])
            },
            MessageKind::Close => Ok(vec![HostAction::CloseRequested]),
            kind => Err(HostError::UnexpectedKind { kind }),
        }
    }

    fn on_pair<E: Environment>(
        &mut self,
        env: &E,
        session: &mut Session,
        pair: &Pair,
    ) -> Result<Vec<HostAction>, HostError> {
        if session.verify_pairing_code(&pair.code) {
            session.complete_pairing();
            tracing::debug!("pairing complete");
            let payload = encode(&PairAck { success: true, message: None })?;
            let frame = self
                .channel
                .seal(env, session.key(), MessageKind::PairAck, Some(payload))
                .map_err(HostError::Seal)?;
            Ok(vec![HostAction::Send(frame), HostAction::Paired])
        } else {
            // Failure travels as an ERROR shaped like a failed PAIR_ACK, so
            // only the paired endpoints learn the code was wrong.
            let payload = encode(&PairAck {
                success: false,
                message: Some("Invalid pairing code".to_string()),
            })?;
            let frame = self
                .channel
                .seal(env, session.key(), MessageKind::Error, Some(payload))
                .map_err(HostError::Seal)?;
            Ok(vec![HostAction::Send(frame)])
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Box<RawValue>, HostError> {
    raw_payload(value).map_err(|e| HostError::Seal(ChannelError::Proto(e)))
}
