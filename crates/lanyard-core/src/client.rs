//! Client-side connection state machine.
//!
//! Mirrors the host machine's action style: entry points return the
//! effects for the owning runtime. The client owns no [`crate::Session`];
//! it works from the session id and key recovered out-of-band from the
//! share URL.

use lanyard_crypto::SessionKey;
use lanyard_proto::{
    ErrorInfo, Hello, HelloAck, MessageKind, OFFERED_PROTOCOLS, PROTOCOL_V2, Pair, PairAck,
    ProtoError, raw_payload,
};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::{
    channel::{Channel, ChannelState},
    env::Environment,
    error::{ChannelError, ClientError},
};

/// Client-side protocol knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Optional stable identifier sent in the `HELLO`, for host-side logs.
    pub client_id: Option<String>,
    /// Versions offered in the `HELLO`.
    pub offered_protocols: Vec<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { client_id: None, offered_protocols: OFFERED_PROTOCOLS.to_vec() }
    }
}

/// Effect requested by the client machine.
#[derive(Debug)]
pub enum ClientAction {
    /// Write this sealed frame to the host.
    Send(Vec<u8>),
    /// Handshake complete at the given version.
    Ready {
        /// Negotiated protocol version.
        version: u8,
    },
    /// The host wants a pairing code; surface the prompt.
    PairingRequired,
    /// Outcome of a submitted pairing code.
    PairResult {
        /// Whether the host accepted the code.
        success: bool,
        /// Host-supplied detail, present on failure.
        message: Option<String>,
    },
    /// Result for an earlier `RPC` request.
    RpcResult {
        /// Opaque result payload.
        payload: Box<RawValue>,
    },
    /// Unsolicited host push.
    Event {
        /// Opaque event payload, if any.
        payload: Option<Box<RawValue>>,
    },
    /// The host reported a protocol-level failure (version mismatch).
    /// Reconnecting will not help until one side is upgraded.
    ProtocolError {
        /// Human-readable description.
        message: String,
    },
    /// The peer asked for a graceful shutdown of this connection.
    CloseRequested,
    /// The host restarted underneath us; the machine already re-sent
    /// `HELLO`, this action just informs the runtime.
    HostRestarted,
}

/// Client connection state machine.
///
/// Survives physical reconnects: [`ClientMachine::start`] discards the
/// per-connection channel while pairing memory is kept, so an operator is
/// not re-prompted after a transport blip.
#[derive(Debug)]
pub struct ClientMachine {
    session_id: Uuid,
    config: ClientConfig,
    channel: Channel,
    paired: bool,
}

impl ClientMachine {
    /// Creates a machine for the given session.
    pub fn new(session_id: Uuid, config: ClientConfig) -> Self {
        Self { session_id, config, channel: Channel::client(session_id), paired: false }
    }

    /// Begins (or restarts) the handshake on a fresh channel.
    ///
    /// Called on every new physical connection, and again whenever the
    /// relay reports the host reattached. Returns the `HELLO` to send.
    pub fn start<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.channel = Channel::client(self.session_id);
        let hello = Hello {
            client_id: self.config.client_id.clone(),
            protocols: self.config.offered_protocols.clone(),
        };
        let payload = encode(&hello)?;
        let frame = self
            .channel
            .seal(env, key, MessageKind::Hello, Some(payload))
            .map_err(ClientError::Seal)?;
        Ok(vec![ClientAction::Send(frame)])
    }

    /// Whether pairing has completed (this process's memory of it).
    pub fn is_paired(&self) -> bool {
        self.paired
    }

    /// Current handshake state.
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Negotiated protocol version, meaningful once `Ready`.
    pub fn version(&self) -> u8 {
        self.channel.version()
    }

    /// Processes one inbound frame to completion.
    pub fn on_frame<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
        frame: &[u8],
    ) -> Result<Vec<ClientAction>, ClientError> {
        match self.channel.state() {
            ChannelState::WaitHello => self.on_handshake_frame(key, frame),
            ChannelState::Ready => self.on_steady_frame(env, key, frame),
        }
    }

    /// Seals a `PAIR` with the operator-entered code.
    pub fn submit_pairing_code<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
        code: &str,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.channel.state() != ChannelState::Ready {
            return Err(ClientError::NotReady);
        }
        let payload = encode(&Pair { code: code.to_string() })?;
        let frame = self
            .channel
            .seal(env, key, MessageKind::Pair, Some(payload))
            .map_err(ClientError::Seal)?;
        Ok(vec![ClientAction::Send(frame)])
    }

    /// Seals an `RPC` request. Requires a ready, paired channel.
    pub fn send_rpc<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
        payload: Box<RawValue>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.ensure_traffic_ready()?;
        let frame = self
            .channel
            .seal(env, key, MessageKind::Rpc, Some(payload))
            .map_err(ClientError::Seal)?;
        Ok(vec![ClientAction::Send(frame)])
    }

    /// Seals a keepalive `PING`. Requires a ready, paired channel, since
    /// the host's pairing gate would drop it anyway.
    pub fn send_ping<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.ensure_traffic_ready()?;
        let frame =
            self.channel.seal(env, key, MessageKind::Ping, None).map_err(ClientError::Seal)?;
        Ok(vec![ClientAction::Send(frame)])
    }

    /// Seals a graceful `CLOSE` notice.
    pub fn send_close<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.channel.state() != ChannelState::Ready {
            return Err(ClientError::NotReady);
        }
        let frame =
            self.channel.seal(env, key, MessageKind::Close, None).map_err(ClientError::Seal)?;
        Ok(vec![ClientAction::Send(frame)])
    }

    fn ensure_traffic_ready(&self) -> Result<(), ClientError> {
        if self.channel.state() != ChannelState::Ready || !self.paired {
            return Err(ClientError::NotReady);
        }
        Ok(())
    }

    fn on_handshake_frame(
        &mut self,
        key: &SessionKey,
        frame: &[u8],
    ) -> Result<Vec<ClientAction>, ClientError> {
        let inbound = self.channel.open(key, frame).map_err(ClientError::Reject)?;
        match inbound.envelope.kind {
            MessageKind::HelloAck => {
                let ack: HelloAck = inbound.envelope.payload_as().map_err(ClientError::Payload)?;
                self.on_hello_ack(&ack)
            },
            MessageKind::Error => {
                let info: ErrorInfo =
                    inbound.envelope.payload_as().map_err(ClientError::Payload)?;
                Ok(vec![ClientAction::ProtocolError {
                    message: info
                        .message
                        .or(info.code)
                        .unwrap_or_else(|| "handshake rejected".to_string()),
                }])
            },
            kind => Err(ClientError::UnexpectedKind { kind }),
        }
    }

    fn on_hello_ack(&mut self, ack: &HelloAck) -> Result<Vec<ClientAction>, ClientError> {
        if !self.config.offered_protocols.contains(&ack.selected_version) {
            return Err(ClientError::UnsupportedVersion { version: ack.selected_version });
        }
        if ack.selected_version == PROTOCOL_V2 && ack.epoch.is_none() {
            return Err(ClientError::MissingEpoch);
        }

        self.channel.set_version(ack.selected_version);
        if ack.selected_version == PROTOCOL_V2 {
            self.channel.set_epoch(ack.epoch.clone());
        }
        self.channel.mark_ready();
        tracing::debug!(version = ack.selected_version, "handshake complete");

        let mut actions = vec![ClientAction::Ready { version: ack.selected_version }];
        if ack.requires_pairing && !self.paired {
            actions.push(ClientAction::PairingRequired);
        } else {
            self.paired = true;
        }
        Ok(actions)
    }

    fn on_steady_frame<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
        frame: &[u8],
    ) -> Result<Vec<ClientAction>, ClientError> {
        let inbound = match self.channel.open(key, frame) {
            Ok(inbound) => inbound,
            // An authenticated frame restarting the sequence space means
            // the host rebuilt its connection state; re-handshake.
            Err(ChannelError::Sequence { expected, got: 1 }) if expected > 1 => {
                tracing::debug!("inbound sequence restarted, re-sending handshake");
                let mut actions = vec![ClientAction::HostRestarted];
                actions.extend(self.start(env, key)?);
                return Ok(actions);
            },
            Err(err) => return Err(ClientError::Reject(err)),
        };

        let envelope = inbound.envelope;
        match envelope.kind {
            MessageKind::PairAck => {
                let ack: PairAck = envelope.payload_as().map_err(ClientError::Payload)?;
                if ack.success {
                    self.paired = true;
                }
                Ok(vec![ClientAction::PairResult { success: ack.success, message: ack.message }])
            },
            MessageKind::Error => {
                let info: ErrorInfo = envelope.payload_as().map_err(ClientError::Payload)?;
                if let Some(code) = info.code {
                    let message = info.message.unwrap_or(code);
                    Ok(vec![ClientAction::ProtocolError { message }])
                } else if info.success == Some(false) {
                    Ok(vec![ClientAction::PairResult { success: false, message: info.message }])
                } else {
                    Err(ClientError::UnexpectedKind { kind: MessageKind::Error })
                }
            },
            MessageKind::Rpc => {
                let payload = envelope
                    .payload
                    .ok_or(ProtoError::MissingPayload { kind: MessageKind::Rpc })
                    .map_err(ClientError::Payload)?;
                Ok(vec![ClientAction::RpcResult { payload }])
            },
            MessageKind::Event => Ok(vec![ClientAction::Event { payload: envelope.payload }]),
            MessageKind::Ping => {
                let pong = self
                    .channel
                    .seal(env, key, MessageKind::Pong, None)
                    .map_err(ClientError::Seal)?;
                Ok(vec![ClientAction::Send(pong)])
            },
            MessageKind::Pong => Ok(vec![]),
            MessageKind::Close => Ok(vec![ClientAction::CloseRequested]),
            kind => Err(ClientError::UnexpectedKind { kind }),
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Box<RawValue>, ClientError> {
    raw_payload(value).map_err(|e| ClientError::Seal(ChannelError::Proto(e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lanyard_proto::{Direction, Envelope, PROTOCOL_V1, build_aad};

    use super::*;
    use crate::{
        host::{HostAction, HostConfig, HostMachine},
        session::Session,
        test_env::TestEnv,
    };

    struct Pair2 {
        env: TestEnv,
        session: Session,
        host: HostMachine,
        client: ClientMachine,
    }

    /// Host machine and client machine wired back-to-back, handshake done.
    fn handshaken() -> Pair2 {
        let env = TestEnv::default();
        let mut session = Session::generate(&env);
        let mut host = HostMachine::new(&env, &session, HostConfig::default());
        let mut client = ClientMachine::new(session.id(), ClientConfig::default());

        let actions = client.start(&env, session.key()).unwrap();
        let ClientAction::Send(hello) = &actions[0] else { panic!("expected Send") };
        let actions = host.on_frame(&env, &mut session, hello).unwrap();
        let HostAction::Send(ack) = &actions[0] else { panic!("expected Send") };
        let actions = client.on_frame(&env, session.key(), ack).unwrap();
        assert!(matches!(actions[0], ClientAction::Ready { version: PROTOCOL_V2 }));
        assert!(matches!(actions[1], ClientAction::PairingRequired));

        Pair2 { env, session, host, client }
    }

    fn drive_pairing(p: &mut Pair2) {
        let code = p.session.pairing_code().to_string();
        let actions = p.client.submit_pairing_code(&p.env, p.session.key(), &code).unwrap();
        let ClientAction::Send(frame) = &actions[0] else { panic!("expected Send") };
        let actions = p.host.on_frame(&p.env, &mut p.session, frame).unwrap();
        let HostAction::Send(ack) = &actions[0] else { panic!("expected Send") };
        let actions = p.client.on_frame(&p.env, p.session.key(), ack).unwrap();
        assert!(matches!(actions[0], ClientAction::PairResult { success: true, .. }));
    }

    #[test]
    fn handshake_then_pairing_prompt() {
        let p = handshaken();
        assert_eq!(p.client.state(), ChannelState::Ready);
        assert_eq!(p.client.version(), PROTOCOL_V2);
        assert!(!p.client.is_paired());
    }

    #[test]
    fn pairing_success_enables_rpc() {
        let mut p = handshaken();

        let payload = raw_payload(&serde_json::json!({"method": "ls"})).unwrap();
        let err = p.client.send_rpc(&p.env, p.session.key(), payload).unwrap_err();
        assert!(matches!(err, ClientError::NotReady));

        drive_pairing(&mut p);
        assert!(p.client.is_paired());

        let payload = raw_payload(&serde_json::json!({"method": "ls"})).unwrap();
        let actions = p.client.send_rpc(&p.env, p.session.key(), payload).unwrap();
        let ClientAction::Send(frame) = &actions[0] else { panic!("expected Send") };

        let actions = p.host.on_frame(&p.env, &mut p.session, frame).unwrap();
        assert!(matches!(actions[0], HostAction::Execute { .. }));

        let reply = p
            .host
            .seal_rpc_result(&p.env, &p.session, raw_payload(&serde_json::json!({"ok":1})).unwrap())
            .unwrap();
        let actions = p.client.on_frame(&p.env, p.session.key(), &reply).unwrap();
        let ClientAction::RpcResult { payload: result } = &actions[0] else {
            panic!("expected RpcResult")
        };
        assert!(result.get().contains("\"ok\":1"));
    }

    #[test]
    fn wrong_code_reports_failure_and_keeps_gate() {
        let mut p = handshaken();

        let actions = p.client.submit_pairing_code(&p.env, p.session.key(), "999999").unwrap();
        let ClientAction::Send(frame) = &actions[0] else { panic!("expected Send") };
        let actions = p.host.on_frame(&p.env, &mut p.session, frame).unwrap();
        let HostAction::Send(reply) = &actions[0] else { panic!("expected Send") };

        let actions = p.client.on_frame(&p.env, p.session.key(), reply).unwrap();
        assert!(matches!(
            &actions[0],
            ClientAction::PairResult { success: false, message: Some(_) }
        ));
        assert!(!p.client.is_paired());
    }

    #[test]
    fn version_mismatch_error_surfaces() {
        let env = TestEnv::default();
        let mut session = Session::generate(&env);
        let mut host = HostMachine::new(&env, &session, HostConfig::default());
        let mut client = ClientMachine::new(
            session.id(),
            ClientConfig { client_id: None, offered_protocols: vec![PROTOCOL_V1] },
        );

        let actions = client.start(&env, session.key()).unwrap();
        let ClientAction::Send(hello) = &actions[0] else { panic!("expected Send") };
        let actions = host.on_frame(&env, &mut session, hello).unwrap();
        let HostAction::Send(error) = &actions[0] else { panic!("expected Send") };

        let actions = client.on_frame(&env, session.key(), error).unwrap();
        let ClientAction::ProtocolError { message } = &actions[0] else {
            panic!("expected ProtocolError")
        };
        assert!(message.contains("version"));
    }

    #[test]
    fn event_and_keepalive_flow() {
        let mut p = handshaken();
        drive_pairing(&mut p);

        let frame = p
            .host
            .seal_event(&p.env, &p.session, raw_payload(&serde_json::json!({"n": 1})).unwrap())
            .unwrap();
        let actions = p.client.on_frame(&p.env, p.session.key(), &frame).unwrap();
        assert!(matches!(&actions[0], ClientAction::Event { payload: Some(_) }));

        let actions = p.client.send_ping(&p.env, p.session.key()).unwrap();
        let ClientAction::Send(ping) = &actions[0] else { panic!("expected Send") };
        let actions = p.host.on_frame(&p.env, &mut p.session, ping).unwrap();
        let HostAction::Send(pong) = &actions[0] else { panic!("expected Send") };
        let actions = p.client.on_frame(&p.env, p.session.key(), pong).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn host_restart_detected_by_sequence_regression() {
        let mut p = handshaken();
        drive_pairing(&mut p);

        // Exchange one RPC so the client's inbound counter moves past 2.
        let payload = raw_payload(&serde_json::json!({"m": 1})).unwrap();
        let actions = p.client.send_rpc(&p.env, p.session.key(), payload).unwrap();
        let ClientAction::Send(frame) = &actions[0] else { panic!("expected Send") };
        let _ = p.host.on_frame(&p.env, &mut p.session, frame).unwrap();
        let reply = p
            .host
            .seal_rpc_result(&p.env, &p.session, raw_payload(&serde_json::json!({"r":1})).unwrap())
            .unwrap();
        let _ = p.client.on_frame(&p.env, p.session.key(), &reply).unwrap();

        // A "restarted host" on a v2 connection has a fresh epoch, so its
        // frames would not even decrypt. Model the v1-shaped signal: an
        // authenticated h2c frame under the current context carrying seq 1.
        let envelope = Envelope {
            v: PROTOCOL_V2,
            kind: MessageKind::Pong,
            dir: Direction::H2c,
            seq: 1,
            ts: 0,
            epoch: None,
            payload: None,
        };
        let aad = build_aad(
            &p.session.id().to_string(),
            PROTOCOL_V2,
            p.host.epoch(),
            Direction::H2c,
        );
        let frame = lanyard_crypto::seal(
            p.session.key(),
            [9; lanyard_crypto::NONCE_SIZE],
            &aad,
            &envelope.to_bytes().unwrap(),
        )
        .unwrap();

        let actions = p.client.on_frame(&p.env, p.session.key(), &frame).unwrap();
        assert!(matches!(actions[0], ClientAction::HostRestarted));
        let ClientAction::Send(hello) = &actions[1] else { panic!("expected Send") };

        // The machine is back in WAIT_HELLO with a fresh HELLO out, and
        // pairing memory survived.
        assert_eq!(p.client.state(), ChannelState::WaitHello);
        assert!(p.client.is_paired());

        // The host (reset as it would be on reconnect) accepts that HELLO.
        p.host.reset(&p.env);
        let actions = p.host.on_frame(&p.env, &mut p.session, hello).unwrap();
        assert!(matches!(actions[0], HostAction::Send(_)));
    }

    #[test]
    fn start_resets_channel_but_keeps_pairing_memory() {
        let mut p = handshaken();
        drive_pairing(&mut p);

        let actions = p.client.start(&p.env, p.session.key()).unwrap();
        assert!(matches!(actions[0], ClientAction::Send(_)));
        assert_eq!(p.client.state(), ChannelState::WaitHello);
        assert!(p.client.is_paired());

        // After the host resets too, the re-handshake completes without a
        // new pairing prompt.
        p.host.reset(&p.env);
        let ClientAction::Send(hello) = &actions[0] else { panic!("expected Send") };
        let actions = p.host.on_frame(&p.env, &mut p.session, hello).unwrap();
        let HostAction::Send(ack) = &actions[0] else { panic!("expected Send") };
        let actions = p.client.on_frame(&p.env, p.session.key(), ack).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ClientAction::Ready { .. }));
    }

    #[test]
    fn v2_ack_without_epoch_is_dropped() {
        let env = TestEnv::default();
        let session = Session::generate(&env);
        let mut client = ClientMachine::new(session.id(), ClientConfig::default());
        let _ = client.start(&env, session.key()).unwrap();

        // Hand-built ACK claiming v2 but omitting the epoch.
        let ack = HelloAck { selected_version: PROTOCOL_V2, requires_pairing: false, epoch: None };
        let envelope = Envelope {
            v: PROTOCOL_V2,
            kind: MessageKind::HelloAck,
            dir: Direction::H2c,
            seq: 1,
            ts: 0,
            epoch: None,
            payload: Some(raw_payload(&ack).unwrap()),
        };
        let aad =
            build_aad(&session.id().to_string(), PROTOCOL_V1, None, Direction::H2c);
        let frame = lanyard_crypto::seal(
            session.key(),
            [5; lanyard_crypto::NONCE_SIZE],
            &aad,
            &envelope.to_bytes().unwrap(),
        )
        .unwrap();

        let err = client.on_frame(&env, session.key(), &frame).unwrap_err();
        assert!(matches!(err, ClientError::MissingEpoch));
        assert!(!err.is_fatal());
    }
}
