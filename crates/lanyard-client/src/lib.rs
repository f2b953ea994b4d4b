//! Lanyard client runtime.
//!
//! Takes a parsed [`ShareUrl`], attaches to the relay under the `client`
//! role, and drives the sans-IO [`ClientMachine`] over the socket: inbound
//! frames become machine calls, machine actions become socket writes and
//! [`ClientHandler`] callbacks.
//!
//! ## Architecture
//!
//! ```text
//! lanyard-client
//!   ├─ ClientRuntime   (reconnect loop, action execution)
//!   ├─ ClientHandle    (send_rpc / submit_pairing_code from other tasks)
//!   └─ ClientHandler   (application collaborator, async-trait)
//! ```
//!
//! The session key never leaves this process: it arrives in the share URL
//! fragment, and everything written to the relay is ciphertext. When the
//! relay reports the host reattaching, or an authenticated frame restarts
//! the inbound sequence space, the runtime discards its connection state
//! and re-handshakes; pairing memory survives both.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod handler;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lanyard_core::{
    Backoff, ClientAction, ClientConfig, ClientMachine, Environment, ShareUrl, SystemEnv,
};
use lanyard_proto::{PeerStatus, RelayControl};
use serde_json::value::RawValue;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

pub use error::ClientRuntimeError;
pub use handler::ClientHandler;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands queued by [`ClientHandle`] callers between inbound frames.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Client runtime configuration.
#[derive(Debug, Clone)]
pub struct ClientRuntimeConfig {
    /// Protocol knobs for the connection machine.
    pub machine: ClientConfig,
    /// First reconnect delay; doubles each failed attempt.
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling.
    pub backoff_cap: Duration,
}

impl Default for ClientRuntimeConfig {
    fn default() -> Self {
        Self {
            machine: ClientConfig::default(),
            backoff_initial: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

enum ClientCommand {
    SendRpc {
        payload: Box<RawValue>,
        reply: oneshot::Sender<Result<(), ClientRuntimeError>>,
    },
    SubmitPairingCode {
        code: String,
        reply: oneshot::Sender<Result<(), ClientRuntimeError>>,
    },
}

/// Cloneable handle into a running [`ClientRuntime`].
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    /// Seals `payload` as an `RPC` request for the host. The result arrives
    /// via [`ClientHandler::on_rpc_result`].
    ///
    /// # Errors
    ///
    /// [`ClientRuntimeError::NotReady`] when the connection is not ready and
    /// paired; [`ClientRuntimeError::Stopped`] when the runtime is gone or
    /// the connection dropped mid-send.
    pub async fn send_rpc(&self, payload: Box<RawValue>) -> Result<(), ClientRuntimeError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(ClientCommand::SendRpc { payload, reply })
            .await
            .map_err(|_| ClientRuntimeError::Stopped)?;
        answer.await.map_err(|_| ClientRuntimeError::Stopped)?
    }

    /// Seals a `PAIR` with the operator-entered code. The outcome arrives
    /// via [`ClientHandler::on_pair_result`].
    pub async fn submit_pairing_code(&self, code: &str) -> Result<(), ClientRuntimeError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(ClientCommand::SubmitPairingCode { code: code.to_string(), reply })
            .await
            .map_err(|_| ClientRuntimeError::Stopped)?;
        answer.await.map_err(|_| ClientRuntimeError::Stopped)?
    }
}

/// How one physical connection ended.
enum Served {
    /// Transport dropped or the relay closed; reconnect.
    Dropped,
    /// The host asked for a graceful close; stop the runtime.
    Finished,
}

/// Whether the current connection keeps running after a batch of actions.
enum Flow {
    Continue,
    Finished,
}

/// Client endpoint runtime.
///
/// [`ClientRuntime::run`] reconnects with exponential backoff until the
/// host requests a graceful close or reports a negotiation failure. The
/// machine survives reconnects, so an operator who paired once is not
/// re-prompted after a transport blip.
pub struct ClientRuntime<H: ClientHandler> {
    env: SystemEnv,
    share: ShareUrl,
    config: ClientRuntimeConfig,
    machine: ClientMachine,
    handler: H,
    commands: mpsc::Receiver<ClientCommand>,
    handle: mpsc::Sender<ClientCommand>,
}

impl<H: ClientHandler> ClientRuntime<H> {
    /// Creates a runtime for the session described by a share URL.
    pub fn new(share: ShareUrl, config: ClientRuntimeConfig, handler: H) -> Self {
        let machine = ClientMachine::new(share.session_id, config.machine.clone());
        let (handle, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Self { env: SystemEnv::new(), share, config, machine, handler, commands, handle }
    }

    /// Handle for sending commands from other tasks.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle { commands: self.handle.clone() }
    }

    /// Runs the reconnect loop.
    ///
    /// Returns `Ok(())` when the host requests a graceful close, and
    /// [`ClientRuntimeError::Rejected`] when negotiation fails; every other
    /// failure is logged and retried.
    pub async fn run(mut self) -> Result<(), ClientRuntimeError> {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_cap);
        let url = attach_url(&self.share.relay_url, self.share.session_id);

        loop {
            match connect_async(&url).await {
                Ok((socket, _response)) => {
                    backoff.reset();
                    tracing::info!(session = %self.share.session_id, "attached to relay");
                    match self.drive(socket).await {
                        Ok(Served::Finished) => {
                            tracing::info!("host closed the session");
                            return Ok(());
                        },
                        Ok(Served::Dropped) => tracing::info!("relay connection closed"),
                        Err(err @ ClientRuntimeError::Rejected { .. }) => return Err(err),
                        Err(err) => tracing::warn!(error = %err, "relay connection failed"),
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "relay connect failed");
                },
            }

            let delay = backoff.next_delay();
            tracing::debug!(?delay, "reconnecting after delay");
            self.env.sleep(delay).await;
        }
    }

    /// Serves one physical connection until it ends.
    async fn drive(&mut self, mut socket: Socket) -> Result<Served, ClientRuntimeError> {
        // Fresh channel, fresh HELLO; pairing memory is kept.
        let actions = self.machine.start(&self.env, &self.share.key)?;
        if let Flow::Finished = self.apply_actions(&mut socket, actions).await? {
            return Ok(Served::Finished);
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    if let Some(command) = command {
                        self.on_command(&mut socket, command).await?;
                    }
                }
                message = socket.next() => match message {
                    Some(Ok(Message::Binary(frame))) => {
                        if let Flow::Finished = self.on_frame(&mut socket, &frame).await? {
                            return Ok(Served::Finished);
                        }
                    },
                    Some(Ok(Message::Text(text))) => {
                        self.on_control(&mut socket, &text).await?;
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        tracing::info!(?code, "relay closed the connection");
                        return Ok(Served::Dropped);
                    },
                    // Transport keepalive; tungstenite answers pings itself.
                    Some(Ok(_)) => {},
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        tracing::debug!("relay socket ended");
                        return Ok(Served::Dropped);
                    },
                },
            }
        }
    }

    /// Feeds one inbound frame through the machine and executes the
    /// resulting actions.
    async fn on_frame(
        &mut self,
        socket: &mut Socket,
        frame: &[u8],
    ) -> Result<Flow, ClientRuntimeError> {
        match self.machine.on_frame(&self.env, &self.share.key, frame) {
            Ok(actions) => self.apply_actions(socket, actions).await,
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                tracing::warn!(session = %self.share.session_id, error = %err, "frame dropped");
                Ok(Flow::Continue)
            },
        }
    }

    async fn apply_actions(
        &mut self,
        socket: &mut Socket,
        actions: Vec<ClientAction>,
    ) -> Result<Flow, ClientRuntimeError> {
        for action in actions {
            match action {
                ClientAction::Send(frame) => {
                    socket.send(Message::Binary(frame)).await?;
                },

                ClientAction::Ready { version } => {
                    tracing::info!(version, "handshake complete");
                    self.handler.on_ready(version).await;
                },

                ClientAction::PairingRequired => {
                    self.handler.on_pairing_required().await;
                },

                ClientAction::PairResult { success, message } => {
                    self.handler.on_pair_result(success, message).await;
                },

                ClientAction::RpcResult { payload } => {
                    self.handler.on_rpc_result(payload).await;
                },

                ClientAction::Event { payload } => {
                    self.handler.on_event(payload).await;
                },

                ClientAction::ProtocolError { message } => {
                    return Err(ClientRuntimeError::Rejected { message });
                },

                ClientAction::CloseRequested => {
                    if let Err(err) = socket.close(None).await {
                        tracing::debug!(error = %err, "close failed");
                    }
                    return Ok(Flow::Finished);
                },

                ClientAction::HostRestarted => {
                    // The machine already queued the fresh HELLO.
                    tracing::info!("host restarted, re-handshaking");
                },
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_command(
        &mut self,
        socket: &mut Socket,
        command: ClientCommand,
    ) -> Result<(), ClientRuntimeError> {
        let (result, reply) = match command {
            ClientCommand::SendRpc { payload, reply } => {
                (self.machine.send_rpc(&self.env, &self.share.key, payload), reply)
            },
            ClientCommand::SubmitPairingCode { code, reply } => {
                (self.machine.submit_pairing_code(&self.env, &self.share.key, &code), reply)
            },
        };

        match result {
            Ok(actions) => {
                for action in actions {
                    if let ClientAction::Send(frame) = action {
                        socket.send(Message::Binary(frame)).await?;
                    }
                }
                let _ = reply.send(Ok(()));
                Ok(())
            },
            Err(err) => {
                let _ = reply.send(Err(ClientRuntimeError::NotReady));
                if err.is_fatal() { Err(err.into()) } else { Ok(()) }
            },
        }
    }

    /// Reacts to a plaintext relay control frame.
    async fn on_control(
        &mut self,
        socket: &mut Socket,
        text: &str,
    ) -> Result<(), ClientRuntimeError> {
        match RelayControl::parse(text) {
            Some(RelayControl::RelayStatus { status: PeerStatus::HostConnected }) => {
                // A reattached host has a fresh epoch and zeroed counters;
                // nothing from the old connection state survives that.
                tracing::info!("host attached, re-handshaking");
                self.handler.on_relay_status(PeerStatus::HostConnected).await;
                let actions = self.machine.start(&self.env, &self.share.key)?;
                for action in actions {
                    if let ClientAction::Send(frame) = action {
                        socket.send(Message::Binary(frame)).await?;
                    }
                }
            },
            Some(RelayControl::RelayStatus { status: PeerStatus::HostDisconnected }) => {
                tracing::info!("host detached");
                self.handler.on_relay_status(PeerStatus::HostDisconnected).await;
            },
            Some(RelayControl::RelayStatus { status }) => {
                tracing::debug!(?status, "ignoring relay status");
            },
            None => tracing::debug!("unrecognized relay text frame"),
        }
        Ok(())
    }
}

/// Builds the attach URL from a relay URL that may or may not carry a path.
fn attach_url(relay_url: &str, session_id: impl std::fmt::Display) -> String {
    let base = relay_url.trim_end_matches('/');
    format!("{base}/?role=client&session={session_id}")
}
