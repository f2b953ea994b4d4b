//! Lanyard host agent runtime.
//!
//! Owns the long-lived [`Session`], attaches to the relay under the `host`
//! role, and drives the sans-IO [`HostMachine`] over the socket: inbound
//! frames become machine calls, machine actions become socket writes, and
//! decrypted `RPC` payloads go to the embedding application's
//! [`ToolExecutor`].
//!
//! ## Architecture
//!
//! ```text
//! lanyard-host
//!   ├─ HostRuntime     (reconnect loop, action execution)
//!   ├─ HostHandle      (push_event from application tasks)
//!   └─ ToolExecutor    (application collaborator, async-trait)
//! ```
//!
//! The relay learns nothing beyond the session id in the query string.
//! Everything the machine seals leaves this process as ciphertext; the
//! share URL fragment carrying the key goes to the operator out of band.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod executor;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lanyard_core::{
    Backoff, Environment, HostAction, HostConfig, HostMachine, Session, ShareUrl, SystemEnv,
};
use lanyard_proto::{PeerStatus, RelayControl};
use serde_json::value::RawValue;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode as WsCloseCode},
};

pub use error::HostRuntimeError;
pub use executor::ToolExecutor;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands queued by [`HostHandle`] callers between inbound frames.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Host runtime configuration.
#[derive(Debug, Clone)]
pub struct HostRuntimeConfig {
    /// WebSocket URL of the relay, without query parameters.
    pub relay_url: String,
    /// Protocol knobs for the connection machine.
    pub machine: HostConfig,
    /// First reconnect delay; doubles each failed attempt.
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling.
    pub backoff_cap: Duration,
}

impl Default for HostRuntimeConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080".to_string(),
            machine: HostConfig::default(),
            backoff_initial: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

enum HostCommand {
    PushEvent {
        payload: Box<RawValue>,
        reply: oneshot::Sender<Result<(), HostRuntimeError>>,
    },
}

/// Cloneable handle into a running [`HostRuntime`].
#[derive(Clone)]
pub struct HostHandle {
    commands: mpsc::Sender<HostCommand>,
}

impl HostHandle {
    /// Seals `payload` as an `EVENT` for the attached client.
    ///
    /// # Errors
    ///
    /// [`HostRuntimeError::NotReady`] when no paired, ready client is
    /// attached; [`HostRuntimeError::Stopped`] when the runtime is gone or
    /// the connection dropped mid-push.
    pub async fn push_event(&self, payload: Box<RawValue>) -> Result<(), HostRuntimeError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(HostCommand::PushEvent { payload, reply })
            .await
            .map_err(|_| HostRuntimeError::Stopped)?;
        answer.await.map_err(|_| HostRuntimeError::Stopped)?
    }
}

/// Host agent runtime.
///
/// Generates its [`Session`] at construction; the session, and with it the
/// pairing state, lives exactly as long as this value. [`HostRuntime::run`]
/// reconnects forever with exponential backoff and drives a fresh
/// [`HostMachine`] (fresh epoch) per physical connection.
pub struct HostRuntime<X: ToolExecutor> {
    env: SystemEnv,
    session: Session,
    config: HostRuntimeConfig,
    executor: X,
    commands: mpsc::Receiver<HostCommand>,
    handle: mpsc::Sender<HostCommand>,
}

impl<X: ToolExecutor> HostRuntime<X> {
    /// Creates a runtime around a freshly generated session.
    pub fn new(config: HostRuntimeConfig, executor: X) -> Self {
        let env = SystemEnv::new();
        let session = Session::generate(&env);
        let (handle, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Self { env, session, config, executor, commands, handle }
    }

    /// The session this host serves. Carries the pairing code the operator
    /// must be shown.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Share URL fragment handed to the operator out of band.
    pub fn share_url(&self) -> String {
        ShareUrl::format(&self.session, &self.config.relay_url)
    }

    /// Handle for pushing events from other tasks.
    pub fn handle(&self) -> HostHandle {
        HostHandle { commands: self.handle.clone() }
    }

    /// Runs the reconnect loop. Does not return during normal operation;
    /// connection failures of every kind are logged and retried.
    pub async fn run(mut self) -> Result<(), HostRuntimeError> {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_cap);
        let url = attach_url(&self.config.relay_url, self.session.id());

        loop {
            match connect_async(&url).await {
                Ok((socket, _response)) => {
                    backoff.reset();
                    tracing::info!(session = %self.session.id(), "attached to relay");
                    match self.drive(socket).await {
                        Ok(()) => tracing::info!("relay connection closed"),
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
    async fn drive(&mut self, mut socket: Socket) -> Result<(), HostRuntimeError> {
        let mut machine = HostMachine::new(&self.env, &self.session, self.config.machine);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    if let Some(command) = command {
                        self.on_command(&mut machine, &mut socket, command).await?;
                    }
                }
                message = socket.next() => match message {
                    Some(Ok(Message::Binary(frame))) => {
                        if !self.on_frame(&mut machine, &mut socket, &frame).await? {
                            return Ok(());
                        }
                    },
                    Some(Ok(Message::Text(text))) => self.on_control(&mut machine, &text),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        tracing::info!(?code, "relay closed the connection");
                        return Ok(());
                    },
                    // Transport keepalive; tungstenite answers pings itself.
                    Some(Ok(_)) => {},
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        tracing::debug!("relay socket ended");
                        return Ok(());
                    },
                },
            }
        }
    }

    /// Feeds one inbound frame through the machine and executes the
    /// resulting actions. Returns `false` once an action closed the socket.
    async fn on_frame(
        &mut self,
        machine: &mut HostMachine,
        socket: &mut Socket,
        frame: &[u8],
    ) -> Result<bool, HostRuntimeError> {
        match machine.on_frame(&self.env, &mut self.session, frame) {
            Ok(actions) => self.apply_actions(machine, socket, actions).await,
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                tracing::warn!(session = %self.session.id(), error = %err, "frame dropped");
                Ok(true)
            },
        }
    }

    async fn apply_actions(
        &mut self,
        machine: &mut HostMachine,
        socket: &mut Socket,
        actions: Vec<HostAction>,
    ) -> Result<bool, HostRuntimeError> {
        for action in actions {
            match action {
                HostAction::Send(frame) => {
                    socket.send(Message::Binary(frame)).await?;
                },

                HostAction::Close { code } => {
                    let frame = CloseFrame {
                        code: WsCloseCode::from(code.as_u16()),
                        reason: code.reason().into(),
                    };
                    if let Err(err) = socket.close(Some(frame)).await {
                        tracing::debug!(error = %err, "close failed");
                    }
                    return Ok(false);
                },

                HostAction::Execute { payload } => {
                    let mut results = self.executor.execute(payload).await;
                    // Only the final incremental result travels back.
                    if let Some(result) = results.pop() {
                        let frame = machine.seal_rpc_result(&self.env, &self.session, result)?;
                        socket.send(Message::Binary(frame)).await?;
                    } else {
                        tracing::debug!("executor returned no result");
                    }
                },

                HostAction::Paired => {
                    tracing::info!(session = %self.session.id(), "client paired");
                },

                HostAction::CloseRequested => {
                    // The client is leaving this connection, not the
                    // session. Rotate the epoch and await the next HELLO.
                    tracing::info!("client requested close");
                    machine.reset(&self.env);
                },
            }
        }
        Ok(true)
    }

    async fn on_command(
        &mut self,
        machine: &mut HostMachine,
        socket: &mut Socket,
        command: HostCommand,
    ) -> Result<(), HostRuntimeError> {
        match command {
            HostCommand::PushEvent { payload, reply } => {
                match machine.seal_event(&self.env, &self.session, payload) {
                    Ok(frame) => {
                        socket.send(Message::Binary(frame)).await?;
                        let _ = reply.send(Ok(()));
                    },
                    Err(err) => {
                        let _ = reply.send(Err(HostRuntimeError::NotReady));
                        if err.is_fatal() {
                            return Err(err.into());
                        }
                    },
                }
            },
        }
        Ok(())
    }

    /// Reacts to a plaintext relay control frame.
    fn on_control(&self, machine: &mut HostMachine, text: &str) {
        match RelayControl::parse(text) {
            Some(RelayControl::RelayStatus { status: PeerStatus::ClientConnected }) => {
                // A reconnecting client sends HELLO at seq 1; only a fresh
                // channel admits that.
                tracing::info!("client attached, rotating epoch");
                machine.reset(&self.env);
            },
            Some(RelayControl::RelayStatus { status: PeerStatus::ClientDisconnected }) => {
                tracing::info!("client detached");
            },
            Some(RelayControl::RelayStatus { status }) => {
                tracing::debug!(?status, "ignoring relay status");
            },
            None => tracing::debug!("unrecognized relay text frame"),
        }
    }
}

/// Builds the attach URL from a relay URL that may or may not carry a path.
fn attach_url(relay_url: &str, session_id: impl std::fmt::Display) -> String {
    let base = relay_url.trim_end_matches('/');
    format!("{base}/?role=host&session={session_id}")
}
