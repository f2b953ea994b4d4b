//! Lanyard relay broker.
//!
//! Pairs one host and one client per session id and forwards their binary
//! frames verbatim. The relay holds no keys and cannot decrypt anything it
//! carries; everything it knows is in the connection query string.
//!
//! ## Architecture
//!
//! ```text
//! lanyard-relay
//!   ├─ Relay         (bind + accept loop + idle sweeper)
//!   ├─ Registry      (session registrations, per-address ceilings)
//!   └─ lanyard-relay (binary: clap args + tracing init)
//! ```
//!
//! Each accepted socket gets a reader loop and a writer task; the writer
//! consumes a queue that the reader, the opposite peer, and the registry all
//! feed. Rejections are WebSocket close codes from
//! [`lanyard_proto::CloseCode`]; peer attach/detach is announced with
//! plaintext [`lanyard_proto::RelayControl`] text frames.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod registry;

use std::{net::IpAddr, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use lanyard_proto::CloseCode;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{Request, Response},
        protocol::{Message, WebSocketConfig},
    },
};
use tracing::{debug, error, info, trace};
use uuid::Uuid;

pub use error::RelayError;
pub use registry::{Attachment, IpPermit, Registry, Role, TrafficPolicy, parse_session_param};

use registry::{Throttle, close_message};

/// Relay runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to (e.g. "0.0.0.0:8080").
    pub bind_address: String,
    /// Concurrent connections allowed per source address.
    pub max_connections_per_ip: usize,
    /// New connections accepted per source address per minute.
    pub max_new_connections_per_ip_per_minute: u32,
    /// Forwarded messages per second a single connection may send.
    pub max_msgs_per_sec_per_connection: u32,
    /// Forwarded bytes per second a single connection may send.
    pub max_bytes_per_sec_per_connection: usize,
    /// Forwarded messages per second per source address, all connections.
    pub max_msgs_per_sec_per_ip: u32,
    /// Forwarded bytes per second per source address, all connections.
    pub max_bytes_per_sec_per_ip: usize,
    /// Registrations allowed before new hosts are turned away.
    pub max_sessions: usize,
    /// Largest accepted WebSocket message; oversize terminates the socket.
    pub max_message_bytes: usize,
    /// Outbound queue depth per connection.
    pub queue_depth: usize,
    /// WebSocket-level ping cadence, keeps NAT mappings warm.
    pub heartbeat_interval: Duration,
    /// How often the idle sweeper runs.
    pub sweep_interval: Duration,
    /// Idle age past which a registration is swept.
    pub idle_horizon: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections_per_ip: 10,
            max_new_connections_per_ip_per_minute: 30,
            max_msgs_per_sec_per_connection: 10,
            max_bytes_per_sec_per_connection: 1024 * 1024,
            max_msgs_per_sec_per_ip: 100,
            max_bytes_per_sec_per_ip: 10 * 1024 * 1024,
            max_sessions: 1000,
            max_message_bytes: 5 * 1024 * 1024,
            queue_depth: 64,
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            idle_horizon: Duration::from_secs(30 * 60),
        }
    }
}

/// The relay broker server.
pub struct Relay {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: Arc<RelayConfig>,
}

impl Relay {
    /// Binds the listener. The server does not accept until [`Relay::run`].
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let policy = TrafficPolicy {
            max_connections: config.max_connections_per_ip,
            max_new_per_minute: config.max_new_connections_per_ip_per_minute,
            max_msgs_per_sec: config.max_msgs_per_sec_per_ip,
            max_bytes_per_sec: config.max_bytes_per_sec_per_ip,
        };
        let registry = Arc::new(Registry::new(config.max_sessions, policy));
        Ok(Self { listener, registry, config: Arc::new(config) })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the process is stopped.
    pub async fn run(self) -> Result<(), RelayError> {
        info!("relay listening on {}", self.listener.local_addr()?);

        let sweeper = Arc::clone(&self.registry);
        let sweep_interval = self.config.sweep_interval;
        let idle_horizon = self.config.idle_horizon;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                let removed = sweeper.sweep(idle_horizon);
                if removed > 0 {
                    debug!(removed, "swept idle registrations");
                }
            }
        });

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let registry = Arc::clone(&self.registry);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        if let Err(err) =
                            handle_connection(stream, peer_addr.ip(), registry, config).await
                        {
                            debug!(error = %err, "connection ended with error");
                        }
                    });
                },
                Err(err) => {
                    error!(error = %err, "accept failed");
                },
            }
        }
    }
}

fn parse_params(query: &str) -> Option<(Role, Uuid)> {
    let mut role = None;
    let mut session = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("role", value)) => role = Role::parse(value),
            Some(("session", value)) => session = parse_session_param(value),
            _ => {},
        }
    }
    Some((role?, session?))
}

/// Serves one socket from WebSocket upgrade to detach.
///
/// The reader owns the connection lifecycle; the writer task drains the
/// outbound queue and fires the kill signal once it has written a close
/// frame, which is how superseded and swept sockets get torn down.
async fn handle_connection(
    stream: TcpStream,
    peer_ip: IpAddr,
    registry: Arc<Registry>,
    config: Arc<RelayConfig>,
) -> Result<(), RelayError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_bytes);
    ws_config.max_frame_size = Some(config.max_message_bytes);

    let mut query: Option<String> = None;
    let callback = |request: &Request, response: Response| {
        query = request.uri().query().map(str::to_string);
        Ok(response)
    };
    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config)).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let conn_id = registry.next_conn_id();

    let Some(_permit) = registry.try_acquire_ip(peer_ip) else {
        debug!(conn_id, %peer_ip, "per-address ceiling reached");
        let _ = ws_tx.send(close_message(CloseCode::TooManyConnections)).await;
        return Ok(());
    };

    if !registry.admit_attempt(peer_ip) {
        debug!(conn_id, %peer_ip, "connection churn ceiling reached");
        let _ = ws_tx.send(close_message(CloseCode::RateLimited)).await;
        return Ok(());
    }

    let Some((role, session_id)) = query.as_deref().and_then(parse_params) else {
        debug!(conn_id, "invalid connection parameters");
        let _ = ws_tx.send(close_message(CloseCode::InvalidParams)).await;
        return Ok(());
    };

    let (tx, mut rx) = mpsc::channel::<Message>(config.queue_depth);
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_tx.send(message).await.is_err() {
                break;
            }
            if closing {
                let _ = kill_tx.send(());
                break;
            }
        }
    });

    if let Err(code) = registry.attach(role, session_id, Attachment { tx: tx.clone(), conn_id }) {
        debug!(conn_id, role = role.as_str(), code = code.as_u16(), "attach rejected");
        let _ = tx.send(close_message(code)).await;
        return Ok(());
    }
    debug!(conn_id, role = role.as_str(), "attached");

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    // The first tick fires immediately and sends the initial ping.
    let mut alive = true;
    let mut throttle = Throttle::new(std::time::Instant::now());

    loop {
        tokio::select! {
            _ = &mut kill_rx => break,
            _ = heartbeat.tick() => {
                if !alive {
                    debug!(conn_id, "no pong since last ping, terminating");
                    break;
                }
                alive = false;
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Binary(frame))) => {
                    let now = std::time::Instant::now();
                    let within_connection = throttle.admit(
                        now,
                        frame.len(),
                        config.max_msgs_per_sec_per_connection,
                        config.max_bytes_per_sec_per_connection,
                    );
                    if !within_connection || !registry.admit_traffic(peer_ip, frame.len()) {
                        debug!(conn_id, %peer_ip, "throughput ceiling exceeded");
                        let _ = tx.send(close_message(CloseCode::RateLimited)).await;
                        continue;
                    }
                    match registry.forward_target(role, session_id) {
                        Some(peer) => {
                            if peer.send(Message::Binary(frame)).await.is_err() {
                                trace!(conn_id, "peer writer gone, frame dropped");
                            }
                        },
                        None => trace!(conn_id, "no peer attached, frame dropped"),
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = tx.try_send(Message::Pong(payload));
                },
                Some(Ok(Message::Pong(_))) => alive = true,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {},
                Some(Err(err)) => {
                    debug!(conn_id, error = %err, "socket error");
                    break;
                },
            },
        }
    }

    registry.detach(role, session_id, conn_id);
    debug!(conn_id, role = role.as_str(), "detached");
    Ok(())
}
