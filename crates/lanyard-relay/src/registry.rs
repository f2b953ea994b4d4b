//! Session registration table.
//!
//! One [`Registration`] per session id, holding at most one host and one
//! client attachment. All mutation goes through the sharded map so a host's
//! disconnect cleanup cannot race a client's attach.
//!
//! The registry never looks inside forwarded frames. The only messages it
//! originates are [`RelayControl`] status frames and close frames for
//! superseded or swept sockets.

use std::{
    net::IpAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use lanyard_proto::{CloseCode, PeerStatus, RelayControl};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{
    CloseFrame, Message, frame::coding::CloseCode as WsCloseCode,
};
use uuid::{Uuid, Variant};

/// Which end of a session a socket claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The trusted agent end.
    Host,
    /// The operator end.
    Client,
}

impl Role {
    /// Parses the `role` query parameter.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "host" => Some(Self::Host),
            "client" => Some(Self::Client),
            _ => None,
        }
    }

    /// Name used in the query string and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Client => "client",
        }
    }
}

/// Validates the `session` query parameter as a random (v4) UUID.
///
/// Malformed ids are rejected before any registration lookup so the table
/// cannot be probed with garbage.
pub fn parse_session_param(value: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(value).ok()?;
    (id.get_version_num() == 4 && id.get_variant() == Variant::RFC4122).then_some(id)
}

/// One attached socket: the handle to its writer task plus the connection
/// identity used to guard detach against a replaced socket.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Queue consumed by the connection's writer task.
    pub tx: mpsc::Sender<Message>,
    /// Registry-issued connection id.
    pub conn_id: u64,
}

#[derive(Debug)]
struct Registration {
    host: Option<Attachment>,
    client: Option<Attachment>,
    last_active: Instant,
}

impl Registration {
    fn new() -> Self {
        Self { host: None, client: None, last_active: Instant::now() }
    }

    fn slot(&mut self, role: Role) -> &mut Option<Attachment> {
        match role {
            Role::Host => &mut self.host,
            Role::Client => &mut self.client,
        }
    }

    fn peer(&self, role: Role) -> Option<&Attachment> {
        match role {
            Role::Host => self.client.as_ref(),
            Role::Client => self.host.as_ref(),
        }
    }
}

/// Per-source-address abuse ceilings enforced by the registry.
///
/// Concurrent-connection and churn ceilings act at accept time; the
/// throughput ceilings act on every forwarded message. Defaults follow the
/// shipped relay deployment profile.
#[derive(Debug, Clone)]
pub struct TrafficPolicy {
    /// Concurrent connections allowed per address.
    pub max_connections: usize,
    /// New connections accepted per address per minute.
    pub max_new_per_minute: u32,
    /// Forwarded messages per address per second, across its connections.
    pub max_msgs_per_sec: u32,
    /// Forwarded bytes per address per second, across its connections.
    pub max_bytes_per_sec: usize,
}

impl Default for TrafficPolicy {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_new_per_minute: 30,
            max_msgs_per_sec: 100,
            max_bytes_per_sec: 10 * 1024 * 1024,
        }
    }
}

/// Measurement window for the throughput ceilings.
const THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// Measurement window for the new-connection churn ceiling.
const ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

/// Message and byte counters over a fixed one-second window.
#[derive(Debug)]
pub struct Throttle {
    window_start: Instant,
    msgs: u32,
    bytes: usize,
}

impl Throttle {
    /// Creates an empty window starting at `now`.
    pub fn new(now: Instant) -> Self {
        Self { window_start: now, msgs: 0, bytes: 0 }
    }

    /// Counts one message of `len` bytes. `false` means a ceiling is
    /// exceeded and the connection must be closed; the message still
    /// counts, so a flood cannot reset its own window.
    pub fn admit(&mut self, now: Instant, len: usize, max_msgs: u32, max_bytes: usize) -> bool {
        if now.duration_since(self.window_start) >= THROTTLE_WINDOW {
            self.window_start = now;
            self.msgs = 0;
            self.bytes = 0;
        }
        self.msgs = self.msgs.saturating_add(1);
        self.bytes = self.bytes.saturating_add(len);
        self.msgs <= max_msgs && self.bytes <= max_bytes
    }

    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= THROTTLE_WINDOW
    }
}

#[derive(Debug)]
struct AttemptWindow {
    window_start: Instant,
    count: u32,
}

/// Decrements the per-address connection count exactly once, on drop.
#[derive(Debug)]
pub struct IpPermit {
    counts: Arc<DashMap<IpAddr, usize>>,
    ip: IpAddr,
}

impl Drop for IpPermit {
    fn drop(&mut self) {
        let mut empty = false;
        if let Some(mut count) = self.counts.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            empty = *count == 0;
        }
        if empty {
            self.counts.remove_if(&self.ip, |_, count| *count == 0);
        }
    }
}

/// Shared session registration table plus per-address accounting.
#[derive(Debug)]
pub struct Registry {
    sessions: DashMap<Uuid, Registration>,
    per_ip: Arc<DashMap<IpAddr, usize>>,
    attempts: DashMap<IpAddr, AttemptWindow>,
    traffic: DashMap<IpAddr, Throttle>,
    max_sessions: usize,
    policy: TrafficPolicy,
    next_conn_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry with the given ceilings.
    pub fn new(max_sessions: usize, policy: TrafficPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            per_ip: Arc::new(DashMap::new()),
            attempts: DashMap::new(),
            traffic: DashMap::new(),
            max_sessions,
            policy,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Issues a unique connection id.
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of live registrations.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Counts a connection against its source address. `None` means the
    /// ceiling is reached and the connection must be rejected.
    pub fn try_acquire_ip(&self, ip: IpAddr) -> Option<IpPermit> {
        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= self.policy.max_connections {
            return None;
        }
        *count += 1;
        drop(count);
        Some(IpPermit { counts: Arc::clone(&self.per_ip), ip })
    }

    /// Counts a new connection against its address's churn window. `false`
    /// means the address opened too many connections this minute and the
    /// new one must be rejected.
    pub fn admit_attempt(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut window = self
            .attempts
            .entry(ip)
            .or_insert_with(|| AttemptWindow { window_start: now, count: 0 });
        if now.duration_since(window.window_start) >= ATTEMPT_WINDOW {
            window.window_start = now;
            window.count = 0;
        }
        window.count = window.count.saturating_add(1);
        window.count <= self.policy.max_new_per_minute
    }

    /// Counts one forwarded message against its address's shared throughput
    /// window. `false` means the address exceeded a ceiling and the sending
    /// connection must be closed.
    pub fn admit_traffic(&self, ip: IpAddr, len: usize) -> bool {
        let now = Instant::now();
        let mut throttle = self.traffic.entry(ip).or_insert_with(|| Throttle::new(now));
        throttle.admit(now, len, self.policy.max_msgs_per_sec, self.policy.max_bytes_per_sec)
    }

    /// Attaches a socket to its session slot.
    ///
    /// A host may create the registration; a client requires an existing
    /// registration with a host attached. An existing occupant of the slot
    /// is closed as superseded, and the opposite peer (if any) is told the
    /// slot changed hands.
    pub fn attach(
        &self,
        role: Role,
        session_id: Uuid,
        attachment: Attachment,
    ) -> Result<(), CloseCode> {
        match role {
            Role::Host => self.attach_host(session_id, attachment),
            Role::Client => self.attach_client(session_id, attachment),
        }
    }

    fn attach_host(&self, session_id: Uuid, attachment: Attachment) -> Result<(), CloseCode> {
        if !self.sessions.contains_key(&session_id) && self.sessions.len() >= self.max_sessions {
            return Err(CloseCode::RelayFull);
        }

        let mut entry = self.sessions.entry(session_id).or_insert_with(Registration::new);
        let reg = entry.value_mut();
        reg.last_active = Instant::now();
        if let Some(old) = reg.host.replace(attachment) {
            let _ = old.tx.try_send(close_message(CloseCode::Superseded));
        }
        if let Some(client) = &reg.client {
            let _ = client.tx.try_send(status_message(PeerStatus::HostConnected));
        }
        Ok(())
    }

    fn attach_client(&self, session_id: Uuid, attachment: Attachment) -> Result<(), CloseCode> {
        let Some(mut entry) = self.sessions.get_mut(&session_id) else {
            return Err(CloseCode::UnknownSession);
        };
        let reg = entry.value_mut();
        if reg.host.is_none() {
            return Err(CloseCode::UnknownSession);
        }

        reg.last_active = Instant::now();
        if let Some(old) = reg.client.replace(attachment) {
            let _ = old.tx.try_send(close_message(CloseCode::Superseded));
        }
        if let Some(host) = &reg.host {
            let _ = host.tx.try_send(status_message(PeerStatus::ClientConnected));
        }
        Ok(())
    }

    /// Clears a socket's slot and notifies the opposite peer.
    ///
    /// No-op when `conn_id` no longer matches the slot: a superseded socket
    /// must not evict its replacement or emit a spurious disconnect.
    pub fn detach(&self, role: Role, session_id: Uuid, conn_id: u64) {
        let Some(mut entry) = self.sessions.get_mut(&session_id) else {
            return;
        };
        let reg = entry.value_mut();
        if !reg.slot(role).as_ref().is_some_and(|a| a.conn_id == conn_id) {
            return;
        }
        *reg.slot(role) = None;

        let status = match role {
            Role::Host => PeerStatus::HostDisconnected,
            Role::Client => PeerStatus::ClientDisconnected,
        };
        if let Some(peer) = reg.peer(role) {
            let _ = peer.tx.try_send(status_message(status));
        }
    }

    /// Returns the opposite peer's writer handle and refreshes the
    /// registration's activity stamp. `None` when no peer is attached; the
    /// frame is then dropped.
    pub fn forward_target(&self, role: Role, session_id: Uuid) -> Option<mpsc::Sender<Message>> {
        let mut entry = self.sessions.get_mut(&session_id)?;
        let reg = entry.value_mut();
        reg.last_active = Instant::now();
        reg.peer(role).map(|a| a.tx.clone())
    }

    /// Drops registrations that are empty or idle past `idle_horizon`,
    /// closing any sockets still attached. Returns how many were removed.
    pub fn sweep(&self, idle_horizon: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.sessions.retain(|_, reg| {
            let idle = now.duration_since(reg.last_active) > idle_horizon;
            let empty = reg.host.is_none() && reg.client.is_none();
            if idle || empty {
                for attachment in reg.host.iter().chain(reg.client.iter()) {
                    let _ = attachment.tx.try_send(Message::Close(None));
                }
                removed += 1;
                false
            } else {
                true
            }
        });

        // Rate-limit windows for addresses that went quiet.
        self.traffic.retain(|_, throttle| !throttle.expired(now));
        self.attempts
            .retain(|_, window| now.duration_since(window.window_start) < ATTEMPT_WINDOW);

        removed
    }
}

/// Close frame carrying one of the protocol's application close codes.
pub fn close_message(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code: WsCloseCode::from(code.as_u16()),
        reason: code.reason().into(),
    }))
}

fn status_message(status: PeerStatus) -> Message {
    Message::Text(RelayControl::RelayStatus { status }.to_json())
}
