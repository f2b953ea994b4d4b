//! Per-connection encrypted channel.
//!
//! A [`Channel`] is the connection-scoped half of the protocol state: the
//! negotiated version, the connection epoch, and both sequence counters. It
//! seals outbound envelopes and opens-and-admits inbound frames; the role
//! logic that decides *what* to send lives in the host and client machines.
//!
//! A channel is created fresh for every physical connection and never
//! resumes a predecessor's sequence space.

use lanyard_crypto::{NONCE_SIZE, SessionKey};
use lanyard_proto::{Direction, Envelope, MessageKind, PROTOCOL_V1, PROTOCOL_V2, build_aad};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::{env::Environment, error::ChannelError};

/// Handshake progress. `Ready` is terminal for the life of the underlying
/// connection; re-handshaking requires a replacement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Nothing admitted yet; the next inbound frame must be the handshake.
    WaitHello,
    /// Handshake complete; exactly one AAD context on each direction.
    Ready,
}

/// Characters in a rendered connection epoch (8 random bytes as hex).
pub const EPOCH_LEN: usize = 16;

/// Generates a fresh connection epoch.
pub fn generate_epoch<E: Environment>(env: &E) -> String {
    format!("{:016x}", env.random_u64())
}

/// An admitted inbound envelope plus the protocol version of the AAD
/// candidate that authenticated it.
#[derive(Debug)]
pub struct Inbound {
    /// The envelope, already past direction/sequence/epoch admission.
    pub envelope: Envelope,
    /// Version of the context the sender sealed under. Only meaningful
    /// during the handshake, where the receiver trials candidates.
    pub used_version: u8,
}

/// Connection-scoped codec context and admission state.
#[derive(Debug)]
pub struct Channel {
    session_id: Uuid,
    inbound_dir: Direction,
    state: ChannelState,
    version: u8,
    epoch: Option<String>,
    inbound_max_seq: u64,
    outbound_seq: u64,
}

impl Channel {
    /// Host-side channel. The host fixes its epoch at connection start so
    /// the epoch-bound AAD candidate exists before the first frame arrives.
    pub fn host(session_id: Uuid, epoch: String) -> Self {
        Self {
            session_id,
            inbound_dir: Direction::C2h,
            state: ChannelState::WaitHello,
            version: PROTOCOL_V2,
            epoch: Some(epoch),
            inbound_max_seq: 0,
            outbound_seq: 0,
        }
    }

    /// Client-side channel. The epoch stays unknown until the handshake
    /// acknowledgement delivers it.
    pub fn client(session_id: Uuid) -> Self {
        Self {
            session_id,
            inbound_dir: Direction::H2c,
            state: ChannelState::WaitHello,
            version: PROTOCOL_V2,
            epoch: None,
            inbound_max_seq: 0,
            outbound_seq: 0,
        }
    }

    /// Session this channel belongs to.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current handshake state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Negotiated (or, before negotiation, default) protocol version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The connection epoch, if this side knows one.
    pub fn epoch(&self) -> Option<&str> {
        self.epoch.as_deref()
    }

    /// Highest admitted inbound sequence number.
    pub fn inbound_max_seq(&self) -> u64 {
        self.inbound_max_seq
    }

    /// Last assigned outbound sequence number.
    pub fn outbound_seq(&self) -> u64 {
        self.outbound_seq
    }

    /// Fixes the protocol version. Dropping below v2 discards the epoch,
    /// since epoch binding only exists there.
    pub fn set_version(&mut self, version: u8) {
        self.version = version;
        if version != PROTOCOL_V2 {
            self.epoch = None;
        }
    }

    /// Installs the epoch learned from the handshake acknowledgement.
    pub fn set_epoch(&mut self, epoch: Option<String>) {
        self.epoch = epoch;
    }

    /// Marks the handshake complete.
    pub fn mark_ready(&mut self) {
        self.state = ChannelState::Ready;
    }

    /// Seals an outbound envelope at the next sequence number.
    ///
    /// Handshake-phase frames (state `WaitHello`) seal under the epoch-less
    /// bootstrap AAD both sides can compute before negotiation; everything
    /// after `mark_ready` seals under the single steady context.
    pub fn seal<E: Environment>(
        &mut self,
        env: &E,
        key: &SessionKey,
        kind: MessageKind,
        payload: Option<Box<RawValue>>,
    ) -> Result<Vec<u8>, ChannelError> {
        let dir = self.inbound_dir.flip();
        let seq = self.outbound_seq + 1;
        let envelope = Envelope {
            v: self.version,
            kind,
            dir,
            seq,
            ts: env.unix_millis(),
            epoch: self.outbound_epoch(),
            payload,
        };

        let aad = match self.state {
            ChannelState::WaitHello => self.bootstrap_aad(dir),
            ChannelState::Ready => self.steady_aad(dir),
        };
        let mut nonce = [0u8; NONCE_SIZE];
        env.random_bytes(&mut nonce);

        let frame = lanyard_crypto::seal(key, nonce, &aad, &envelope.to_bytes()?)?;
        // Burn the sequence number only once the frame actually exists.
        self.outbound_seq = seq;
        Ok(frame)
    }

    /// Opens an inbound frame and runs admission on the envelope.
    ///
    /// In `WaitHello` the host (inbound `c2h`) cannot yet know which
    /// version the peer sealed under, so it trials the epoch-bound v2
    /// context first and the v1 bootstrap second; the client expects only
    /// the bootstrap context. Once `Ready`, both sides compute exactly one
    /// AAD.
    ///
    /// Admission checks direction, then sequence, then (v2, post-handshake)
    /// epoch; a failed frame leaves all counters untouched.
    pub fn open(&mut self, key: &SessionKey, frame: &[u8]) -> Result<Inbound, ChannelError> {
        let candidates = self.inbound_candidates();
        let aads: Vec<&str> = candidates.iter().map(|(_, aad)| aad.as_str()).collect();

        let opened = lanyard_crypto::open(key, frame, &aads)?;
        let used_version =
            candidates.get(opened.aad_index).map_or(self.version, |(version, _)| *version);

        let envelope = Envelope::from_bytes(&opened.plaintext)?;
        self.admit(&envelope)?;
        Ok(Inbound { envelope, used_version })
    }

    fn admit(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        if envelope.dir != self.inbound_dir {
            return Err(ChannelError::Direction { got: envelope.dir });
        }

        let expected = self.inbound_max_seq + 1;
        if envelope.seq != expected {
            return Err(ChannelError::Sequence { expected, got: envelope.seq });
        }

        if self.state == ChannelState::Ready
            && self.version == PROTOCOL_V2
            && envelope.epoch.as_deref() != self.epoch.as_deref()
        {
            return Err(ChannelError::Epoch);
        }

        self.inbound_max_seq = envelope.seq;
        Ok(())
    }

    fn inbound_candidates(&self) -> Vec<(u8, String)> {
        match self.state {
            ChannelState::WaitHello if self.inbound_dir == Direction::C2h => vec![
                (PROTOCOL_V2, self.steady_aad(self.inbound_dir)),
                (PROTOCOL_V1, self.bootstrap_aad(self.inbound_dir)),
            ],
            ChannelState::WaitHello => vec![(PROTOCOL_V1, self.bootstrap_aad(self.inbound_dir))],
            ChannelState::Ready => vec![(self.version, self.steady_aad(self.inbound_dir))],
        }
    }

    fn bootstrap_aad(&self, dir: Direction) -> String {
        build_aad(&self.session_id.to_string(), PROTOCOL_V1, None, dir)
    }

    fn steady_aad(&self, dir: Direction) -> String {
        build_aad(&self.session_id.to_string(), self.version, self.epoch.as_deref(), dir)
    }

    fn outbound_epoch(&self) -> Option<String> {
        if self.state == ChannelState::Ready && self.version == PROTOCOL_V2 {
            self.epoch.clone()
        } else {
            None
        }
    }
}
