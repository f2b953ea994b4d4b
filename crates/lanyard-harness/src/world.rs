//! Host and client machines wired back-to-back.

use lanyard_core::{
    ClientAction, ClientConfig, ClientError, ClientMachine, HostAction, HostConfig, HostError,
    HostMachine, Session,
};
use lanyard_crypto::SessionKey;
use lanyard_proto::{Direction, Envelope, ProtoError, build_aad};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::sim_env::SimEnv;

/// A scripted step did not go the way the script expected.
#[derive(Debug, Error)]
pub enum WorldError {
    /// The host machine refused a frame or a seal request.
    #[error(transparent)]
    Host(#[from] HostError),
    /// The client machine refused a frame or a seal request.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// A frame failed out-of-band decryption or decoding.
    #[error("frame inspection failed: {0}")]
    Inspect(String),
    /// A machine returned actions the script did not anticipate.
    #[error("expected a {expected} action")]
    UnexpectedAction {
        /// What the script was waiting for.
        expected: &'static str,
    },
}

/// One session's worth of protocol state with no transport in between:
/// frames produced by one machine are handed directly to the other.
///
/// Everything is driven by a [`SimEnv`], so a given seed replays the same
/// key, epoch, pairing code, nonces, and therefore the same frame bytes.
pub struct SessionWorld {
    /// Deterministic environment shared by both machines.
    pub env: SimEnv,
    /// Host-side session state (key, pairing gate).
    pub session: Session,
    /// The host connection machine.
    pub host: HostMachine,
    /// The client connection machine.
    pub client: ClientMachine,
}

impl SessionWorld {
    /// Builds a world with default protocol knobs.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_configs(seed, HostConfig::default(), ClientConfig::default())
    }

    /// Builds a world with explicit host and client configuration.
    pub fn with_configs(seed: u64, host: HostConfig, client: ClientConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let session = Session::generate(&env);
        let host = HostMachine::new(&env, &session, host);
        let client = ClientMachine::new(session.id(), client);
        Self { env, session, host, client }
    }

    /// The code an operator would read off the host.
    pub fn pairing_code(&self) -> String {
        self.session.pairing_code().to_string()
    }

    /// Starts the client and returns its `HELLO` frame.
    pub fn client_hello(&mut self) -> Result<Vec<u8>, WorldError> {
        let actions = self.client.start(&self.env, self.session.key())?;
        client_frame(&actions)
    }

    /// Delivers a client frame to the host.
    pub fn deliver_to_host(&mut self, frame: &[u8]) -> Result<Vec<HostAction>, WorldError> {
        Ok(self.host.on_frame(&self.env, &mut self.session, frame)?)
    }

    /// Delivers a host frame to the client.
    pub fn deliver_to_client(&mut self, frame: &[u8]) -> Result<Vec<ClientAction>, WorldError> {
        Ok(self.client.on_frame(&self.env, self.session.key(), frame)?)
    }

    /// Runs the full `HELLO`/`HELLO_ACK` exchange and returns the client's
    /// resulting actions (`Ready`, possibly `PairingRequired`).
    pub fn handshake(&mut self) -> Result<Vec<ClientAction>, WorldError> {
        let hello = self.client_hello()?;
        let actions = self.deliver_to_host(&hello)?;
        let ack = host_frame(&actions)?;
        self.deliver_to_client(&ack)
    }

    /// Submits a pairing code end to end and returns the client's view of
    /// the outcome.
    pub fn submit_code(&mut self, code: &str) -> Result<Vec<ClientAction>, WorldError> {
        let actions = self.client.submit_pairing_code(&self.env, self.session.key(), code)?;
        let pair = client_frame(&actions)?;
        let actions = self.deliver_to_host(&pair)?;
        let reply = host_frame(&actions)?;
        self.deliver_to_client(&reply)
    }

    /// Submits the correct pairing code.
    pub fn pair(&mut self) -> Result<Vec<ClientAction>, WorldError> {
        let code = self.pairing_code();
        self.submit_code(&code)
    }

    /// Sends an `RPC` request and returns the host's actions for it.
    pub fn client_rpc(&mut self, payload: Box<RawValue>) -> Result<Vec<HostAction>, WorldError> {
        let actions = self.client.send_rpc(&self.env, self.session.key(), payload)?;
        let frame = client_frame(&actions)?;
        self.deliver_to_host(&frame)
    }

    /// Seals a host-side RPC result and delivers it to the client.
    pub fn host_rpc_reply(
        &mut self,
        payload: Box<RawValue>,
    ) -> Result<Vec<ClientAction>, WorldError> {
        let frame = self.host.seal_rpc_result(&self.env, &self.session, payload)?;
        self.deliver_to_client(&frame)
    }

    /// Decrypts a frame outside either machine, for wire-level assertions.
    ///
    /// The caller names the cryptographic context explicitly; a mismatch
    /// fails the same way an eavesdropper's attempt would.
    pub fn open_frame(
        &self,
        version: u8,
        epoch: Option<&str>,
        dir: Direction,
        frame: &[u8],
    ) -> Result<Envelope, WorldError> {
        open_frame(self.session.key(), &self.session.id().to_string(), version, epoch, dir, frame)
    }
}

/// Extracts the frame from the first `Send` action, ignoring the rest.
pub fn host_frame(actions: &[HostAction]) -> Result<Vec<u8>, WorldError> {
    actions
        .iter()
        .find_map(|action| match action {
            HostAction::Send(frame) => Some(frame.clone()),
            _ => None,
        })
        .ok_or(WorldError::UnexpectedAction { expected: "Send" })
}

/// Extracts the frame from the first `Send` action, ignoring the rest.
pub fn client_frame(actions: &[ClientAction]) -> Result<Vec<u8>, WorldError> {
    actions
        .iter()
        .find_map(|action| match action {
            ClientAction::Send(frame) => Some(frame.clone()),
            _ => None,
        })
        .ok_or(WorldError::UnexpectedAction { expected: "Send" })
}

/// Decrypts and decodes one frame under a single, explicit context.
pub fn open_frame(
    key: &SessionKey,
    session_id: &str,
    version: u8,
    epoch: Option<&str>,
    dir: Direction,
    frame: &[u8],
) -> Result<Envelope, WorldError> {
    let aad = build_aad(session_id, version, epoch, dir);
    let opened = lanyard_crypto::open(key, frame, &[&aad])
        .map_err(|e| WorldError::Inspect(e.to_string()))?;
    Envelope::from_bytes(&opened.plaintext)
        .map_err(|e: ProtoError| WorldError::Inspect(e.to_string()))
}
