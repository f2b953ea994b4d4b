//! Lanyard protocol core logic.
//!
//! Pure state machines for both ends of an encrypted relay session,
//! decoupled from I/O. The relay itself never needs this crate; it forwards
//! opaque frames.
//!
//! # Architecture
//!
//! Protocol logic is implemented as deterministic state machines isolated
//! from sockets, time, and randomness. External effects come in through the
//! [`Environment`] trait; state transitions return declarative actions the
//! owning runtime executes. The same machines run unchanged under the
//! production runtimes and the deterministic test harness.
//!
//! # Components
//!
//! - [`channel`]: Per-connection sealing, opening, and frame admission
//! - [`host`]: Host-side machine (negotiation, pairing gate, dispatch)
//! - [`client`]: Client-side machine (handshake, pairing, restart recovery)
//! - [`session`]: Session identity, pairing codes, and the share URL
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`system_env`]: Production environment (OS clock and RNG)
//! - [`backoff`]: Reconnect delay policy shared by both runtimes

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod channel;
pub mod client;
pub mod env;
pub mod error;
pub mod host;
pub mod session;
pub mod system_env;

#[cfg(test)]
mod test_env;

pub use backoff::Backoff;
pub use channel::{Channel, ChannelState, EPOCH_LEN, Inbound, generate_epoch};
pub use client::{ClientAction, ClientConfig, ClientMachine};
pub use env::Environment;
pub use error::{ChannelError, ClientError, HostError, ShareUrlError};
pub use host::{HostAction, HostConfig, HostMachine};
pub use session::{Session, ShareUrl, parse_session_id};
pub use system_env::SystemEnv;
