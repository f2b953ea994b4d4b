//! Deterministic test harness for the Lanyard protocol machines.
//!
//! Drives the host and client state machines directly against each other,
//! with no relay and no sockets: whatever one machine asks to send is
//! handed to the other in the same call stack. Combined with a seeded
//! [`SimEnv`], entire protocol runs are reproducible down to the frame
//! bytes, which is what the end-to-end and property tests in `tests/`
//! build on.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod sim_env;
mod world;

pub use sim_env::SimEnv;
pub use world::{SessionWorld, WorldError, client_frame, host_frame, open_frame};
