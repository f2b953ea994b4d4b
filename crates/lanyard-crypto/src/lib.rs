//! Lanyard Cryptographic Primitives
//!
//! This crate provides the cryptographic building blocks for the Lanyard
//! relay protocol.
//!
//! # Design
//!
//! All functions in this crate are pure - they have no side effects and
//! produce deterministic outputs given the same inputs. Random bytes required
//! for encryption (the per-frame nonce) must be provided by the caller,
//! enabling:
//!
//! - Deterministic testing with seeded RNG
//! - Sans-IO architecture compatibility
//! - No coupling to application-level abstractions
//!
//! # Security Properties
//!
//! - Confidentiality and integrity: AES-256-GCM over the envelope bytes
//! - Context binding: the AAD commits each frame to one session, protocol
//!   version, direction, and (for v2) connection epoch
//! - Uniform failure: [`open`] reports one error for every authentication
//!   failure, so a relay-positioned observer learns nothing from error shape

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod frame;
pub mod key;

pub use error::CryptoError;
pub use frame::{MIN_FRAME_SIZE, NONCE_SIZE, Opened, TAG_SIZE, open, seal};
pub use key::{KEY_SIZE, SessionKey};
