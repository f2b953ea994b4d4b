//! Session key material.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size in bytes of a session key (AES-256).
pub const KEY_SIZE: usize = 32;

/// Symmetric key shared by the host and client of one session.
///
/// The key never transits the relay. The host embeds it in the share URL
/// fragment, and the client reads it back out locally. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Borrows the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey(<redacted {KEY_SIZE} bytes>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_key_bytes() {
        let key = SessionKey::from_bytes([0xAB; KEY_SIZE]);
        let debug = format!("{key:?}");
        assert!(!debug.contains("171"));
        assert!(!debug.to_lowercase().contains("ab"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn round_trips_raw_bytes() {
        let bytes = [7u8; KEY_SIZE];
        let key = SessionKey::from_bytes(bytes);
        assert_eq!(key.as_bytes(), &bytes);
    }
}
