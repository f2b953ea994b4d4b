//! Sealing and opening of envelope frames.
//!
//! Wire layout of a sealed frame:
//!
//! ```text
//! nonce (12 bytes) || tag (16 bytes) || ciphertext
//! ```
//!
//! The AAD string is never transmitted. Both peers rebuild it from
//! connection state, so a frame only opens when sender and receiver agree
//! on session, protocol version, direction, and (for v2) epoch.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, key::SessionKey};

/// Size in bytes of the AES-GCM nonce prefix.
pub const NONCE_SIZE: usize = 12;

/// Size in bytes of the GCM authentication tag.
pub const TAG_SIZE: usize = 16;

/// Smallest well-formed frame: a nonce and a tag over an empty plaintext.
pub const MIN_FRAME_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Result of successfully opening a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Recovered plaintext.
    pub plaintext: Vec<u8>,
    /// Index into the candidate AAD slice that authenticated the frame.
    ///
    /// Handshake receivers try several contexts (v2-with-epoch first, then
    /// v1). The index tells them which one the sender actually used.
    pub aad_index: usize,
}

/// Seals `plaintext` under `key` and `aad` with a caller-provided nonce.
///
/// The nonce must be fresh random bytes for every frame. Nonce generation
/// lives with the caller so this function stays deterministic.
pub fn seal(
    key: &SessionKey,
    nonce: [u8; NONCE_SIZE],
    aad: &str,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: aad.as_bytes() })
        .map_err(|_| CryptoError::EncryptFailed)?;

    // The cipher emits ciphertext || tag. The wire wants nonce || tag ||
    // ciphertext, so move the trailing tag in front of the ciphertext.
    let boundary = sealed.len() - TAG_SIZE;
    let mut frame = Vec::with_capacity(NONCE_SIZE + sealed.len());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&sealed[boundary..]);
    frame.extend_from_slice(&sealed[..boundary]);
    Ok(frame)
}

/// Opens a sealed frame, trying each candidate AAD in order.
///
/// Returns the plaintext together with the index of the AAD that verified.
/// Every failure mode collapses into [`CryptoError::DecryptFailed`] so
/// callers cannot leak why a frame was rejected.
pub fn open(
    key: &SessionKey,
    frame: &[u8],
    candidate_aads: &[&str],
) -> Result<Opened, CryptoError> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(CryptoError::FrameTooShort { len: frame.len() });
    }

    let (nonce, rest) = frame.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);

    // Restore the cipher's native ciphertext || tag ordering.
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    for (aad_index, aad) in candidate_aads.iter().enumerate() {
        if let Ok(plaintext) = cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: &sealed, aad: aad.as_bytes() })
        {
            return Ok(Opened { plaintext, aad_index });
        }
    }
    Err(CryptoError::DecryptFailed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_key() -> SessionKey {
        SessionKey::from_bytes([0x42; 32])
    }

    const AAD_V2: &str = "lanyard-relay|v=2|session=s|epoch=00aa11bb22cc33dd|dir=c2h";
    const AAD_V1: &str = "lanyard-relay|v=1|session=s|dir=c2h";

    #[test]
    fn seal_open_round_trip() {
        let key = test_key();
        let frame = seal(&key, [1; NONCE_SIZE], AAD_V2, b"hello relay").unwrap();
        let opened = open(&key, &frame, &[AAD_V2]).unwrap();

        assert_eq!(opened.plaintext, b"hello relay");
        assert_eq!(opened.aad_index, 0);
    }

    #[test]
    fn frame_layout_is_nonce_tag_ciphertext() {
        let key = test_key();
        let nonce = [7; NONCE_SIZE];
        let frame = seal(&key, nonce, AAD_V1, b"abc").unwrap();

        assert_eq!(&frame[..NONCE_SIZE], &nonce);
        assert_eq!(frame.len(), NONCE_SIZE + TAG_SIZE + 3);
    }

    #[test]
    fn empty_plaintext_is_minimum_frame() {
        let key = test_key();
        let frame = seal(&key, [0; NONCE_SIZE], AAD_V1, b"").unwrap();

        assert_eq!(frame.len(), MIN_FRAME_SIZE);
        assert_eq!(open(&key, &frame, &[AAD_V1]).unwrap().plaintext, b"");
    }

    #[test]
    fn wrong_key_fails_uniformly() {
        let frame = seal(&test_key(), [1; NONCE_SIZE], AAD_V1, b"secret").unwrap();
        let other = SessionKey::from_bytes([0x43; 32]);

        assert_eq!(open(&other, &frame, &[AAD_V1]), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn aad_mismatch_fails() {
        let key = test_key();
        let frame = seal(&key, [1; NONCE_SIZE], AAD_V2, b"payload").unwrap();

        // Direction flipped.
        let flipped = AAD_V2.replace("dir=c2h", "dir=h2c");
        assert_eq!(open(&key, &frame, &[flipped.as_str()]), Err(CryptoError::DecryptFailed));

        // Different epoch.
        let rotated = AAD_V2.replace("00aa11bb22cc33dd", "ffeeddccbbaa9988");
        assert_eq!(open(&key, &frame, &[rotated.as_str()]), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn candidate_index_reports_which_aad_matched() {
        let key = test_key();
        let v1_frame = seal(&key, [9; NONCE_SIZE], AAD_V1, b"legacy").unwrap();

        let opened = open(&key, &v1_frame, &[AAD_V2, AAD_V1]).unwrap();
        assert_eq!(opened.aad_index, 1);
        assert_eq!(opened.plaintext, b"legacy");

        let v2_frame = seal(&key, [9; NONCE_SIZE], AAD_V2, b"current").unwrap();
        assert_eq!(open(&key, &v2_frame, &[AAD_V2, AAD_V1]).unwrap().aad_index, 0);
    }

    #[test]
    fn no_candidates_fails_closed() {
        let key = test_key();
        let frame = seal(&key, [1; NONCE_SIZE], AAD_V1, b"x").unwrap();

        assert_eq!(open(&key, &frame, &[]), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn tampered_frame_fails() {
        let key = test_key();
        let frame = seal(&key, [1; NONCE_SIZE], AAD_V1, b"integrity matters").unwrap();

        // Flip one bit in each region of the frame.
        for index in [0, NONCE_SIZE, NONCE_SIZE + TAG_SIZE, frame.len() - 1] {
            let mut tampered = frame.clone();
            tampered[index] ^= 0x01;
            assert_eq!(
                open(&key, &tampered, &[AAD_V1]),
                Err(CryptoError::DecryptFailed),
                "bit flip at {index} was not rejected",
            );
        }
    }

    #[test]
    fn short_frame_is_rejected_before_decryption() {
        let key = test_key();

        assert_eq!(open(&key, &[], &[AAD_V1]), Err(CryptoError::FrameTooShort { len: 0 }));
        assert_eq!(
            open(&key, &[0; MIN_FRAME_SIZE - 1], &[AAD_V1]),
            Err(CryptoError::FrameTooShort { len: MIN_FRAME_SIZE - 1 }),
        );
    }

    proptest! {
        #[test]
        fn round_trips_arbitrary_plaintext(
            plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
            nonce in any::<[u8; NONCE_SIZE]>(),
            key_bytes in any::<[u8; 32]>(),
        ) {
            let key = SessionKey::from_bytes(key_bytes);
            let frame = seal(&key, nonce, AAD_V2, &plaintext).unwrap();
            let opened = open(&key, &frame, &[AAD_V2]).unwrap();
            prop_assert_eq!(opened.plaintext, plaintext);
        }

        #[test]
        fn open_never_panics_on_garbage(frame in proptest::collection::vec(any::<u8>(), 0..256)) {
            let key = test_key();
            let _ = open(&key, &frame, &[AAD_V1, AAD_V2]);
        }
    }
}
