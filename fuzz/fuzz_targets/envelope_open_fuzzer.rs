//! Fuzz target for the sealed-frame codec
//!
//! Exercise [`open`] against adversarial bytes and tampered frames.
//!
//! # Strategy
//!
//! - Raw garbage: arbitrary byte strings, including ones shorter than the
//!   minimum frame layout
//! - Candidate lists: arbitrary AAD sets, empty lists included
//! - Round trips: seal under one context, open against a candidate list
//!   containing it
//! - Tampering: flip a single bit anywhere in a valid frame
//!
//! # Invariants
//!
//! - NEVER panic, whatever the input bytes
//! - A frame sealed under some AAD opens when that AAD is among the
//!   candidates, yielding the original plaintext and the matching index
//! - Any single-bit modification of a sealed frame fails authentication
//! - Opening with an unrelated key fails authentication

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lanyard_crypto::{NONCE_SIZE, SessionKey, open, seal};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    key: [u8; 32],
    other_key: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    aads: Vec<String>,
    aad_pick: usize,
    plaintext: Vec<u8>,
    garbage: Vec<u8>,
    flip_bit: usize,
}

fuzz_target!(|input: FuzzInput| {
    let key = SessionKey::from_bytes(input.key);

    let candidates: Vec<&str> = input.aads.iter().map(String::as_str).collect();

    // Arbitrary bytes must be rejected without panicking. A forged frame
    // passing GCM authentication would be a miracle worth crashing over.
    if !input.garbage.is_empty() || candidates.is_empty() {
        assert!(open(&key, &input.garbage, &candidates).is_err());
    }

    let Some(seal_aad) = input.aads.get(input.aad_pick % input.aads.len().max(1)) else {
        return;
    };

    let frame = match seal(&key, input.nonce, seal_aad, &input.plaintext) {
        Ok(frame) => frame,
        Err(_) => return,
    };

    let opened = open(&key, &frame, &candidates).expect("sealed frame must open");
    assert_eq!(opened.plaintext, input.plaintext);
    assert_eq!(input.aads[opened.aad_index], *seal_aad);

    // One flipped bit anywhere (nonce, tag, or ciphertext) must break
    // authentication.
    let mut tampered = frame.clone();
    let bit = input.flip_bit % (tampered.len() * 8);
    tampered[bit / 8] ^= 1 << (bit % 8);
    assert!(open(&key, &tampered, &candidates).is_err());

    if input.other_key != input.key {
        let other = SessionKey::from_bytes(input.other_key);
        assert!(open(&other, &frame, &candidates).is_err());
    }
});
