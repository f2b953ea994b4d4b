//! Additional-authenticated-data string construction.
//!
//! The AAD is never transmitted. Both peers recompute it from connection
//! context and feed it into the AEAD, so a frame only decrypts when sender
//! and receiver agree on version, session, epoch, and direction. Any drift
//! in one component fails authentication instead of silently accepting a
//! frame under wrong metadata.

use crate::{PROTOCOL_V2, envelope::Direction};

/// Domain separation tag, first component of every AAD string.
pub const DOMAIN_TAG: &str = "lanyard-relay";

/// Build the AAD string for one frame.
///
/// Format: `<tag>|v=<version>|session=<uuid>[|epoch=<hex>]|dir=<c2h|h2c>`.
/// The epoch component is included only for version 2 with a known epoch;
/// version 1 and the handshake bootstrap phase omit it.
pub fn build_aad(session_id: &str, version: u8, epoch: Option<&str>, dir: Direction) -> String {
    match epoch {
        Some(epoch) if version == PROTOCOL_V2 => {
            format!("{DOMAIN_TAG}|v={version}|session={session_id}|epoch={epoch}|dir={dir}")
        },
        _ => format!("{DOMAIN_TAG}|v={version}|session={session_id}|dir={dir}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "c0ffee00-1234-4abc-8def-000011112222";

    #[test]
    fn v1_aad_has_no_epoch() {
        let aad = build_aad(SESSION, 1, None, Direction::C2h);
        assert_eq!(aad, format!("lanyard-relay|v=1|session={SESSION}|dir=c2h"));
    }

    #[test]
    fn v2_aad_includes_epoch() {
        let aad = build_aad(SESSION, 2, Some("00112233aabbccdd"), Direction::H2c);
        assert_eq!(
            aad,
            format!("lanyard-relay|v=2|session={SESSION}|epoch=00112233aabbccdd|dir=h2c")
        );
    }

    #[test]
    fn epoch_ignored_outside_v2() {
        // A v1 frame never binds an epoch even if the caller has one lying
        // around from an earlier connection.
        let aad = build_aad(SESSION, 1, Some("00112233aabbccdd"), Direction::C2h);
        assert!(!aad.contains("epoch"));
    }

    #[test]
    fn direction_changes_aad() {
        let c2h = build_aad(SESSION, 2, Some("aa"), Direction::C2h);
        let h2c = build_aad(SESSION, 2, Some("aa"), Direction::H2c);
        assert_ne!(c2h, h2c);
    }
}
