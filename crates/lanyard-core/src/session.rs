//! Host-side session state and the share URL that hands it to a client.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use lanyard_crypto::{KEY_SIZE, SessionKey};
use uuid::Uuid;

use crate::{env::Environment, error::ShareUrlError};

/// Long-lived session owned by the host process.
///
/// Holds the symmetric key and the pairing state that survive across
/// physical connections. Dies with the host process; there is no
/// persistence.
pub struct Session {
    id: Uuid,
    key: SessionKey,
    pairing_code: String,
    pairing_required: bool,
}

impl Session {
    /// Creates a session with a fresh id, key, and pairing code.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut id_bytes = [0u8; 16];
        env.random_bytes(&mut id_bytes);
        let id = uuid::Builder::from_random_bytes(id_bytes).into_uuid();

        let mut key_bytes = [0u8; KEY_SIZE];
        env.random_bytes(&mut key_bytes);

        // Six digits, first digit never zero.
        let code = 100_000 + env.random_u64() % 900_000;

        Self {
            id,
            key: SessionKey::from_bytes(key_bytes),
            pairing_code: code.to_string(),
            pairing_required: true,
        }
    }

    /// Opaque session identifier quoted to the relay.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session's symmetric key.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The 6-digit code the operator must enter on the client.
    pub fn pairing_code(&self) -> &str {
        &self.pairing_code
    }

    /// Whether a correct `PAIR` is still outstanding.
    pub fn pairing_required(&self) -> bool {
        self.pairing_required
    }

    /// Compares a submitted code against the session's code.
    pub fn verify_pairing_code(&self, code: &str) -> bool {
        self.pairing_code == code
    }

    /// Clears the pairing requirement. Permanent for the session's life.
    pub fn complete_pairing(&mut self) {
        self.pairing_required = false;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("pairing_code", &"<redacted>")
            .field("pairing_required", &self.pairing_required)
            .finish()
    }
}

/// Validates a session identifier: parseable as a UUID, version 4,
/// RFC 4122 variant.
pub fn parse_session_id(value: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(value).ok()?;
    (id.get_version_num() == 4 && id.get_variant() == uuid::Variant::RFC4122).then_some(id)
}

/// Parsed share URL fragment: everything a client needs to reach a session.
///
/// The fragment never leaves the operator's hands over the network; URL
/// fragments are not sent in HTTP requests, which is what keeps the key out
/// of the relay's sight.
pub struct ShareUrl {
    /// Session to attach to.
    pub session_id: Uuid,
    /// Symmetric session key.
    pub key: SessionKey,
    /// WebSocket URL of the relay.
    pub relay_url: String,
}

impl ShareUrl {
    /// Renders the fragment a host hands to its operator.
    pub fn format(session: &Session, relay_url: &str) -> String {
        format!(
            "#session={}&key={}&relay={}",
            session.id(),
            STANDARD.encode(session.key().as_bytes()),
            relay_url,
        )
    }

    /// Parses a share URL or bare fragment.
    ///
    /// Accepts a full URL (everything before `#` is ignored) or the
    /// fragment itself with or without the leading `#`. Values are split on
    /// the first `=`, so the relay URL may itself contain query parameters
    /// but not a literal `&`.
    pub fn parse(input: &str) -> Result<Self, ShareUrlError> {
        let fragment = match input.split_once('#') {
            Some((_, fragment)) => fragment,
            None => input,
        };

        let mut session = None;
        let mut key = None;
        let mut relay = None;
        for pair in fragment.split('&') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            match name {
                "session" => session = Some(value),
                "key" => key = Some(value),
                "relay" => relay = Some(value),
                _ => {},
            }
        }

        let session = session.ok_or(ShareUrlError::MissingField { field: "session" })?;
        let key = key.ok_or(ShareUrlError::MissingField { field: "key" })?;
        let relay = relay.ok_or(ShareUrlError::MissingField { field: "relay" })?;

        let session_id = parse_session_id(session).ok_or(ShareUrlError::InvalidSessionId)?;
        let key_bytes: [u8; KEY_SIZE] = STANDARD
            .decode(key)
            .map_err(|_| ShareUrlError::InvalidKey)?
            .try_into()
            .map_err(|_| ShareUrlError::InvalidKey)?;

        Ok(Self {
            session_id,
            key: SessionKey::from_bytes(key_bytes),
            relay_url: relay.to_string(),
        })
    }
}

impl std::fmt::Debug for ShareUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareUrl")
            .field("session_id", &self.session_id)
            .field("key", &self.key)
            .field("relay_url", &self.relay_url)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_env::TestEnv;

    #[test]
    fn generated_session_has_v4_id_and_six_digit_code() {
        let session = Session::generate(&TestEnv::default());

        assert_eq!(session.id().get_version_num(), 4);
        assert_eq!(session.id().get_variant(), uuid::Variant::RFC4122);
        assert_eq!(session.pairing_code().len(), 6);
        assert!(!session.pairing_code().starts_with('0'));
        assert!(session.pairing_required());
    }

    #[test]
    fn pairing_flow() {
        let mut session = Session::generate(&TestEnv::default());
        let code = session.pairing_code().to_string();

        assert!(!session.verify_pairing_code("000000"));
        assert!(session.verify_pairing_code(&code));

        session.complete_pairing();
        assert!(!session.pairing_required());
    }

    #[test]
    fn session_debug_redacts_secrets() {
        let session = Session::generate(&TestEnv::default());
        let debug = format!("{session:?}");

        assert!(!debug.contains(session.pairing_code()));
        assert!(debug.contains("<redacted"));
    }

    #[test]
    fn share_url_round_trip() {
        let session = Session::generate(&TestEnv::default());
        let fragment = ShareUrl::format(&session, "wss://relay.example/ws");

        let parsed = ShareUrl::parse(&fragment).unwrap();
        assert_eq!(parsed.session_id, session.id());
        assert_eq!(parsed.key.as_bytes(), session.key().as_bytes());
        assert_eq!(parsed.relay_url, "wss://relay.example/ws");
    }

    #[test]
    fn share_url_parses_from_full_url() {
        let session = Session::generate(&TestEnv::default());
        let url =
            format!("https://app.example/open{}", ShareUrl::format(&session, "ws://127.0.0.1:9441"));

        let parsed = ShareUrl::parse(&url).unwrap();
        assert_eq!(parsed.session_id, session.id());
    }

    #[test]
    fn share_url_rejects_missing_fields() {
        let err = ShareUrl::parse("#session=abc&key=xyz").unwrap_err();
        assert_eq!(err, ShareUrlError::MissingField { field: "relay" });
    }

    #[test]
    fn share_url_rejects_non_v4_session_id() {
        // Version nibble says 1, not 4.
        let fragment = format!(
            "#session=00000000-0000-1000-8000-000000000000&key={}&relay=ws://r",
            STANDARD.encode([0u8; KEY_SIZE]),
        );
        assert_eq!(ShareUrl::parse(&fragment).unwrap_err(), ShareUrlError::InvalidSessionId);
    }

    #[test]
    fn share_url_rejects_short_key() {
        let session = Session::generate(&TestEnv::default());
        let fragment =
            format!("#session={}&key={}&relay=ws://r", session.id(), STANDARD.encode([0u8; 16]));
        assert_eq!(ShareUrl::parse(&fragment).unwrap_err(), ShareUrlError::InvalidKey);
    }

    #[test]
    fn session_id_validation() {
        assert!(parse_session_id("not-a-uuid").is_none());
        assert!(parse_session_id("00000000-0000-1000-8000-000000000000").is_none());

        let id = Session::generate(&TestEnv::default()).id();
        assert_eq!(parse_session_id(&id.to_string()), Some(id));
    }
}
