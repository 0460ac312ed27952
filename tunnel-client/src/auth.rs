//! AUTH message handling
//!
//! Request payload: [version(1)][nonce(16)][token...]
//! Reply payload:   [status(1)][message...], status 0 means accepted

use ring::rand::{SecureRandom, SystemRandom};

/// AUTH payload version
const AUTH_VERSION: u8 = 0x01;

/// Nonce length in bytes
pub const NONCE_LEN: usize = 16;

/// Reply status for an accepted AUTH
const AUTH_STATUS_OK: u8 = 0x00;

/// Build an AUTH request payload with a fresh random nonce
pub fn build_auth_payload(rng: &SystemRandom, token: &str) -> Result<Vec<u8>, ring::error::Unspecified> {
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill(&mut nonce)?;

    let mut payload = Vec::with_capacity(1 + NONCE_LEN + token.len());
    payload.push(AUTH_VERSION);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(token.as_bytes());
    Ok(payload)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub accepted: bool,
    pub message: String,
}

/// Parse an AUTH_R payload
pub fn parse_auth_reply(data: &[u8]) -> Option<AuthReply> {
    let (&status, rest) = data.split_first()?;
    Some(AuthReply {
        accepted: status == AUTH_STATUS_OK,
        message: String::from_utf8_lossy(rest).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_auth_payload() {
        let rng = SystemRandom::new();
        let a = build_auth_payload(&rng, "secret").unwrap();
        let b = build_auth_payload(&rng, "secret").unwrap();

        assert_eq!(a.len(), 1 + NONCE_LEN + 6);
        assert_eq!(a[0], AUTH_VERSION);
        assert_eq!(&a[1 + NONCE_LEN..], b"secret");
        // Nonces differ between calls
        assert_ne!(a[1..1 + NONCE_LEN], b[1..1 + NONCE_LEN]);
    }

    #[test]
    fn test_parse_auth_reply() {
        let reply = parse_auth_reply(b"\x00welcome").unwrap();
        assert!(reply.accepted);
        assert_eq!(reply.message, "welcome");

        let reply = parse_auth_reply(&[0x03]).unwrap();
        assert!(!reply.accepted);
        assert!(reply.message.is_empty());
    }

    #[test]
    fn test_parse_auth_reply_empty() {
        assert!(parse_auth_reply(&[]).is_none());
    }
}
