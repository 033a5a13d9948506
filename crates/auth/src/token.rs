//! Opaque bearer tokens.
//!
//! A token is shown to the client exactly once. Only its SHA-256 digest is
//! stored, so a leaked database cannot be replayed against the API.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::TOKEN_BYTES;

/// Authorization schemes accepted in front of a token.
const SCHEMES: &[&str] = &["Token", "Bearer"];

/// A stored token record. Each user holds at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// SHA-256 digest of the key, URL-safe base64.
    pub digest: String,
    /// Owner of the token.
    pub user_id: Uuid,
    /// When the token was issued.
    pub created_at: DateTime<Utc>,
}

/// A freshly issued token: the plaintext key and the record to store.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Plaintext key returned to the client.
    pub key: String,
    /// Record to persist.
    pub record: AuthToken,
}

impl AuthToken {
    /// Issues a new token for a user.
    pub fn issue(user_id: Uuid, now: DateTime<Utc>) -> IssuedToken {
        let key = generate_token();
        let record = Self {
            digest: digest_token(&key),
            user_id,
            created_at: now,
        };
        IssuedToken { key, record }
    }
}

/// Generates a cryptographically random token key.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..TOKEN_BYTES).map(|_| rng.random::<u8>()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Computes the storage digest of a token key.
pub fn digest_token(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Extracts the token key from an `Authorization` header value.
///
/// Accepts `Token <key>` and `Bearer <key>`; the scheme is case-insensitive.
pub fn extract_token(header: &str) -> Option<&str> {
    let (scheme, key) = header.trim().split_once(' ')?;
    let key = key.trim();

    if key.is_empty() || key.contains(' ') {
        return None;
    }

    SCHEMES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(scheme))
        .then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();

        assert_ne!(a, b);
        // 32 bytes -> 43 base64 characters without padding
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
    }

    #[test]
    fn test_digest_is_stable() {
        let key = "fixed-token";
        assert_eq!(digest_token(key), digest_token(key));
        assert_ne!(digest_token(key), digest_token("other-token"));
        assert_ne!(digest_token(key), key);
    }

    #[test]
    fn test_issue() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let issued = AuthToken::issue(user_id, now);

        assert_eq!(issued.record.user_id, user_id);
        assert_eq!(issued.record.created_at, now);
        assert_eq!(issued.record.digest, digest_token(&issued.key));
        assert_ne!(issued.record.digest, digest_token("guess"));
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token("Token abc123"), Some("abc123"));
        assert_eq!(extract_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_token("bearer  abc123 "), Some("abc123"));
        assert_eq!(extract_token("Basic abc123"), None);
        assert_eq!(extract_token("Token"), None);
        assert_eq!(extract_token("Token "), None);
        assert_eq!(extract_token("Token a b"), None);
        assert_eq!(extract_token(""), None);
    }
}
