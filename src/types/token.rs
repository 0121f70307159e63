//! Bearer tokens and the records that back them.
//!
//! ## Token Format
//!
//! ```text
//! <nonce: 32 hex chars>.<tag: 32 hex chars>
//! tag = HMAC-SHA256(secret, nonce | TOKEN_VERSION)[..16]
//! ```
//!
//! The tag lets the verifier reject forged or mangled tokens before touching
//! the trust store. It proves nothing about revocation or expiry; those live
//! in the [`TokenRecord`] held by the store.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

use super::principal::SubjectId;

/// Length in bytes of the random nonce and of the truncated tag.
const PART_BYTES: usize = 16;

/// Opaque bearer credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BearerToken(String);

impl BearerToken {
    /// Token version marker mixed into the tag.
    const TOKEN_VERSION: &'static str = "ispyb_gate_token_v1";

    fn mac(secret: &[u8], nonce: &str) -> Hmac<Sha256> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret)
            .expect("HMAC accepts any key size");
        mac.update(nonce.as_bytes());
        mac.update(b"|");
        mac.update(Self::TOKEN_VERSION.as_bytes());
        mac
    }

    /// Mint a fresh token signed with `secret`.
    pub fn mint(secret: &[u8]) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let tag = Self::mac(secret, &nonce).finalize().into_bytes();
        Self(format!("{}.{}", nonce, hex::encode(&tag[..PART_BYTES])))
    }

    /// Wrap a raw string received from a client.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Check the `<nonce>.<tag>` shape without verifying the tag.
    pub fn is_valid_format(&self) -> bool {
        match self.0.split_once('.') {
            Some((nonce, tag)) => is_hex_part(nonce) && is_hex_part(tag),
            None => false,
        }
    }

    /// Verify the tag against `secret` in constant time.
    pub fn verify_tag(&self, secret: &[u8]) -> bool {
        if !self.is_valid_format() {
            return false;
        }
        let Some((nonce, tag)) = self.0.split_once('.') else {
            return false;
        };
        match hex::decode(tag) {
            Ok(tag_bytes) => Self::mac(secret, nonce).verify_truncated_left(&tag_bytes).is_ok(),
            Err(_) => false,
        }
    }

    /// Get the token as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-secret prefix for log lines.
    pub fn fingerprint(&self) -> &str {
        let end = self.0.len().min(8);
        self.0.get(..end).unwrap_or("")
    }
}

fn is_hex_part(part: &str) -> bool {
    part.len() == PART_BYTES * 2 && part.chars().all(|c| c.is_ascii_hexdigit())
}

// Never print the full credential.
impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken({}…)", self.fingerprint())
    }
}

/// Trust-store record for an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The token value.
    pub token: BearerToken,
    /// Subject the token was issued to.
    pub subject_id: SubjectId,
    /// Username at issue time (informational; grants are looked up live).
    pub username: String,
    /// Issue timestamp.
    pub issued_at: DateTime<Utc>,
    /// Expiry timestamp; the token is dead at and after this instant.
    pub expires_at: DateTime<Utc>,
    /// Administrative revocation flag.
    pub revoked: bool,
    /// Advisory last-used timestamp, best effort.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Whether the token is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_gate_secret_32_bytes_min!!!";

    #[test]
    fn test_minted_token_verifies() {
        let token = BearerToken::mint(SECRET);
        assert!(token.is_valid_format());
        assert!(token.verify_tag(SECRET));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = BearerToken::mint(SECRET);
        assert!(!token.verify_tag(b"another_secret_entirely_here!!!!"));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let token = BearerToken::mint(SECRET);
        let (nonce, _) = token.as_str().split_once('.').unwrap();
        let forged = BearerToken::from_string(format!("{}.{}", nonce, "0".repeat(32)));
        assert!(forged.is_valid_format());
        assert!(!forged.verify_tag(SECRET));
    }

    #[test]
    fn test_malformed_tokens() {
        let long = "a".repeat(65);
        for raw in ["", "abc", "not.hex", long.as_str()] {
            let token = BearerToken::from_string(raw.to_string());
            assert!(!token.is_valid_format(), "{raw:?} should be malformed");
            assert!(!token.verify_tag(SECRET));
        }
    }

    #[test]
    fn test_debug_redacts() {
        let token = BearerToken::mint(SECRET);
        let debug = format!("{:?}", token);
        assert!(!debug.contains(token.as_str()));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let record = TokenRecord {
            token: BearerToken::mint(SECRET),
            subject_id: SubjectId::new("1"),
            username: "alice".to_string(),
            issued_at: now - chrono::Duration::hours(1),
            expires_at: now,
            revoked: false,
            last_used_at: None,
        };
        assert!(record.is_expired_at(now));
        assert!(!record.is_expired_at(now - chrono::Duration::seconds(1)));
    }
}
