//! In-memory identity store for development and testing.

use std::collections::HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::{BearerToken, SubjectGrants, SubjectId, TokenRecord};
use super::{IdentityStore, StoreError, TokenStore, UserDirectory};

/// A user to seed into the in-memory store (e.g. from a JSON users file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSeed {
    /// Subject id.
    pub subject_id: String,
    /// Login name.
    pub username: String,
    /// Plain-text password; hashed on insert.
    pub password: String,
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Scope strings.
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
struct UserEntry {
    password_digest: [u8; 32],
    grants: SubjectGrants,
}

/// In-memory identity, token and user store.
///
/// Interior mutability through `parking_lot::RwLock`; lookups take read locks
/// only, so concurrent verifications do not serialize on each other.
///
/// Passwords are kept as HMAC-SHA256 digests keyed by the username. There is
/// no per-user salt and no key stretching: this store is for development and
/// tests only.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    users: RwLock<HashMap<SubjectId, UserEntry>>,
    usernames: RwLock<HashMap<String, SubjectId>>,
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

fn password_mac(username: &str, password: &str) -> Hmac<Sha256> {
    let mut mac = Hmac::<Sha256>::new_from_slice(username.as_bytes())
        .expect("HMAC accepts any key size");
    mac.update(password.as_bytes());
    mac
}

fn password_digest(username: &str, password: &str) -> [u8; 32] {
    password_mac(username, password).finalize().into_bytes().into()
}

impl InMemoryIdentityStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with users.
    pub fn with_users(seeds: impl IntoIterator<Item = UserSeed>) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.add_user(seed);
        }
        store
    }

    /// Add (or replace) a user.
    pub fn add_user(&self, seed: UserSeed) {
        let subject_id = SubjectId::new(seed.subject_id);
        let entry = UserEntry {
            password_digest: password_digest(&seed.username, &seed.password),
            grants: SubjectGrants {
                username: seed.username.clone(),
                roles: seed.roles.into_iter().collect(),
                scopes: seed.scopes.into_iter().collect(),
            },
        };
        self.usernames.write().insert(seed.username, subject_id.clone());
        self.users.write().insert(subject_id, entry);
    }

    /// Replace the roles of a subject. Takes effect on the next verification.
    pub fn set_roles<I, R>(&self, id: &SubjectId, roles: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let mut users = self.users.write();
        let entry = users
            .get_mut(id)
            .ok_or_else(|| StoreError::Backend(format!("Unknown subject: {}", id)))?;
        entry.grants.roles = roles.into_iter().map(Into::into).collect();
        Ok(())
    }

    /// Get a copy of a token record.
    pub fn token(&self, token: &BearerToken) -> Option<TokenRecord> {
        self.tokens.read().get(token.as_str()).cloned()
    }

    /// Number of stored tokens.
    pub fn num_tokens(&self) -> usize {
        self.tokens.read().len()
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.users.read().len()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn lookup_subject(&self, id: &SubjectId) -> Result<Option<SubjectGrants>, StoreError> {
        Ok(self.users.read().get(id).map(|entry| entry.grants.clone()))
    }

    async fn lookup_token(&self, token: &BearerToken) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.read().get(token.as_str()).cloned())
    }

    async fn record_token_use(&self, token: &BearerToken, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write();
        let record = tokens.get_mut(token.as_str()).ok_or(StoreError::TokenNotFound)?;
        record.last_used_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl TokenStore for InMemoryIdentityStore {
    async fn put_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        self.tokens.write().insert(record.token.as_str().to_string(), record);
        Ok(())
    }

    async fn revoke_token(&self, token: &BearerToken) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write();
        let record = tokens.get_mut(token.as_str()).ok_or(StoreError::TokenNotFound)?;
        record.revoked = true;
        Ok(())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, record| record.expires_at > cutoff);
        Ok(before - tokens.len())
    }
}

#[async_trait]
impl UserDirectory for InMemoryIdentityStore {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<SubjectId>, StoreError> {
        let Some(subject_id) = self.usernames.read().get(username).cloned() else {
            return Ok(None);
        };
        let users = self.users.read();
        let Some(entry) = users.get(&subject_id) else {
            return Ok(None);
        };
        let matches = password_mac(username, password)
            .verify_slice(&entry.password_digest)
            .is_ok();
        Ok(matches.then_some(subject_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(id: &str, username: &str, roles: &[&str]) -> UserSeed {
        UserSeed {
            subject_id: id.to_string(),
            username: username.to_string(),
            password: "pass".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            scopes: vec![],
        }
    }

    fn record(token: &BearerToken, subject: &str) -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            token: token.clone(),
            subject_id: SubjectId::new(subject),
            username: "alice".to_string(),
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
            revoked: false,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn test_authenticate() {
        let store = InMemoryIdentityStore::with_users([seed("1", "alice", &["reader"])]);

        let ok = store.authenticate("alice", "pass").await.unwrap();
        assert_eq!(ok, Some(SubjectId::new("1")));

        assert!(store.authenticate("alice", "wrong").await.unwrap().is_none());
        assert!(store.authenticate("bob", "pass").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_role_change_visible_on_lookup() {
        let store = InMemoryIdentityStore::with_users([seed("1", "alice", &["reader"])]);
        let id = SubjectId::new("1");

        store.set_roles(&id, ["admin"]).unwrap();
        let grants = store.lookup_subject(&id).await.unwrap().unwrap();
        assert!(grants.roles.contains("admin"));
        assert!(!grants.roles.contains("reader"));
    }

    #[tokio::test]
    async fn test_token_lifecycle() {
        let store = InMemoryIdentityStore::new();
        let token = BearerToken::mint(b"secret");

        store.put_token(record(&token, "1")).await.unwrap();
        assert_eq!(store.num_tokens(), 1);

        store.record_token_use(&token, Utc::now()).await.unwrap();
        assert!(store.token(&token).unwrap().last_used_at.is_some());

        store.revoke_token(&token).await.unwrap();
        assert!(store.lookup_token(&token).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_stale_records() {
        let store = InMemoryIdentityStore::new();
        let now = Utc::now();
        let live = BearerToken::mint(b"secret");
        let stale = BearerToken::mint(b"secret");
        let stale_revoked = BearerToken::mint(b"secret");

        store.put_token(record(&live, "1")).await.unwrap();
        for token in [&stale, &stale_revoked] {
            let mut expired = record(token, "1");
            expired.expires_at = now - chrono::Duration::minutes(5);
            store.put_token(expired).await.unwrap();
        }
        store.revoke_token(&stale_revoked).await.unwrap();
        assert_eq!(store.num_tokens(), 3);

        assert_eq!(store.purge_expired(now).await.unwrap(), 2);
        assert_eq!(store.num_tokens(), 1);
        assert!(store.token(&live).is_some());
        assert!(store.token(&stale).is_none());

        assert_eq!(store.purge_expired(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revoke_unknown_token() {
        let store = InMemoryIdentityStore::new();
        let err = store.revoke_token(&BearerToken::mint(b"secret")).await.unwrap_err();
        assert_eq!(err, StoreError::TokenNotFound);
    }
}
