//! Identity and token storage collaborators.
//!
//! The gate reads through [`IdentityStore`] on every request; issuance writes
//! through [`TokenStore`]; the login exchange checks passwords through
//! [`UserDirectory`]. All lookups are treated as bounded-latency queries; the
//! verifier wraps them in a timeout.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{BearerToken, SubjectGrants, SubjectId, TokenRecord};

/// Error type shared by store backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or returned an error.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A write referred to a token the store does not hold.
    #[error("Token not found")]
    TokenNotFound,
}

/// Read side of the trust store, used by the verifier.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fetch the current roles and scopes of a subject.
    async fn lookup_subject(&self, id: &SubjectId) -> Result<Option<SubjectGrants>, StoreError>;

    /// Fetch the record backing a token value.
    async fn lookup_token(&self, token: &BearerToken) -> Result<Option<TokenRecord>, StoreError>;

    /// Record an advisory last-used timestamp. Best effort.
    async fn record_token_use(&self, token: &BearerToken, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Write side of the trust store, owned by token issuance.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a newly issued token.
    async fn put_token(&self, record: TokenRecord) -> Result<(), StoreError>;

    /// Set the revoked flag of a token.
    async fn revoke_token(&self, token: &BearerToken) -> Result<(), StoreError>;

    /// Drop records that expired at or before `cutoff`, revoked or not.
    /// Returns the number of records removed.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Password check used by the login exchange.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Return the subject id when `username`/`password` are valid.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<SubjectId>, StoreError>;
}

pub use memory::{InMemoryIdentityStore, UserSeed};
