//! Credential verification.
//!
//! Turns the raw `Authorization` header of a request into a [`Principal`], or
//! a [`VerificationFailure`]. The check order is fixed:
//!
//! ```text
//! header present? ─no→ MISSING_CREDENTIAL
//!   │ "Bearer <token>"? ─no→ INVALID_CREDENTIAL
//!   │ tag valid? (LRU cached) ─no→ INVALID_CREDENTIAL
//!   │ ┌──────── bounded by lookup_timeout ────────┐
//!   │ │ token known? ─no→ INVALID_CREDENTIAL      │
//!   │ │ revoked? ─yes→ REVOKED_CREDENTIAL         │
//!   │ │ expired? ─yes→ EXPIRED_CREDENTIAL         │
//!   │ │ subject grants (live) ─none→ INVALID      │
//!   │ └─ store error / timeout → VERIFIER_UNAVAILABLE
//!   ↓
//! Principal
//! ```
//!
//! Tag results are a pure function of (token, secret) and may be cached.
//! Revocation, expiry and grants are read from the store on every call.

use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use parking_lot::RwLock;
use tracing::{debug, warn};
use xxhash_rust::xxh64::Xxh64;

use crate::store::IdentityStore;
use crate::types::{BearerToken, Principal, SubjectGrants, TokenRecord, VerificationFailure};

/// Default bound on the trust-store lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for the token tag cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            enabled: true,
        }
    }
}

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Upper bound on the token + subject lookups.
    pub lookup_timeout: Duration,
    /// Tag cache configuration.
    pub cache: CacheConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            cache: CacheConfig::default(),
        }
    }
}

/// Cache key for tag verification: xxh64 of the token string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TagCacheKey(u64);

impl TagCacheKey {
    fn compute(token: &BearerToken) -> Self {
        let mut hasher = Xxh64::new(0);
        hasher.write(token.as_str().as_bytes());
        Self(hasher.finish())
    }
}

/// Result of a tag check.
#[derive(Debug, Clone, Copy)]
pub struct TagCheck {
    /// Whether the tag is valid.
    pub is_valid: bool,
    /// Whether this result came from cache.
    pub cache_hit: bool,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is case-insensitive; anything other than a non-empty bearer
/// token is an invalid credential.
pub fn parse_bearer(header: &str) -> Result<BearerToken, VerificationFailure> {
    let (scheme, value) = header
        .trim()
        .split_once(' ')
        .ok_or(VerificationFailure::InvalidCredential)?;
    let value = value.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || value.is_empty() {
        return Err(VerificationFailure::InvalidCredential);
    }
    Ok(BearerToken::from_string(value.to_string()))
}

/// Credential verifier.
///
/// Thread-safe; one instance is shared by every in-flight request.
pub struct CredentialVerifier {
    store: Arc<dyn IdentityStore>,
    secret: Arc<Vec<u8>>,
    config: VerifierConfig,
    tag_cache: Option<RwLock<LruCache<TagCacheKey, bool>>>,
}

impl CredentialVerifier {
    /// Create a verifier over `store`, checking tags with `secret`.
    pub fn new(store: Arc<dyn IdentityStore>, secret: Vec<u8>, config: VerifierConfig) -> Self {
        let tag_cache = if config.cache.enabled {
            let size = NonZeroUsize::new(config.cache.max_entries).unwrap_or(NonZeroUsize::MIN);
            Some(RwLock::new(LruCache::new(size)))
        } else {
            None
        };

        Self {
            store,
            secret: Arc::new(secret),
            config,
            tag_cache,
        }
    }

    /// The configured lookup timeout.
    pub fn lookup_timeout(&self) -> Duration {
        self.config.lookup_timeout
    }

    /// Verify the raw `Authorization` header of a request.
    pub async fn verify(&self, authorization: Option<&str>) -> Result<Principal, VerificationFailure> {
        let header = authorization.ok_or(VerificationFailure::MissingCredential)?;
        let token = parse_bearer(header)?;

        if !self.check_tag(&token).is_valid {
            debug!(
                target: "ispyb_gate::verifier",
                token = %token.fingerprint(),
                "token tag rejected"
            );
            return Err(VerificationFailure::InvalidCredential);
        }

        let (record, grants) = match tokio::time::timeout(
            self.config.lookup_timeout,
            self.resolve(&token),
        )
        .await
        {
            Ok(resolved) => resolved?,
            Err(_) => {
                warn!(
                    target: "ispyb_gate::verifier",
                    timeout_ms = self.config.lookup_timeout.as_millis() as u64,
                    "trust store lookup timed out"
                );
                return Err(VerificationFailure::VerifierUnavailable(format!(
                    "lookup exceeded {}ms",
                    self.config.lookup_timeout.as_millis()
                )));
            }
        };

        self.touch(token);
        Ok(Principal::authenticated(record.subject_id, grants))
    }

    /// Look up the token record and the subject's live grants.
    async fn resolve(
        &self,
        token: &BearerToken,
    ) -> Result<(TokenRecord, SubjectGrants), VerificationFailure> {
        let record = self
            .store
            .lookup_token(token)
            .await
            .map_err(|e| VerificationFailure::VerifierUnavailable(e.to_string()))?
            .ok_or(VerificationFailure::InvalidCredential)?;

        if record.revoked {
            return Err(VerificationFailure::RevokedCredential);
        }
        if record.is_expired_at(Utc::now()) {
            return Err(VerificationFailure::ExpiredCredential);
        }

        let grants = self
            .store
            .lookup_subject(&record.subject_id)
            .await
            .map_err(|e| VerificationFailure::VerifierUnavailable(e.to_string()))?
            .ok_or(VerificationFailure::InvalidCredential)?;

        Ok((record, grants))
    }

    /// Write the advisory last-used timestamp on a detached task.
    fn touch(&self, token: BearerToken) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.record_token_use(&token, Utc::now()).await {
                debug!(
                    target: "ispyb_gate::verifier",
                    token = %token.fingerprint(),
                    error = %e,
                    "last-used update failed"
                );
            }
        });
    }

    /// Check a token's tag, consulting the cache first.
    pub fn check_tag(&self, token: &BearerToken) -> TagCheck {
        let cache_key = TagCacheKey::compute(token);

        if let Some(cache) = &self.tag_cache {
            if let Some(&is_valid) = cache.read().peek(&cache_key) {
                return TagCheck {
                    is_valid,
                    cache_hit: true,
                };
            }
        }

        let is_valid = token.verify_tag(&self.secret);

        if let Some(cache) = &self.tag_cache {
            cache.write().put(cache_key, is_valid);
        }

        TagCheck {
            is_valid,
            cache_hit: false,
        }
    }

    /// Get cache statistics. `None` if caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.tag_cache.as_ref().map(|cache| {
            let cache = cache.read();
            CacheStats {
                len: cache.len(),
                cap: cache.cap().get(),
            }
        })
    }

    /// Clear the tag cache.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.tag_cache {
            cache.write().clear();
        }
    }
}
