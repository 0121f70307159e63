//! Login exchange, token issuance and revocation.
//!
//! The issuer is the only writer of the trust store. The verifier reads what
//! it writes: a token revoked here fails the next verification with
//! `REVOKED_CREDENTIAL`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::gate::{handler_fn, GatewayRequest, GatewayResponse, GuardChain, RequestContext};
use crate::registry::{RegistryError, RouteRegistry};
use crate::store::{IdentityStore, StoreError, TokenStore, UserDirectory};
use crate::types::{BearerToken, TokenRecord, Verb, VerificationFailure, STATUS_UNAUTHORIZED};
use crate::verifier::parse_bearer;

/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 8 * 60 * 60;

/// How long expired records are kept before issuance purges them.
/// Within this window a stale token still reports `EXPIRED_CREDENTIAL`.
pub const DEFAULT_EXPIRED_RETENTION_SECS: i64 = 60 * 60;

/// Issuance errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssuanceError {
    /// Username or password missing from the request.
    #[error("Missing username or password")]
    MissingCredential,

    /// Username/password rejected.
    #[error("Invalid username or password")]
    InvalidCredential,

    /// `now + ttl` does not fit in a timestamp.
    #[error("Token expiry out of range")]
    ExpiryOutOfRange,

    /// Trust store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IssuanceError {
    /// HTTP status and machine-readable code.
    pub fn status_and_code(&self) -> (u16, &'static str) {
        match self {
            Self::MissingCredential => (STATUS_UNAUTHORIZED, VerificationFailure::MissingCredential.code()),
            Self::InvalidCredential => (STATUS_UNAUTHORIZED, VerificationFailure::InvalidCredential.code()),
            Self::ExpiryOutOfRange => (500, "TOKEN_EXPIRY_OUT_OF_RANGE"),
            Self::Store(StoreError::TokenNotFound) => (404, "TOKEN_NOT_FOUND"),
            Self::Store(StoreError::Backend(_)) => (503, "STORE_UNAVAILABLE"),
        }
    }

    fn into_response(self) -> GatewayResponse {
        let (status, code) = self.status_and_code();
        GatewayResponse::error(status, code, self.to_string())
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    /// Bearer token value.
    pub token: String,
    /// Login name.
    pub username: String,
    /// Roles at issue time.
    pub roles: Vec<String>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

/// Login body for `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Mints tokens for valid credentials and revokes them on logout.
pub struct TokenIssuer {
    secret: Vec<u8>,
    ttl: Duration,
    expired_retention: Duration,
    users: Arc<dyn UserDirectory>,
    identities: Arc<dyn IdentityStore>,
    tokens: Arc<dyn TokenStore>,
}

impl TokenIssuer {
    /// Create an issuer signing tokens with `secret`.
    pub fn new(
        secret: Vec<u8>,
        ttl: Duration,
        users: Arc<dyn UserDirectory>,
        identities: Arc<dyn IdentityStore>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            secret,
            ttl,
            expired_retention: Duration::seconds(DEFAULT_EXPIRED_RETENTION_SECS),
            users,
            identities,
            tokens,
        }
    }

    /// Keep expired records for `retention` before purging them.
    pub fn with_expired_retention(mut self, retention: Duration) -> Self {
        self.expired_retention = retention;
        self
    }

    /// Token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check credentials and issue a token.
    pub async fn issue(&self, username: &str, password: &str) -> Result<IssuedToken, IssuanceError> {
        if username.is_empty() || password.is_empty() {
            return Err(IssuanceError::MissingCredential);
        }
        let subject_id = self
            .users
            .authenticate(username, password)
            .await?
            .ok_or(IssuanceError::InvalidCredential)?;
        let grants = self
            .identities
            .lookup_subject(&subject_id)
            .await?
            .ok_or(IssuanceError::InvalidCredential)?;

        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or(IssuanceError::ExpiryOutOfRange)?;
        let token = BearerToken::mint(&self.secret);
        self.tokens
            .put_token(TokenRecord {
                token: token.clone(),
                subject_id: subject_id.clone(),
                username: grants.username.clone(),
                issued_at,
                expires_at,
                revoked: false,
                last_used_at: None,
            })
            .await?;
        self.purge_expired(issued_at).await;

        info!(
            target: "ispyb_gate::issuance",
            subject_id = %subject_id,
            token = %token.fingerprint(),
            expires_at = %expires_at,
            "token issued"
        );

        Ok(IssuedToken {
            token: token.as_str().to_string(),
            username: grants.username,
            roles: grants.roles.into_iter().collect(),
            expires_at,
        })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.expired_retention) else {
            return;
        };
        match self.tokens.purge_expired(cutoff).await {
            Ok(0) => {}
            Ok(purged) => debug!(target: "ispyb_gate::issuance", purged, "expired tokens purged"),
            Err(err) => warn!(target: "ispyb_gate::issuance", error = %err, "token purge failed"),
        }
    }

    /// Revoke a token. Later verifications fail with `REVOKED_CREDENTIAL`.
    pub async fn revoke(&self, token: &BearerToken) -> Result<(), IssuanceError> {
        self.tokens.revoke_token(token).await?;
        info!(
            target: "ispyb_gate::issuance",
            token = %token.fingerprint(),
            "token revoked"
        );
        Ok(())
    }
}

fn login_credentials(request: &GatewayRequest) -> Result<(String, String), IssuanceError> {
    match request.verb {
        Verb::Post => {
            let body = request.body.clone().ok_or(IssuanceError::MissingCredential)?;
            let login: LoginRequest =
                serde_json::from_value(body).map_err(|_| IssuanceError::MissingCredential)?;
            Ok((login.username, login.password))
        }
        _ => {
            let username = request.header("username").ok_or(IssuanceError::MissingCredential)?;
            let password = request.header("password").ok_or(IssuanceError::MissingCredential)?;
            Ok((username.to_string(), password.to_string()))
        }
    }
}

/// Mount `/auth/login` (GET, POST), `/auth/logout` and `/auth/whoami`.
///
/// Login is public. Logout and whoami go through the rule set like any other
/// route.
pub fn register_routes(registry: &mut RouteRegistry, issuer: Arc<TokenIssuer>) -> Result<(), RegistryError> {
    let login = {
        let issuer = Arc::clone(&issuer);
        handler_fn(move |_ctx: RequestContext, request: GatewayRequest| {
            let issuer = Arc::clone(&issuer);
            async move {
                let result = match login_credentials(&request) {
                    Ok((username, password)) => issuer.issue(&username, &password).await,
                    Err(err) => Err(err),
                };
                match result {
                    Ok(issued) => GatewayResponse::ok(json!(issued)),
                    Err(err) => {
                        warn!(target: "ispyb_gate::issuance", error = %err, "login rejected");
                        err.into_response()
                    }
                }
            }
        })
    };

    let logout = handler_fn(move |_ctx: RequestContext, request: GatewayRequest| {
        let issuer = Arc::clone(&issuer);
        async move {
            // The authenticate stage already accepted this header.
            let token = match request.authorization.as_deref().map(parse_bearer) {
                Some(Ok(token)) => token,
                _ => return IssuanceError::MissingCredential.into_response(),
            };
            match issuer.revoke(&token).await {
                Ok(()) => GatewayResponse::ok(json!({ "revoked": true })),
                Err(err) => err.into_response(),
            }
        }
    });

    let whoami = handler_fn(|ctx: RequestContext, _request: GatewayRequest| async move {
        GatewayResponse::ok(json!({
            "subject_id": ctx.principal.subject_id().map(|id| id.as_str().to_string()),
            "username": ctx.principal.username(),
            "roles": ctx.principal.roles(),
            "scopes": ctx.principal.scopes(),
        }))
    });

    let mut auth = registry.namespace("/auth")?;
    auth.route("/login", Verb::Get, Arc::clone(&login), GuardChain::public())?
        .route("/login", Verb::Post, login, GuardChain::public())?
        .route("/logout", Verb::Post, logout, GuardChain::standard())?
        .route("/whoami", Verb::Get, whoami, GuardChain::standard())?;
    Ok(())
}
