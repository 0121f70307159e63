//! Failure taxonomy of the request gate.
//!
//! | Code | Stage | Status |
//! |------|-------|--------|
//! | `MISSING_CREDENTIAL` | authenticate | 401 |
//! | `INVALID_CREDENTIAL` | authenticate | 401 |
//! | `EXPIRED_CREDENTIAL` | authenticate | 401 |
//! | `REVOKED_CREDENTIAL` | authenticate | 401 |
//! | `VERIFIER_UNAVAILABLE` | authenticate | 401 |
//! | `INSUFFICIENT_ROLE` | authorize | 403 |
//! | `NO_MATCHING_RULE` | authorize | 403 |
//!
//! None of these are retried by the gate. `ROUTE_CONFLICT` is a startup error
//! and lives in [`crate::registry::RegistryError`].

/// HTTP status for authentication-stage failures.
pub const STATUS_UNAUTHORIZED: u16 = 401;
/// HTTP status for authorization-stage failures.
pub const STATUS_FORBIDDEN: u16 = 403;

/// Why a credential could not be turned into a principal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationFailure {
    /// No `Authorization` header on the request.
    #[error("Authorization header is missing")]
    MissingCredential,

    /// Unknown, malformed or forged token.
    #[error("Credential is invalid")]
    InvalidCredential,

    /// Token is past its expiry timestamp.
    #[error("Credential has expired")]
    ExpiredCredential,

    /// Token was revoked.
    #[error("Credential has been revoked")]
    RevokedCredential,

    /// Trust store failed or timed out.
    #[error("Credential verifier unavailable: {0}")]
    VerifierUnavailable(String),
}

impl VerificationFailure {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "MISSING_CREDENTIAL",
            Self::InvalidCredential => "INVALID_CREDENTIAL",
            Self::ExpiredCredential => "EXPIRED_CREDENTIAL",
            Self::RevokedCredential => "REVOKED_CREDENTIAL",
            Self::VerifierUnavailable(_) => "VERIFIER_UNAVAILABLE",
        }
    }
}

/// Why an authenticated principal was denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    /// The selected rule requires a role or scope the principal lacks.
    #[error("Insufficient role: rule {rule_index} requires one of {required:?}")]
    InsufficientRole {
        /// Declaration index of the selected rule.
        rule_index: usize,
        /// Grants that would have satisfied the rule.
        required: Vec<String>,
    },

    /// No rule matches the path and verb.
    #[error("No permission rule matches the request")]
    NoMatchingRule,
}

impl DenyReason {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientRole { .. } => "INSUFFICIENT_ROLE",
            Self::NoMatchingRule => "NO_MATCHING_RULE",
        }
    }
}

/// Terminal failure of a guard stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateFailure {
    /// Authentication stage failed.
    #[error(transparent)]
    Authentication(#[from] VerificationFailure),

    /// Authorization stage failed.
    #[error(transparent)]
    Authorization(#[from] DenyReason),
}

impl GateFailure {
    /// HTTP-style status code for the failure.
    pub fn status(&self) -> u16 {
        match self {
            Self::Authentication(_) => STATUS_UNAUTHORIZED,
            Self::Authorization(_) => STATUS_FORBIDDEN,
        }
    }

    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(failure) => failure.code(),
            Self::Authorization(reason) => reason.code(),
        }
    }
}
