//! # ispyb-gate
//!
//! Fail-closed authentication/authorization gate and legacy route
//! multiplexer for the ISPyB REST gateway.
//!
//! Every inbound call answers two questions, in this order:
//!
//! > Who is calling? (credential verification)
//! >
//! > May they do this? (permission policy)
//!
//! ## Architecture
//!
//! ```text
//! request → RouteTable (primary or /legacy tree)
//!              ↓ resolved route + guard chain
//!           RequestGate ─ authenticate → CredentialVerifier → IdentityStore
//!              │          authorize    → PolicyEngine (RuleSet snapshot)
//!              ↓ 401 / 403 / Principal
//!           Handler (RequestContext)
//! ```
//!
//! ## Guarantees
//!
//! - Any failure or ambiguity in the gate denies the request.
//! - Rule selection is deterministic: most specific pattern, then declaration order.
//! - A request is decided against one rule-set snapshot, even across a reload.
//! - A legacy alias and its primary route share one handler and one guard chain,
//!   and are authorized against the same primary resource path.
//! - Route conflicts are detected at startup, independent of registration order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod canonical;
pub mod policy;
pub mod store;
pub mod verifier;
pub mod gate;
pub mod registry;
pub mod issuance;
pub mod resources;
pub mod config;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    BearerToken, DenyReason, GateFailure, Principal, SubjectGrants, SubjectId, TokenRecord,
    VerificationFailure, Verb, VerbMatcher,
};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};
pub use policy::{
    Decision, OwnerResolver, PathParams, PathPattern, PolicyEngine, Requirement, RuleSet,
    RuleSetError, RuleSpec,
};
pub use store::{IdentityStore, InMemoryIdentityStore, StoreError, TokenStore, UserDirectory, UserSeed};
pub use verifier::{parse_bearer, CacheConfig, CacheStats, CredentialVerifier, VerifierConfig};
pub use gate::{
    handler_fn, GatewayRequest, GatewayResponse, GuardChain, GuardStage, GuardedHandler, Handler,
    RequestContext, RequestGate, RouteInfo,
};
pub use registry::{RegistryError, RouteEntry, RouteRegistry, RouteState, RouteTable};
pub use issuance::{IssuanceError, IssuedToken, TokenIssuer};
pub use resources::{InMemoryResourceBackend, ResourceBackend, ResourceKind, CATALOG};
pub use config::{ConfigError, GatewayConfig, LogFormat};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, GatewayState, StartupError};
