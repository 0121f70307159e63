//! Service state assembly.
//!
//! Wires the collaborators, the rule set, the gate and the sealed route table
//! into one [`GatewayState`] shared by every request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{ConfigError, GatewayConfig};
use crate::gate::RequestGate;
use crate::issuance::{self, TokenIssuer};
use crate::policy::{PolicyEngine, RuleSet, RuleSetError};
use crate::registry::{RegistryError, RouteRegistry, RouteTable};
use crate::resources::{self, InMemoryResourceBackend, ResourceBackend};
use crate::store::{IdentityStore, InMemoryIdentityStore, TokenStore, UserDirectory, UserSeed};
use crate::verifier::CredentialVerifier;

use super::routes::register_admin_routes;

/// Startup failures. All abort the process.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Bad environment.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Rules file missing or invalid.
    #[error(transparent)]
    Rules(#[from] RuleSetError),

    /// Route registration failed (e.g. `ROUTE_CONFLICT`).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Users file unreadable.
    #[error("Failed to read users file {path}: {source}")]
    UsersIo {
        /// File path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Users file is not a JSON array of users.
    #[error("Failed to parse users file {path}: {source}")]
    UsersParse {
        /// File path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Where the active rule set comes from; reload re-reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesSource {
    /// Compiled-in default rules.
    Builtin,
    /// JSON rules file.
    File(PathBuf),
}

impl RulesSource {
    /// Source for an optional configured path.
    pub fn from_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self::File(path),
            None => Self::Builtin,
        }
    }

    /// Load and compile the rules.
    pub fn load(&self) -> Result<RuleSet, RuleSetError> {
        match self {
            Self::Builtin => RuleSet::builtin(),
            Self::File(path) => RuleSet::load(path),
        }
    }

    /// Display form for logs and the admin endpoint.
    pub fn describe(&self) -> String {
        match self {
            Self::Builtin => "builtin".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// External collaborators of the gateway.
#[derive(Clone)]
pub struct Collaborators {
    /// Trust-store reads.
    pub identities: Arc<dyn IdentityStore>,
    /// Password checks.
    pub users: Arc<dyn UserDirectory>,
    /// Trust-store writes.
    pub tokens: Arc<dyn TokenStore>,
    /// Resource storage.
    pub resources: Arc<dyn ResourceBackend>,
}

impl Collaborators {
    /// Everything in memory, backed by `store`.
    pub fn in_memory(store: Arc<InMemoryIdentityStore>) -> Self {
        Self {
            identities: store.clone(),
            users: store.clone(),
            tokens: store,
            resources: Arc::new(InMemoryResourceBackend::new()),
        }
    }
}

/// Read a JSON array of [`UserSeed`]s.
pub fn load_users(path: &Path) -> Result<Vec<UserSeed>, StartupError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StartupError::UsersIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| StartupError::UsersParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Shared gateway state.
#[derive(Clone)]
pub struct GatewayState {
    /// Request gate (verifier + policy engine).
    pub gate: RequestGate,
    /// Sealed route table.
    pub routes: Arc<RouteTable>,
    /// Token issuer.
    pub issuer: Arc<TokenIssuer>,
    /// Rule source for reloads.
    pub rules_source: RulesSource,
    /// Process start time.
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    /// Build the gateway: load rules, register every route, seal the table.
    pub fn build(config: &GatewayConfig, collaborators: Collaborators) -> Result<Self, StartupError> {
        if config.using_development_secret {
            warn!(
                "GATE_TOKEN_SECRET not set or empty. Using development secret. \
                 This is a SECURITY RISK in production!"
            );
        }

        let rules_source = RulesSource::from_path(config.rules_path.clone());
        let rules = rules_source.load()?;
        info!(
            target: "ispyb_gate::policy",
            source = %rules_source.describe(),
            rule_count = rules.len(),
            fingerprint = %rules.fingerprint(),
            "rule set loaded"
        );
        let policy = Arc::new(PolicyEngine::new(rules));

        let verifier = Arc::new(CredentialVerifier::new(
            Arc::clone(&collaborators.identities),
            config.token_secret.clone(),
            config.verifier_config(),
        ));
        let gate = RequestGate::new(verifier, Arc::clone(&policy));

        let issuer = Arc::new(TokenIssuer::new(
            config.token_secret.clone(),
            config.token_ttl,
            collaborators.users,
            Arc::clone(&collaborators.identities),
            collaborators.tokens,
        ));

        let mut registry = match &config.legacy_prefix {
            Some(prefix) => RouteRegistry::with_legacy_prefix(prefix)?,
            None => RouteRegistry::new(),
        };
        issuance::register_routes(&mut registry, Arc::clone(&issuer))?;
        register_admin_routes(&mut registry, policy, rules_source.clone())?;
        resources::register_catalog(&mut registry, collaborators.resources)?;

        Ok(Self {
            gate,
            routes: Arc::new(registry.seal()),
            issuer,
            rules_source,
            started_at: Utc::now(),
        })
    }

    /// In-memory gateway seeded with `users`.
    pub fn in_memory(config: &GatewayConfig, users: Vec<UserSeed>) -> Result<Self, StartupError> {
        let store = Arc::new(InMemoryIdentityStore::with_users(users));
        Self::build(config, Collaborators::in_memory(store))
    }
}
