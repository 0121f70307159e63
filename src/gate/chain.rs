//! Guard stages and guard chains.

use serde::Serialize;
use std::fmt;

/// One pass/fail check run before a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStage {
    /// Verify the bearer credential and resolve the principal.
    Authenticate,
    /// Run the policy engine against the resolved principal.
    Authorize,
}

impl fmt::Display for GuardStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardStage::Authenticate => f.write_str("authenticate"),
            GuardStage::Authorize => f.write_str("authorize"),
        }
    }
}

/// Invalid guard chain, rejected at registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardChainError {
    /// `authorize` with no earlier `authenticate`.
    #[error("authorize stage must be preceded by authenticate")]
    AuthorizeBeforeAuthenticate,

    /// A stage listed twice.
    #[error("duplicate guard stage: {0}")]
    DuplicateStage(GuardStage),
}

/// Ordered list of guard stages, validated once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardChain {
    stages: Vec<GuardStage>,
}

impl GuardChain {
    /// Build a chain, checking stage order.
    pub fn new(stages: Vec<GuardStage>) -> Result<Self, GuardChainError> {
        let mut authenticated = false;
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].contains(stage) {
                return Err(GuardChainError::DuplicateStage(*stage));
            }
            match stage {
                GuardStage::Authenticate => authenticated = true,
                GuardStage::Authorize if !authenticated => {
                    return Err(GuardChainError::AuthorizeBeforeAuthenticate)
                }
                GuardStage::Authorize => {}
            }
        }
        Ok(Self { stages })
    }

    /// No stages: health checks and the login exchange.
    pub fn public() -> Self {
        Self { stages: Vec::new() }
    }

    /// Authenticate only.
    pub fn authenticated() -> Self {
        Self {
            stages: vec![GuardStage::Authenticate],
        }
    }

    /// Authenticate, then authorize.
    pub fn standard() -> Self {
        Self {
            stages: vec![GuardStage::Authenticate, GuardStage::Authorize],
        }
    }

    /// The `token_required` + `role_required` pair; same chain as [`standard`](Self::standard).
    pub fn token_required_role_required() -> Self {
        Self::standard()
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[GuardStage] {
        &self.stages
    }

    /// Whether the chain verifies credentials.
    pub fn authenticates(&self) -> bool {
        self.stages.contains(&GuardStage::Authenticate)
    }
}

impl Default for GuardChain {
    fn default() -> Self {
        Self::standard()
    }
}
