//! Permission policy engine.
//!
//! Holds the active [`RuleSet`] behind `RwLock<Arc<_>>`. A request takes one
//! snapshot (a read lock held only long enough to clone the `Arc`) and makes
//! every decision against it; `reload` swaps the pointer under a write lock.
//! In-flight requests keep the snapshot they started with, so no request ever
//! sees a mix of old and new rules.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::types::{Principal, Verb};
use super::rule::{Decision, OwnerResolver, ParamOwnerResolver, RuleSet};

/// Policy engine shared by all requests.
pub struct PolicyEngine {
    rules: RwLock<Arc<RuleSet>>,
    resolver: Arc<dyn OwnerResolver>,
}

impl PolicyEngine {
    /// Create an engine whose owner predicates read the placeholder value.
    pub fn new(rules: RuleSet) -> Self {
        Self::with_resolver(rules, Arc::new(ParamOwnerResolver))
    }

    /// Create an engine with a custom owner resolver.
    pub fn with_resolver(rules: RuleSet, resolver: Arc<dyn OwnerResolver>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            resolver,
        }
    }

    /// Current rule-set snapshot.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&*self.rules.read())
    }

    /// Owner resolver used by predicate rules.
    pub fn resolver(&self) -> &dyn OwnerResolver {
        self.resolver.as_ref()
    }

    /// Decide against the current snapshot.
    pub fn authorize(&self, principal: &Principal, path: &str, verb: Verb) -> Decision {
        self.snapshot().decide(principal, path, verb, self.resolver())
    }

    /// Whether the current snapshot admits anonymous access to `path`/`verb`.
    pub fn permits_anonymous(&self, path: &str, verb: Verb) -> bool {
        self.snapshot().permits_anonymous(path, verb, self.resolver())
    }

    /// Replace the active rule set, returning the previous snapshot.
    pub fn reload(&self, rules: RuleSet) -> Arc<RuleSet> {
        let next = Arc::new(rules);
        let previous = std::mem::replace(&mut *self.rules.write(), Arc::clone(&next));
        info!(
            target: "ispyb_gate::policy",
            previous_fingerprint = %previous.fingerprint(),
            fingerprint = %next.fingerprint(),
            rule_count = next.len(),
            "rule set reloaded"
        );
        previous
    }
}
