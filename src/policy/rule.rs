//! Permission rules and compiled rule sets.
//!
//! ## Rule File Format
//!
//! ```json
//! [
//!   { "resource": "/auth/login", "verb": "*", "allow_anonymous": true },
//!   { "resource": "/samples", "verb": "GET", "requires": ["reader", "admin"] },
//!   { "resource": "/samples/{id:int}", "verb": "DELETE", "requires": ["admin"] },
//!   { "resource": "/contacts/persons/{login}/info", "verb": "GET", "owner": { "param": "login" } }
//! ]
//! ```
//!
//! `requires` is any-of over roles and scopes; an empty list means "any
//! authenticated principal". `allow_anonymous` admits the anonymous principal.
//! `owner` restricts the rule to principals that own the addressed resource.
//!
//! ## Selection
//!
//! Among rules whose pattern, verb and predicate all match, the one with the
//! longest literal prefix wins; ties go to the earlier declaration. No match
//! is a deny.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use crate::types::{DenyReason, Principal, Verb, VerbMatcher};
use super::pattern::{PathParams, PathPattern, PatternError};

fn any_verb() -> VerbMatcher {
    VerbMatcher::Any
}

/// Resource-owner predicate attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerPredicate {
    /// Pattern placeholder that identifies the resource.
    pub param: String,
}

/// Declarative form of a rule, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Resource path pattern.
    pub resource: String,
    /// Verb or `*`.
    #[serde(default = "any_verb")]
    pub verb: VerbMatcher,
    /// Any-of role/scope requirement; empty = authenticated.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Admit the anonymous principal.
    #[serde(default)]
    pub allow_anonymous: bool,
    /// Optional resource-owner predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerPredicate>,
}

impl RuleSpec {
    /// Rule requiring any of `roles` for `verb` on `resource`.
    pub fn new<I, R>(resource: impl Into<String>, verb: VerbMatcher, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            resource: resource.into(),
            verb,
            requires: roles.into_iter().map(Into::into).collect(),
            allow_anonymous: false,
            owner: None,
        }
    }

    /// Rule admitting the anonymous principal.
    pub fn anonymous(resource: impl Into<String>, verb: VerbMatcher) -> Self {
        Self {
            allow_anonymous: true,
            ..Self::new(resource, verb, Vec::<String>::new())
        }
    }

    /// Rule admitting the owner of the resource addressed by `param`.
    pub fn owner(resource: impl Into<String>, verb: VerbMatcher, param: impl Into<String>) -> Self {
        Self {
            owner: Some(OwnerPredicate { param: param.into() }),
            ..Self::new(resource, verb, Vec::<String>::new())
        }
    }
}

/// What the selected rule demands of the principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Anyone, including the anonymous principal.
    Anonymous,
    /// Any authenticated principal.
    Authenticated,
    /// At least one of these roles or scopes.
    AnyOf(BTreeSet<String>),
}

impl Requirement {
    /// Whether `principal` satisfies the requirement.
    pub fn is_met_by(&self, principal: &Principal) -> bool {
        match self {
            Requirement::Anonymous => true,
            Requirement::Authenticated => principal.is_authenticated(),
            Requirement::AnyOf(grants) => {
                principal.is_authenticated() && grants.iter().any(|g| principal.holds(g))
            }
        }
    }

    fn describe(&self) -> Vec<String> {
        match self {
            Requirement::Anonymous => vec![],
            Requirement::Authenticated => vec!["<authenticated>".to_string()],
            Requirement::AnyOf(grants) => grants.iter().cloned().collect(),
        }
    }
}

/// Looks up the owner of the resource addressed by a rule placeholder.
///
/// Implementations must be cheap and non-blocking; they run inside the policy
/// decision.
pub trait OwnerResolver: Send + Sync {
    /// Owner (subject id or username) of the resource, if known.
    fn resolve_owner(&self, resource: &PathPattern, param: &str, value: &str) -> Option<String>;
}

/// Resolver for resources addressed by their owner's identifier, such as
/// `/contacts/persons/{login}/info`: the placeholder value is the owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamOwnerResolver;

impl OwnerResolver for ParamOwnerResolver {
    fn resolve_owner(&self, _resource: &PathPattern, _param: &str, value: &str) -> Option<String> {
        Some(value.to_string())
    }
}

/// Errors raised while building a rule set.
#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    /// Rules file could not be read.
    #[error("Failed to read rules file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Rules file is not valid JSON for `[RuleSpec]`.
    #[error("Failed to parse rules: {0}")]
    Parse(#[from] serde_json::Error),

    /// Rule pattern does not compile.
    #[error("Rule {index}: {source}")]
    Pattern {
        /// Declaration index.
        index: usize,
        /// Pattern error.
        #[source]
        source: PatternError,
    },

    /// Owner predicate names a placeholder the pattern does not have.
    #[error("Rule {index}: owner param '{param}' is not a placeholder of {resource}")]
    UnknownOwnerParam {
        /// Declaration index.
        index: usize,
        /// Parameter name.
        param: String,
        /// Rule resource.
        resource: String,
    },

    /// `allow_anonymous` combined with a role requirement or owner predicate.
    #[error("Rule {index}: allow_anonymous cannot be combined with requires/owner")]
    ConflictingRequirement {
        /// Declaration index.
        index: usize,
    },
}

/// A rule compiled for matching.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    index: usize,
    pattern: PathPattern,
    verb: VerbMatcher,
    requirement: Requirement,
    owner: Option<OwnerPredicate>,
}

impl CompiledRule {
    fn compile(index: usize, spec: &RuleSpec) -> Result<Self, RuleSetError> {
        let pattern = PathPattern::parse(&spec.resource)
            .map_err(|source| RuleSetError::Pattern { index, source })?;

        if spec.allow_anonymous && (!spec.requires.is_empty() || spec.owner.is_some()) {
            return Err(RuleSetError::ConflictingRequirement { index });
        }
        if let Some(owner) = &spec.owner {
            if !pattern.param_names().any(|name| name == owner.param) {
                return Err(RuleSetError::UnknownOwnerParam {
                    index,
                    param: owner.param.clone(),
                    resource: spec.resource.clone(),
                });
            }
        }

        let requirement = if spec.allow_anonymous {
            Requirement::Anonymous
        } else if spec.requires.is_empty() {
            Requirement::Authenticated
        } else {
            Requirement::AnyOf(spec.requires.iter().cloned().collect())
        };

        Ok(Self {
            index,
            pattern,
            verb: spec.verb,
            requirement,
            owner: spec.owner.clone(),
        })
    }

    /// Declaration index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Compiled resource pattern.
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Verb matcher.
    pub fn verb(&self) -> VerbMatcher {
        self.verb
    }

    /// Requirement.
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// Pattern, verb and predicate all hold for this request.
    fn applies(
        &self,
        principal: &Principal,
        path: &str,
        verb: Verb,
        resolver: &dyn OwnerResolver,
    ) -> bool {
        if !self.verb.matches(verb) {
            return false;
        }
        let Some(params) = self.pattern.matches(path) else {
            return false;
        };
        match &self.owner {
            None => true,
            Some(predicate) => self.owner_holds(predicate, &params, principal, resolver),
        }
    }

    fn owner_holds(
        &self,
        predicate: &OwnerPredicate,
        params: &PathParams,
        principal: &Principal,
        resolver: &dyn OwnerResolver,
    ) -> bool {
        params
            .get(&predicate.param)
            .and_then(|value| resolver.resolve_owner(&self.pattern, &predicate.param, value))
            .map(|owner| principal.is_owner(&owner))
            .unwrap_or(false)
    }
}

/// Outcome of a policy decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Access granted by the rule at `rule_index`.
    Allow {
        /// Declaration index of the selected rule.
        rule_index: usize,
    },
    /// Access denied.
    Deny(DenyReason),
}

impl Decision {
    /// Whether the decision is an allow.
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// Ordered, immutable collection of compiled rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    specs: Vec<RuleSpec>,
    rules: Vec<CompiledRule>,
    fingerprint: String,
}

/// Built-in rules used when no rules file is configured.
pub const DEFAULT_RULES_JSON: &str = include_str!("default_rules.json");

impl RuleSet {
    /// Compile rules in declaration order.
    pub fn from_specs(specs: Vec<RuleSpec>) -> Result<Self, RuleSetError> {
        let rules = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| CompiledRule::compile(index, spec))
            .collect::<Result<Vec<_>, _>>()?;
        let fingerprint = canonical_hash_hex(&specs);
        Ok(Self {
            specs,
            rules,
            fingerprint,
        })
    }

    /// Parse a JSON array of rules.
    pub fn from_json(json: &str) -> Result<Self, RuleSetError> {
        let specs: Vec<RuleSpec> = serde_json::from_str(json)?;
        Self::from_specs(specs)
    }

    /// Load a JSON rules file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RuleSetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// The built-in default rule set.
    pub fn builtin() -> Result<Self, RuleSetError> {
        Self::from_json(DEFAULT_RULES_JSON)
    }

    /// Empty rule set: denies everything.
    pub fn empty() -> Self {
        Self {
            specs: Vec::new(),
            rules: Vec::new(),
            fingerprint: canonical_hash_hex(&Vec::<RuleSpec>::new()),
        }
    }

    /// Select the applicable rule: longest literal prefix, then earliest.
    pub fn select(
        &self,
        principal: &Principal,
        path: &str,
        verb: Verb,
        resolver: &dyn OwnerResolver,
    ) -> Option<&CompiledRule> {
        let mut best: Option<&CompiledRule> = None;
        for rule in &self.rules {
            if !rule.applies(principal, path, verb, resolver) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => rule.pattern.literal_prefix_len() > current.pattern.literal_prefix_len(),
            };
            if better {
                best = Some(rule);
            }
        }
        best
    }

    /// Decide whether `principal` may perform `verb` on `path`.
    pub fn decide(
        &self,
        principal: &Principal,
        path: &str,
        verb: Verb,
        resolver: &dyn OwnerResolver,
    ) -> Decision {
        match self.select(principal, path, verb, resolver) {
            None => Decision::Deny(DenyReason::NoMatchingRule),
            Some(rule) if rule.requirement.is_met_by(principal) => Decision::Allow {
                rule_index: rule.index,
            },
            Some(rule) => Decision::Deny(DenyReason::InsufficientRole {
                rule_index: rule.index,
                required: rule.requirement.describe(),
            }),
        }
    }

    /// Whether the rule selected for the anonymous principal admits it.
    pub fn permits_anonymous(&self, path: &str, verb: Verb, resolver: &dyn OwnerResolver) -> bool {
        let anonymous = Principal::anonymous();
        matches!(
            self.select(&anonymous, path, verb, resolver).map(|r| &r.requirement),
            Some(Requirement::Anonymous)
        )
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Declarative rules in declaration order.
    pub fn specs(&self) -> &[RuleSpec] {
        &self.specs
    }

    /// Deterministic fingerprint of the declarative rules.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the rule set is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
