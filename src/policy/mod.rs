//! Permission policy: path patterns, rules, and the engine.

pub mod pattern;
pub mod rule;
pub mod engine;

pub use pattern::{PathPattern, PathParams, ParamKind, Segment, PatternError, split_path};
pub use rule::{
    RuleSpec, RuleSet, RuleSetError, CompiledRule, Requirement, Decision,
    OwnerPredicate, OwnerResolver, ParamOwnerResolver, DEFAULT_RULES_JSON,
};
pub use engine::PolicyEngine;
