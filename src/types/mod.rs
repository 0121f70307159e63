//! Core types for the gate.

pub mod verb;
pub mod principal;
pub mod token;
pub mod failure;

pub use verb::{Verb, VerbMatcher, UnknownVerb};
pub use principal::{Principal, SubjectId, SubjectGrants};
pub use token::{BearerToken, TokenRecord};
pub use failure::{
    VerificationFailure, DenyReason, GateFailure,
    STATUS_UNAUTHORIZED, STATUS_FORBIDDEN,
};
