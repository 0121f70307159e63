//! Resolved request identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a subject (person or service account) in the identity store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a subject id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Roles and scopes currently granted to a subject.
///
/// Returned by the identity store on every verification so that role changes
/// take effect on the next request without re-issuing tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectGrants {
    /// Login name of the subject.
    pub username: String,
    /// Role names (e.g. `reader`, `manager`, `admin`).
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Fine-grained permission strings.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl SubjectGrants {
    /// Create grants for a username with the given roles and no scopes.
    pub fn with_roles<I, R>(username: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            username: username.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            scopes: BTreeSet::new(),
        }
    }
}

/// Resolved identity and permissions for exactly one request.
///
/// Created by the verifier from a token, or as the anonymous principal when a
/// rule explicitly permits anonymous access. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    subject_id: Option<SubjectId>,
    username: String,
    roles: BTreeSet<String>,
    scopes: BTreeSet<String>,
}

impl Principal {
    /// Build an authenticated principal from a subject and its current grants.
    pub fn authenticated(subject_id: SubjectId, grants: SubjectGrants) -> Self {
        Self {
            subject_id: Some(subject_id),
            username: grants.username,
            roles: grants.roles,
            scopes: grants.scopes,
        }
    }

    /// The anonymous principal: no subject, empty role and scope sets.
    pub fn anonymous() -> Self {
        Self {
            subject_id: None,
            username: String::new(),
            roles: BTreeSet::new(),
            scopes: BTreeSet::new(),
        }
    }

    /// Whether this principal was produced from a verified credential.
    pub fn is_authenticated(&self) -> bool {
        self.subject_id.is_some()
    }

    /// Subject id, `None` for the anonymous principal.
    pub fn subject_id(&self) -> Option<&SubjectId> {
        self.subject_id.as_ref()
    }

    /// Login name (empty for the anonymous principal).
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Role names.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Scope strings.
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Whether the principal holds `grant` either as a role or as a scope.
    pub fn holds(&self, grant: &str) -> bool {
        self.roles.contains(grant) || self.scopes.contains(grant)
    }

    /// Whether the principal is identified by `owner` (subject id or username).
    pub fn is_owner(&self, owner: &str) -> bool {
        match &self.subject_id {
            Some(id) => id.as_str() == owner || (!self.username.is_empty() && self.username == owner),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_holds_nothing() {
        let anon = Principal::anonymous();
        assert!(!anon.is_authenticated());
        assert!(anon.roles().is_empty());
        assert!(!anon.holds("reader"));
        assert!(!anon.is_owner(""));
    }

    #[test]
    fn test_holds_role_or_scope() {
        let mut grants = SubjectGrants::with_roles("alice", ["reader"]);
        grants.scopes.insert("samples:write".to_string());
        let principal = Principal::authenticated(SubjectId::new("7"), grants);

        assert!(principal.holds("reader"));
        assert!(principal.holds("samples:write"));
        assert!(!principal.holds("admin"));
    }

    #[test]
    fn test_owner_by_id_or_username() {
        let principal = Principal::authenticated(
            SubjectId::new("7"),
            SubjectGrants::with_roles("alice", Vec::<String>::new()),
        );
        assert!(principal.is_owner("7"));
        assert!(principal.is_owner("alice"));
        assert!(!principal.is_owner("bob"));
    }
}
