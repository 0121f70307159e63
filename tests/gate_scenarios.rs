//! End-to-end gate scenarios.
//!
//! These tests drive the sealed route table and the request gate together,
//! the same way the HTTP fallback handler does, without a socket.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use ispyb_gate::service::{Collaborators, GatewayState};
use ispyb_gate::{
    BearerToken, GatewayConfig, GatewayRequest, GatewayResponse, InMemoryIdentityStore, RuleSet,
    RuleSpec, SubjectId, TokenRecord, TokenStore, UserSeed, Verb, VerbMatcher,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn seed(id: &str, username: &str, roles: &[&str]) -> UserSeed {
    UserSeed {
        subject_id: id.to_string(),
        username: username.to_string(),
        password: format!("{username}-pw"),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        scopes: Vec::new(),
    }
}

struct Harness {
    state: GatewayState,
    store: Arc<InMemoryIdentityStore>,
    config: GatewayConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    fn with_config(config: GatewayConfig) -> Self {
        let store = Arc::new(InMemoryIdentityStore::with_users([
            seed("1", "admin", &["admin"]),
            seed("2", "manager", &["manager"]),
            seed("3", "reader", &["reader"]),
            seed("4", "boaty", &["reader"]),
        ]));
        let state = GatewayState::build(&config, Collaborators::in_memory(Arc::clone(&store)))
            .expect("gateway builds");
        Self { state, store, config }
    }

    async fn send(&self, request: GatewayRequest) -> GatewayResponse {
        self.state.routes.dispatch(&self.state.gate, request).await
    }

    async fn login(&self, username: &str) -> String {
        let response = self
            .send(
                GatewayRequest::new(Verb::Get, "/auth/login")
                    .with_header("username", username)
                    .with_header("password", format!("{username}-pw")),
            )
            .await;
        assert_eq!(response.status, 200, "login failed: {}", response.body);
        response.body["token"].as_str().expect("token field").to_string()
    }

    async fn create_sample(&self, token: &str, name: &str) -> Value {
        let response = self
            .send(
                GatewayRequest::new(Verb::Post, "/samples")
                    .with_bearer(token)
                    .with_body(json!({ "name": name })),
            )
            .await;
        assert_eq!(response.status, 201, "create failed: {}", response.body);
        response.body
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reader_may_list_samples() {
    let h = Harness::new();
    let token = h.login("reader").await;

    let response = h
        .send(GatewayRequest::new(Verb::Get, "/samples").with_bearer(&token))
        .await;

    assert_eq!(response.status, 200);
    assert!(response.body.is_array());
}

#[tokio::test]
async fn reader_may_not_delete_sample() {
    let h = Harness::new();
    let admin = h.login("admin").await;
    h.create_sample(&admin, "lysozyme").await;
    let reader = h.login("reader").await;

    let response = h
        .send(GatewayRequest::new(Verb::Delete, "/samples/1").with_bearer(&reader))
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(response.error_code(), Some("INSUFFICIENT_ROLE"));

    // The handler never ran: the sample is still there.
    let still_there = h
        .send(GatewayRequest::new(Verb::Get, "/samples/1").with_bearer(&reader))
        .await;
    assert_eq!(still_there.status, 200);
}

#[tokio::test]
async fn legacy_alias_matches_primary() {
    let h = Harness::new();
    let token = h.login("manager").await;
    h.create_sample(&token, "thaumatin").await;

    let primary = h
        .send(GatewayRequest::new(Verb::Get, "/samples/1").with_bearer(&token))
        .await;
    let legacy = h
        .send(GatewayRequest::new(Verb::Get, "/legacy/samples/1").with_bearer(&token))
        .await;

    assert_eq!(primary.status, 200);
    assert_eq!(primary, legacy);
}

#[tokio::test]
async fn legacy_alias_is_gated_like_primary() {
    let h = Harness::new();
    let admin = h.login("admin").await;
    h.create_sample(&admin, "insulin").await;
    let reader = h.login("reader").await;

    for path in ["/samples/1", "/legacy/samples/1"] {
        let response = h
            .send(GatewayRequest::new(Verb::Delete, path).with_bearer(&reader))
            .await;
        assert_eq!(response.status, 403, "{path}");
        assert_eq!(response.error_code(), Some("INSUFFICIENT_ROLE"), "{path}");

        let anonymous = h.send(GatewayRequest::new(Verb::Get, path)).await;
        assert_eq!(anonymous.status, 401, "{path}");
        assert_eq!(anonymous.error_code(), Some("MISSING_CREDENTIAL"), "{path}");
    }
}

#[tokio::test]
async fn revoked_token_is_rejected() {
    let h = Harness::new();
    let token = h.login("reader").await;

    let ok = h
        .send(GatewayRequest::new(Verb::Get, "/samples").with_bearer(&token))
        .await;
    assert_eq!(ok.status, 200);

    h.store
        .revoke_token(&BearerToken::from_string(token.clone()))
        .await
        .unwrap();

    let response = h
        .send(GatewayRequest::new(Verb::Get, "/samples").with_bearer(&token))
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.error_code(), Some("REVOKED_CREDENTIAL"));
}

#[tokio::test]
async fn logout_revokes_presented_token() {
    let h = Harness::new();
    let token = h.login("boaty").await;

    let logout = h
        .send(GatewayRequest::new(Verb::Post, "/auth/logout").with_bearer(&token))
        .await;
    assert_eq!(logout.status, 200);
    assert_eq!(logout.body["revoked"], true);

    let response = h
        .send(GatewayRequest::new(Verb::Get, "/auth/whoami").with_bearer(&token))
        .await;
    assert_eq!(response.error_code(), Some("REVOKED_CREDENTIAL"));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let h = Harness::new();
    let token = BearerToken::mint(&h.config.token_secret);
    let issued_at = Utc::now() - Duration::hours(2);
    h.store
        .put_token(TokenRecord {
            token: token.clone(),
            subject_id: SubjectId::new("3"),
            username: "reader".to_string(),
            issued_at,
            expires_at: issued_at + Duration::hours(1),
            revoked: false,
            last_used_at: None,
        })
        .await
        .unwrap();

    let response = h
        .send(GatewayRequest::new(Verb::Get, "/samples").with_bearer(token.as_str()))
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.error_code(), Some("EXPIRED_CREDENTIAL"));
}

#[tokio::test]
async fn revoked_wins_over_expired() {
    let h = Harness::new();
    let token = BearerToken::mint(&h.config.token_secret);
    let issued_at = Utc::now() - Duration::hours(2);
    h.store
        .put_token(TokenRecord {
            token: token.clone(),
            subject_id: SubjectId::new("3"),
            username: "reader".to_string(),
            issued_at,
            expires_at: issued_at + Duration::hours(1),
            revoked: true,
            last_used_at: None,
        })
        .await
        .unwrap();

    let response = h
        .send(GatewayRequest::new(Verb::Get, "/samples").with_bearer(token.as_str()))
        .await;
    assert_eq!(response.error_code(), Some("REVOKED_CREDENTIAL"));
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let h = Harness::new();
    let forged = BearerToken::mint(b"some_other_secret_of_32_bytes___");

    let response = h
        .send(GatewayRequest::new(Verb::Get, "/samples").with_bearer(forged.as_str()))
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.error_code(), Some("INVALID_CREDENTIAL"));
}

#[tokio::test]
async fn role_change_applies_to_live_tokens() {
    let h = Harness::new();
    let token = h.login("reader").await;

    let before = h
        .send(GatewayRequest::new(Verb::Post, "/samples").with_bearer(&token).with_body(json!({})))
        .await;
    assert_eq!(before.error_code(), Some("INSUFFICIENT_ROLE"));

    h.store.set_roles(&SubjectId::new("3"), ["manager"]).unwrap();

    let after = h
        .send(GatewayRequest::new(Verb::Post, "/samples").with_bearer(&token).with_body(json!({})))
        .await;
    assert_eq!(after.status, 201);
}

#[tokio::test]
async fn person_info_is_visible_to_owner_and_managers_only() {
    let h = Harness::new();
    let manager = h.login("manager").await;
    let created = h
        .send(
            GatewayRequest::new(Verb::Post, "/contacts/persons")
                .with_bearer(&manager)
                .with_body(json!({ "login": "boaty", "familyName": "McBoatface" })),
        )
        .await;
    assert_eq!(created.status, 201);

    let owner = h.login("boaty").await;
    let own = h
        .send(GatewayRequest::new(Verb::Get, "/contacts/persons/boaty/info").with_bearer(&owner))
        .await;
    assert_eq!(own.status, 200);
    assert_eq!(own.body["familyName"], "McBoatface");

    let by_manager = h
        .send(GatewayRequest::new(Verb::Get, "/legacy/contacts/persons/boaty/info").with_bearer(&manager))
        .await;
    assert_eq!(by_manager.status, 200);

    let reader = h.login("reader").await;
    let other = h
        .send(GatewayRequest::new(Verb::Get, "/contacts/persons/boaty/info").with_bearer(&reader))
        .await;
    assert_eq!(other.status, 403);
    assert_eq!(other.error_code(), Some("INSUFFICIENT_ROLE"));
}

#[tokio::test]
async fn unrouted_requests_are_not_gated() {
    let h = Harness::new();

    let missing = h.send(GatewayRequest::new(Verb::Get, "/nothing/here")).await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.error_code(), Some("ROUTE_NOT_FOUND"));

    let wrong_verb = h.send(GatewayRequest::new(Verb::Post, "/auth/whoami")).await;
    assert_eq!(wrong_verb.status, 405);
    assert_eq!(wrong_verb.error_code(), Some("METHOD_NOT_ALLOWED"));
}

#[tokio::test]
async fn bad_credentials_do_not_issue_tokens() {
    let h = Harness::new();
    let response = h
        .send(
            GatewayRequest::new(Verb::Post, "/auth/login")
                .with_body(json!({ "username": "reader", "password": "wrong" })),
        )
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(h.store.num_tokens(), 0);
}

#[tokio::test]
async fn auth_routes_follow_rule_set() {
    let h = Harness::new();
    let reader = h.login("reader").await;
    let admin = h.login("admin").await;

    let before = h
        .send(GatewayRequest::new(Verb::Get, "/auth/whoami").with_bearer(&reader))
        .await;
    assert_eq!(before.status, 200);
    assert_eq!(before.body["username"], "reader");

    let rules = RuleSet::from_specs(vec![RuleSpec::new(
        "/auth/whoami",
        VerbMatcher::Only(Verb::Get),
        ["admin"],
    )])
    .unwrap();
    h.state.gate.policy().reload(rules);

    let denied = h
        .send(GatewayRequest::new(Verb::Get, "/auth/whoami").with_bearer(&reader))
        .await;
    assert_eq!(denied.status, 403);
    assert_eq!(denied.error_code(), Some("INSUFFICIENT_ROLE"));

    let allowed = h
        .send(GatewayRequest::new(Verb::Get, "/auth/whoami").with_bearer(&admin))
        .await;
    assert_eq!(allowed.status, 200);

    // No rule covers logout any more.
    let logout = h
        .send(GatewayRequest::new(Verb::Post, "/auth/logout").with_bearer(&reader))
        .await;
    assert_eq!(logout.status, 403);
    assert_eq!(logout.error_code(), Some("NO_MATCHING_RULE"));

    // Login stays public whatever the rules say.
    h.login("manager").await;
}

#[tokio::test]
async fn long_expired_tokens_are_purged_on_login() {
    let config = GatewayConfig {
        token_ttl: Duration::milliseconds(1),
        ..GatewayConfig::default()
    };
    let h = Harness::with_config(config);

    for _ in 0..100 {
        h.login("reader").await;
    }
    assert_eq!(h.store.num_tokens(), 100);

    // Past the 1 ms lifetime and the one hour retention window.
    let stale = BearerToken::mint(&h.config.token_secret);
    let long_ago = Utc::now() - Duration::hours(3);
    h.store
        .put_token(TokenRecord {
            token: stale.clone(),
            subject_id: SubjectId::new("3"),
            username: "reader".to_string(),
            issued_at: long_ago,
            expires_at: long_ago + Duration::hours(1),
            revoked: true,
            last_used_at: None,
        })
        .await
        .unwrap();

    h.login("reader").await;
    assert!(h.store.token(&stale).is_none());
    // Recently expired tokens are kept so they still report as expired.
    assert_eq!(h.store.num_tokens(), 101);
}
