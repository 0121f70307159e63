//! The request gate.
//!
//! Every route is registered with a [`GuardChain`]. At registration the chain
//! and the handler are fused into one [`GuardedHandler`]; at request time the
//! gate runs the stages strictly in order and either invokes the handler with
//! a [`RequestContext`] or returns the failure response. There is no path on
//! which the handler runs after a failed stage.
//!
//! ```text
//! request ─→ authenticate ─→ authorize ─→ handler(ctx{principal})
//!               │ 401           │ 403
//!               └───────────────┴──→ error response (handler not invoked)
//! ```
//!
//! A missing credential is admitted as the anonymous principal only when the
//! rule that would be selected for that principal explicitly allows anonymous
//! access; the authorize stage still runs.

pub mod chain;
pub mod context;

use std::sync::Arc;

use tracing::{debug, info};

use crate::policy::{Decision, PathParams, PolicyEngine, RuleSet};
use crate::types::{GateFailure, Principal, VerificationFailure};
use crate::verifier::CredentialVerifier;

pub use chain::{GuardChain, GuardChainError, GuardStage};
pub use context::{
    handler_fn, GatewayRequest, GatewayResponse, Handler, HandlerFn, RequestContext, RouteInfo,
};

/// A handler fused with its guard chain.
pub struct GuardedHandler {
    chain: GuardChain,
    handler: Arc<dyn Handler>,
}

impl GuardedHandler {
    /// Fuse `handler` with `chain`.
    pub fn new(chain: GuardChain, handler: Arc<dyn Handler>) -> Self {
        Self { chain, handler }
    }

    /// The guard chain.
    pub fn chain(&self) -> &GuardChain {
        &self.chain
    }
}

/// Runs guard chains against the shared verifier and policy engine.
#[derive(Clone)]
pub struct RequestGate {
    verifier: Arc<CredentialVerifier>,
    policy: Arc<PolicyEngine>,
}

impl RequestGate {
    /// Create a gate.
    pub fn new(verifier: Arc<CredentialVerifier>, policy: Arc<PolicyEngine>) -> Self {
        Self { verifier, policy }
    }

    /// The credential verifier.
    pub fn verifier(&self) -> &Arc<CredentialVerifier> {
        &self.verifier
    }

    /// The policy engine.
    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// Run `guarded` for `request`.
    ///
    /// `resource_path` is the path the policy is evaluated against; for
    /// legacy aliases it is the primary path, so both trees are authorized
    /// identically.
    pub async fn run(
        &self,
        guarded: &GuardedHandler,
        request: GatewayRequest,
        resource_path: &str,
        params: PathParams,
        route: RouteInfo,
    ) -> GatewayResponse {
        let request_id = uuid::Uuid::new_v4().to_string();

        match self.admit(guarded.chain(), &request, resource_path).await {
            Ok(principal) => {
                debug!(
                    target: "ispyb_gate::gate",
                    request_id = %request_id,
                    verb = %request.verb,
                    path = %request.path,
                    username = %principal.username(),
                    legacy = route.legacy,
                    "request admitted"
                );
                let ctx = RequestContext {
                    request_id,
                    principal,
                    params,
                    route,
                };
                guarded.handler.call(ctx, request).await
            }
            Err(failure) => {
                info!(
                    target: "ispyb_gate::gate",
                    request_id = %request_id,
                    verb = %request.verb,
                    path = %request.path,
                    status = failure.status(),
                    code = failure.code(),
                    "request rejected"
                );
                GatewayResponse::from_failure(&failure)
            }
        }
    }

    /// Run the guard stages of `chain` and return the admitted principal.
    ///
    /// One rule-set snapshot is used for the whole chain.
    pub async fn admit(
        &self,
        chain: &GuardChain,
        request: &GatewayRequest,
        resource_path: &str,
    ) -> Result<Principal, GateFailure> {
        let rules = self.policy.snapshot();
        let mut principal: Option<Principal> = None;

        for stage in chain.stages() {
            match stage {
                GuardStage::Authenticate => {
                    principal = Some(self.authenticate(&rules, request, resource_path).await?);
                }
                GuardStage::Authorize => {
                    let current = principal
                        .as_ref()
                        .ok_or(VerificationFailure::MissingCredential)?;
                    if let Decision::Deny(reason) =
                        rules.decide(current, resource_path, request.verb, self.policy.resolver())
                    {
                        return Err(reason.into());
                    }
                }
            }
        }

        Ok(principal.unwrap_or_else(Principal::anonymous))
    }

    async fn authenticate(
        &self,
        rules: &RuleSet,
        request: &GatewayRequest,
        resource_path: &str,
    ) -> Result<Principal, VerificationFailure> {
        match self.verifier.verify(request.authorization.as_deref()).await {
            Err(VerificationFailure::MissingCredential)
                if rules.permits_anonymous(resource_path, request.verb, self.policy.resolver()) =>
            {
                Ok(Principal::anonymous())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RuleSpec;
    use crate::store::{InMemoryIdentityStore, TokenStore, UserSeed};
    use crate::types::{BearerToken, SubjectId, TokenRecord, Verb, VerbMatcher};
    use crate::verifier::VerifierConfig;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &[u8] = b"test_gate_secret_32_bytes_min!!!";

    struct Fixture {
        gate: RequestGate,
        store: Arc<InMemoryIdentityStore>,
    }

    fn fixture(rules: Vec<RuleSpec>) -> Fixture {
        let store = Arc::new(InMemoryIdentityStore::with_users([UserSeed {
            subject_id: "1".into(),
            username: "t1".into(),
            password: "pass".into(),
            roles: vec!["reader".into()],
            scopes: vec![],
        }]));
        let verifier = CredentialVerifier::new(store.clone(), SECRET.to_vec(), VerifierConfig::default());
        let policy = PolicyEngine::new(RuleSet::from_specs(rules).unwrap());
        Fixture {
            gate: RequestGate::new(Arc::new(verifier), Arc::new(policy)),
            store,
        }
    }

    async fn token(store: &InMemoryIdentityStore) -> BearerToken {
        let token = BearerToken::mint(SECRET);
        let now = Utc::now();
        store
            .put_token(TokenRecord {
                token: token.clone(),
                subject_id: SubjectId::new("1"),
                username: "t1".into(),
                issued_at: now,
                expires_at: now + Duration::hours(1),
                revoked: false,
                last_used_at: None,
            })
            .await
            .unwrap();
        token
    }

    fn counting_handler(calls: Arc<AtomicUsize>) -> GuardedHandler {
        GuardedHandler::new(
            GuardChain::standard(),
            handler_fn(move |ctx: RequestContext, _req: GatewayRequest| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    GatewayResponse::ok(json!({ "user": ctx.principal.username() }))
                }
            }),
        )
    }

    fn route(path: &str) -> RouteInfo {
        RouteInfo {
            template: path.to_string(),
            primary_template: path.to_string(),
            legacy: false,
        }
    }

    fn reader_rules() -> Vec<RuleSpec> {
        vec![
            RuleSpec::new("/samples", VerbMatcher::Only(Verb::Get), ["reader"]),
            RuleSpec::new("/samples", VerbMatcher::Only(Verb::Post), ["admin"]),
        ]
    }

    #[tokio::test]
    async fn test_missing_header_never_invokes_handler() {
        let f = fixture(reader_rules());
        let calls = Arc::new(AtomicUsize::new(0));
        let guarded = counting_handler(calls.clone());

        let response = f
            .gate
            .run(&guarded, GatewayRequest::new(Verb::Get, "/samples"), "/samples", PathParams::new(), route("/samples"))
            .await;

        assert_eq!(response.status, 401);
        assert_eq!(response.error_code(), Some("MISSING_CREDENTIAL"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_authorized_request_reaches_handler_with_principal() {
        let f = fixture(reader_rules());
        let t = token(&f.store).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let guarded = counting_handler(calls.clone());

        let request = GatewayRequest::new(Verb::Get, "/samples").with_bearer(t.as_str());
        let response = f.gate.run(&guarded, request, "/samples", PathParams::new(), route("/samples")).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.body["user"], "t1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forbidden_never_invokes_handler() {
        let f = fixture(reader_rules());
        let t = token(&f.store).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let guarded = counting_handler(calls.clone());

        let request = GatewayRequest::new(Verb::Post, "/samples").with_bearer(t.as_str());
        let response = f.gate.run(&guarded, request, "/samples", PathParams::new(), route("/samples")).await;

        assert_eq!(response.status, 403);
        assert_eq!(response.error_code(), Some("INSUFFICIENT_ROLE"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_matching_rule_is_forbidden() {
        let f = fixture(reader_rules());
        let t = token(&f.store).await;
        let request = GatewayRequest::new(Verb::Get, "/phasing").with_bearer(t.as_str());

        let err = f.gate.admit(&GuardChain::standard(), &request, "/phasing").await.unwrap_err();
        assert_eq!(err.code(), "NO_MATCHING_RULE");
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn test_authentication_failure_precedes_authorization() {
        // The path has no rule at all, but a bad token must still be a 401.
        let f = fixture(vec![]);
        let request = GatewayRequest::new(Verb::Get, "/nowhere").with_authorization("Bearer garbage");

        let err = f.gate.admit(&GuardChain::standard(), &request, "/nowhere").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_CREDENTIAL");
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn test_anonymous_only_when_rule_allows() {
        let f = fixture(vec![
            RuleSpec::anonymous("/auth/login", VerbMatcher::Any),
            RuleSpec::new("/samples", VerbMatcher::Only(Verb::Get), ["reader"]),
        ]);

        let login = GatewayRequest::new(Verb::Get, "/auth/login");
        let principal = f.gate.admit(&GuardChain::standard(), &login, "/auth/login").await.unwrap();
        assert!(!principal.is_authenticated());

        let samples = GatewayRequest::new(Verb::Get, "/samples");
        let err = f.gate.admit(&GuardChain::standard(), &samples, "/samples").await.unwrap_err();
        assert_eq!(err.code(), "MISSING_CREDENTIAL");
    }

    #[tokio::test]
    async fn test_anonymous_rule_does_not_excuse_bad_token() {
        let f = fixture(vec![RuleSpec::anonymous("/auth/login", VerbMatcher::Any)]);
        let request = GatewayRequest::new(Verb::Get, "/auth/login").with_authorization("Bearer nope");

        let err = f.gate.admit(&GuardChain::standard(), &request, "/auth/login").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_CREDENTIAL");
    }

    #[tokio::test]
    async fn test_authenticate_only_chain_skips_policy() {
        let f = fixture(vec![]);
        let t = token(&f.store).await;
        let request = GatewayRequest::new(Verb::Get, "/auth/whoami").with_bearer(t.as_str());

        let principal = f.gate.admit(&GuardChain::authenticated(), &request, "/auth/whoami").await.unwrap();
        assert_eq!(principal.username(), "t1");
    }

    #[tokio::test]
    async fn test_public_chain_is_anonymous() {
        let f = fixture(vec![]);
        let principal = f
            .gate
            .admit(&GuardChain::public(), &GatewayRequest::new(Verb::Get, "/health"), "/health")
            .await
            .unwrap();
        assert!(!principal.is_authenticated());
    }

    #[tokio::test]
    async fn test_revocation_during_handler_completes() {
        let f = fixture(reader_rules());
        let t = token(&f.store).await;
        let store = Arc::clone(&f.store);
        let revoked = t.clone();

        let guarded = GuardedHandler::new(
            GuardChain::standard(),
            handler_fn(move |_ctx, _req| {
                let store = Arc::clone(&store);
                let revoked = revoked.clone();
                async move {
                    store.revoke_token(&revoked).await.unwrap();
                    GatewayResponse::ok(json!({ "done": true }))
                }
            }),
        );

        let first = GatewayRequest::new(Verb::Get, "/samples").with_bearer(t.as_str());
        let response = f.gate.run(&guarded, first, "/samples", PathParams::new(), route("/samples")).await;
        assert_eq!(response.status, 200);

        let second = GatewayRequest::new(Verb::Get, "/samples").with_bearer(t.as_str());
        let response = f.gate.run(&guarded, second, "/samples", PathParams::new(), route("/samples")).await;
        assert_eq!(response.status, 401);
        assert_eq!(response.error_code(), Some("REVOKED_CREDENTIAL"));
    }
}
