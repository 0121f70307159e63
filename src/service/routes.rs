//! Axum routes for the gateway service.
//!
//! Health probes are plain axum routes outside the gate. Everything else goes
//! through the fallback handler, which converts the request, dispatches it on
//! the sealed [`RouteTable`](crate::registry::RouteTable) and converts the
//! response back.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::gate::{handler_fn, GatewayRequest, GatewayResponse, GuardChain, RequestContext};
use crate::policy::{PolicyEngine, RuleSet, RuleSpec};
use crate::registry::{RegistryError, RouteRegistry};
use crate::types::Verb;

use super::middleware::record_gate_response;
use super::state::{GatewayState, RulesSource};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// Response Types
// ============================================================================

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub rule_count: usize,
    pub rules_fingerprint: String,
    pub rules_source: String,
    pub route_count: usize,
    pub uptime_secs: i64,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub details: Option<String>,
}

/// Active rule set summary for `GET /admin/policy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySummary {
    pub rule_count: usize,
    pub fingerprint: String,
    pub source: String,
    pub rules: Vec<RuleSpec>,
}

/// Result of `POST /admin/policy/reload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub previous_fingerprint: String,
    pub fingerprint: String,
    pub rule_count: usize,
}

/// Optional body of `POST /admin/policy/reload`; without it the source is re-read.
#[derive(Debug, Clone, Deserialize)]
pub struct ReloadRequest {
    pub rules: Vec<RuleSpec>,
}

// ============================================================================
// Admin routes (behind the gate)
// ============================================================================

fn summarize(rules: &RuleSet, source: &RulesSource) -> PolicySummary {
    PolicySummary {
        rule_count: rules.len(),
        fingerprint: rules.fingerprint().to_string(),
        source: source.describe(),
        rules: rules.specs().to_vec(),
    }
}

fn reload_rules(policy: &PolicyEngine, source: &RulesSource, body: Option<Value>) -> GatewayResponse {
    let loaded = match body.filter(|b| !b.is_null()) {
        Some(body) => serde_json::from_value::<ReloadRequest>(body)
            .map_err(|e| e.to_string())
            .and_then(|request| RuleSet::from_specs(request.rules).map_err(|e| e.to_string())),
        None => source.load().map_err(|e| e.to_string()),
    };

    match loaded {
        Ok(rules) => {
            let fingerprint = rules.fingerprint().to_string();
            let rule_count = rules.len();
            let previous = policy.reload(rules);
            GatewayResponse::ok(json!(ReloadResponse {
                previous_fingerprint: previous.fingerprint().to_string(),
                fingerprint,
                rule_count,
            }))
        }
        Err(error) => {
            // The active rule set stays in place.
            warn!(target: "ispyb_gate::policy", error = %error, "rule set reload rejected");
            GatewayResponse::error(400, "INVALID_RULES", error)
        }
    }
}

/// Mount `GET /admin/policy` and `POST /admin/policy/reload`.
pub fn register_admin_routes(
    registry: &mut RouteRegistry,
    policy: Arc<PolicyEngine>,
    source: RulesSource,
) -> Result<(), RegistryError> {
    let show = {
        let policy = Arc::clone(&policy);
        let source = source.clone();
        handler_fn(move |_ctx: RequestContext, _request: GatewayRequest| {
            let summary = summarize(&policy.snapshot(), &source);
            async move { GatewayResponse::ok(json!(summary)) }
        })
    };

    let reload = handler_fn(move |ctx: RequestContext, request: GatewayRequest| {
        let response = reload_rules(&policy, &source, request.body);
        if response.status == 200 {
            info!(
                target: "ispyb_gate::policy",
                request_id = %ctx.request_id,
                username = %ctx.principal.username(),
                "rule set reloaded by request"
            );
        }
        async move { response }
    });

    let mut admin = registry.namespace("/admin")?;
    admin
        .route("/policy", Verb::Get, show, GuardChain::standard())?
        .route("/policy/reload", Verb::Post, reload, GuardChain::standard())?;
    Ok(())
}

// ============================================================================
// Gateway fallback
// ============================================================================

fn into_axum(response: GatewayResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if response.body.is_null() {
        return status.into_response();
    }
    (status, Json(response.body)).into_response()
}

fn gateway_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    into_axum(GatewayResponse::error(status.as_u16(), code, message))
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| *name != header::AUTHORIZATION)
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

/// Convert an axum request into a [`GatewayRequest`].
pub async fn to_gateway_request(request: Request) -> Result<GatewayRequest, Response> {
    let (parts, body) = request.into_parts();

    let verb = Verb::from_str(parts.method.as_str()).map_err(|e| {
        gateway_error(StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", e.to_string())
    })?;

    let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(query)| query)
        .map_err(|e| gateway_error(StatusCode::BAD_REQUEST, "INVALID_QUERY", e.body_text()))?;

    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| gateway_error(StatusCode::PAYLOAD_TOO_LARGE, "INVALID_BODY", e.to_string()))?;
    let body = if bytes.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&bytes)
                .map_err(|e| gateway_error(StatusCode::BAD_REQUEST, "INVALID_JSON", e.to_string()))?,
        )
    };

    // A header that is not valid UTF-8 counts as malformed, not missing.
    let authorization = parts
        .headers
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or("").to_string());

    Ok(GatewayRequest {
        verb,
        path: parts.uri.path().to_string(),
        authorization,
        headers: header_map(&parts.headers),
        query,
        body,
    })
}

/// Every non-health request: resolve, gate, handle.
async fn gateway_handler(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let request = match to_gateway_request(request).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let verb = request.verb;
    let response = state.routes.dispatch(&state.gate, request).await;
    record_gate_response(verb, &response);
    into_axum(response)
}

// ============================================================================
// Health checks
// ============================================================================

/// Health check endpoint (detailed).
async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    let rules = state.gate.policy().snapshot();
    Json(HealthResponse {
        status: if rules.is_empty() { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rule_count: rules.len(),
        rules_fingerprint: rules.fingerprint().to_string(),
        rules_source: state.rules_source.describe(),
        route_count: state.routes.len(),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

/// Liveness probe endpoint. Does not check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// An empty rule set denies every gated request, so it is reported as not ready.
async fn readiness_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.gate.policy().snapshot().is_empty() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                details: Some("No permission rules loaded".to_string()),
            }),
        ));
    }
    Ok(Json(ReadinessResponse {
        ready: true,
        details: None,
    }))
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the gateway.
pub fn create_router(state: GatewayState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .fallback(gateway_handler)
        .with_state(state)
}
