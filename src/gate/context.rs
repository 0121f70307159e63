//! Transport-neutral request, response, context and handler types.
//!
//! The gate and the route table work on these types; the axum service
//! converts to and from them at the edge.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::policy::PathParams;
use crate::types::{GateFailure, Principal, Verb};

/// Inbound request as seen by the gate.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Request verb.
    pub verb: Verb,
    /// Request path, without query string.
    pub path: String,
    /// Raw `Authorization` header value, if present.
    pub authorization: Option<String>,
    /// Other headers, lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// Query parameters.
    pub query: BTreeMap<String, String>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl GatewayRequest {
    /// Create a request with no headers and no body.
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            authorization: None,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
        }
    }

    /// Set the `Authorization` header.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Set `Authorization: Bearer <token>`.
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_authorization(format!("Bearer {}", token))
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Add a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Set the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Response produced by a handler or by the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body (`Value::Null` for no content).
    pub body: Value,
}

impl GatewayResponse {
    /// Response with an explicit status.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 200 with a body.
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// 201 with a body.
    pub fn created(body: Value) -> Self {
        Self::new(201, body)
    }

    /// 204, no body.
    pub fn no_content() -> Self {
        Self::new(204, Value::Null)
    }

    /// Error response with body `{"code": ..., "error": ...}`.
    pub fn error(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        let code: String = code.into();
        let message: String = message.into();
        Self::new(status, json!({ "code": code, "error": message }))
    }

    /// 401/403 response for a guard failure.
    pub fn from_failure(failure: &GateFailure) -> Self {
        Self::error(failure.status(), failure.code(), failure.to_string())
    }

    /// The `code` field of an error body, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.body.get("code").and_then(Value::as_str)
    }
}

/// Which route a request was resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    /// Template that matched the request path.
    pub template: String,
    /// Primary template of the route (equal to `template` unless legacy).
    pub primary_template: String,
    /// Whether the request came in through a legacy alias.
    pub legacy: bool,
}

/// Per-request context handed to handlers after the guard chain passed.
///
/// Request-local; never shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id.
    pub request_id: String,
    /// Resolved principal (anonymous on public routes).
    pub principal: Principal,
    /// Captured path params.
    pub params: PathParams,
    /// Resolved route.
    pub route: RouteInfo,
}

/// Route handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a request that passed the guard chain.
    async fn call(&self, ctx: RequestContext, request: GatewayRequest) -> GatewayResponse;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(RequestContext, GatewayRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResponse> + Send + 'static,
{
    async fn call(&self, ctx: RequestContext, request: GatewayRequest) -> GatewayResponse {
        (self.0)(ctx, request).await
    }
}

/// Wrap an async closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(RequestContext, GatewayRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResponse> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}
