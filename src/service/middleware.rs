//! Service middleware for request metrics.
//!
//! ## Metrics Exposed
//!
//! Metrics are emitted as structured `tracing` events under the
//! `ispyb_gate::metrics` target and aggregated from logs:
//!
//! - `request_metric` - one per request, by normalized path, method, status and latency
//! - `gate_metric` - one per gated request, by outcome and error code

use std::sync::OnceLock;
use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use regex_lite::Regex;
use tracing::info;

use crate::gate::GatewayResponse;
use crate::types::Verb;

/// Metrics middleware that records request counts and latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "ispyb_gate::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

fn id_segment() -> &'static Regex {
    static ID_SEGMENT: OnceLock<Regex> = OnceLock::new();
    ID_SEGMENT.get_or_init(|| {
        Regex::new(r"/(?:[0-9]+|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})(/|$)")
            .expect("static pattern")
    })
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Numeric ids and UUIDs become `:id`.
pub fn normalize_path(path: &str) -> String {
    // Adjacent ids share a slash, so one pass can miss every other one.
    let once = id_segment().replace_all(path, "/:id$1");
    id_segment().replace_all(&once, "/:id$1").into_owned()
}

/// Record the outcome of a gated request.
pub fn record_gate_response(verb: Verb, response: &GatewayResponse) {
    let outcome = match response.status {
        401 => "unauthenticated",
        403 => "forbidden",
        404 | 405 => "unrouted",
        s if s < 400 => "admitted",
        _ => "handler_error",
    };
    info!(
        target: "ispyb_gate::metrics",
        metric_type = "gate",
        verb = %verb,
        outcome = outcome,
        code = response.error_code().unwrap_or(""),
        status = response.status,
        "gate_metric"
    );
}
