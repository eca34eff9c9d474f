//! Request identification and access logging.
//!
//! # Responsibilities
//! - Name the request-id header the tower-http id layers set and propagate
//! - Open one span per request carrying the request id
//! - Emit one access-log event (target `http_access`) per response and
//!   record request metrics
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Access events use their own target so they can be routed to a
//!   separate sink

use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Span;

use crate::observability::metrics;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Tracing target of access-log events.
pub const ACCESS_LOG_TARGET: &str = "http_access";

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Span factory for `TraceLayer`.
pub fn make_span(request: &Request) -> Span {
    tracing::info_span!(
        "request",
        request_id = %request_id(request.headers()),
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Access log + metrics middleware.
pub async fn access_log(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let id = request_id(request.headers()).to_string();

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!(
        target: ACCESS_LOG_TARGET,
        request_id = %id,
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    metrics::record_request(method.as_str(), status.as_u16(), start);
    response
}
