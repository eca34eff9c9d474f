//! Security response headers.
//!
//! # Responsibilities
//! - Add a baseline set of hardening headers to responses
//! - Leave headers the handler already set untouched
//!
//! # Design Decisions
//! - Implemented as a per-route [`Middleware`] so it can wrap individual
//!   endpoints (the metrics endpoint always gets it)

use axum::extract::Request;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::middleware::Middleware;
use crate::routing::RouteHandler;

const SECURITY_HEADERS: [(HeaderName, &str); 5] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::STRICT_TRANSPORT_SECURITY, "max-age=31536000; includeSubDomains"),
    (header::CACHE_CONTROL, "no-store"),
];

/// Basic security-header middleware.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeaders;

impl SecurityHeaders {
    pub fn apply(response: &mut Response) {
        let headers = response.headers_mut();
        for (name, value) in SECURITY_HEADERS.iter() {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), HeaderValue::from_static(value));
            }
        }
    }
}

impl Middleware for SecurityHeaders {
    fn intercept(&self, request: Request, next: RouteHandler) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let mut response = next.call(request).await;
            Self::apply(&mut response);
            response
        })
    }
}
