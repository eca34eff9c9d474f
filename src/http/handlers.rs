//! Route handlers installed into the route table.
//!
//! # Responsibilities
//! - Serve static directories under a prefix
//! - Serve a single page application with index fallback
//! - Forward bridged REST calls onto bus channels and translate the reply

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::bus::{BusError, MessageBus, ServiceRequest};
use crate::observability::metrics;
use crate::routing::matcher::{PathParams, PrefixMatcher};
use crate::routing::RouteHandler;

/// Serve files from `dir` for requests under `prefix`.
pub fn static_dir(prefix: &str, dir: PathBuf) -> RouteHandler {
    let matcher = PrefixMatcher::new(prefix);
    RouteHandler::new(move |mut request: Request| {
        strip_prefix(&mut request, &matcher);
        let serve = ServeDir::new(&dir);
        async move {
            match serve.oneshot(request).await {
                Ok(response) => response.into_response(),
                Err(never) => match never {},
            }
        }
    })
}

/// Serve a single page application: existing files as-is, anything else
/// under the mount gets `index.html` so the client-side router can take over.
pub fn spa(prefix: &str, root: PathBuf) -> RouteHandler {
    let matcher = PrefixMatcher::new(prefix);
    let index = root.join("index.html");
    RouteHandler::new(move |mut request: Request| {
        strip_prefix(&mut request, &matcher);
        let serve = ServeDir::new(&root).fallback(ServeFile::new(&index));
        async move {
            match serve.oneshot(request).await {
                Ok(response) => response.into_response(),
                Err(never) => match never {},
            }
        }
    })
}

fn strip_prefix(request: &mut Request, matcher: &PrefixMatcher) {
    let path = matcher.strip(request.uri().path());
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    match Uri::builder().path_and_query(path_and_query).build() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(e) => tracing::debug!(error = %e, "Could not rewrite mounted path"),
    }
}

/// Forward requests onto `channel` and wait up to `timeout` for the reply.
pub fn bridge(
    bus: Arc<MessageBus>,
    channel: String,
    timeout: Duration,
    max_body_size: usize,
) -> RouteHandler {
    RouteHandler::new(move |request: Request| {
        let bus = bus.clone();
        let channel = channel.clone();
        async move { forward_to_channel(&bus, &channel, timeout, max_body_size, request).await }
    })
}

async fn forward_to_channel(
    bus: &MessageBus,
    channel: &str,
    timeout: Duration,
    max_body_size: usize,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, max_body_size).await {
        Ok(bytes) => bytes,
        Err(_) => {
            metrics::record_bridge_request(channel, "rejected");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    let params = parts
        .extensions
        .get::<PathParams>()
        .cloned()
        .unwrap_or_default();
    let service_request = ServiceRequest::from_http(channel, &parts, &body, params.0);
    let request_id = service_request.id;

    tracing::debug!(
        request_id = %request_id,
        channel = %channel,
        method = %parts.method,
        uri = %parts.uri,
        "Bridging request onto channel"
    );

    let pending = match bus.request(channel, service_request).await {
        Ok(pending) => pending,
        Err(e) => {
            tracing::warn!(request_id = %request_id, channel = %channel, error = %e, "Bridge channel unavailable");
            metrics::record_bridge_request(channel, "unavailable");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
        }
    };

    match pending.wait(timeout).await {
        Ok(reply) => {
            let outcome = if reply.error.is_some() { "error" } else { "ok" };
            metrics::record_bridge_request(channel, outcome);
            reply.into_response()
        }
        Err(BusError::Timeout(after)) => {
            tracing::warn!(
                request_id = %request_id,
                channel = %channel,
                timeout_ms = after.as_millis() as u64,
                "Bridge timeout: channel did not reply"
            );
            metrics::record_bridge_request(channel, "timeout");
            error_response(StatusCode::GATEWAY_TIMEOUT, "service did not respond in time")
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, channel = %channel, error = %e, "Bridge call failed");
            metrics::record_bridge_request(channel, "dropped");
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{service_fn, ServiceError, ServiceResponse};
    use axum::body::Body;
    use serde_json::json;

    fn post(uri: &str, body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn bridge_round_trip() {
        let bus = Arc::new(MessageBus::new());
        bus.register(
            "sum",
            service_fn(|req: ServiceRequest| async move {
                let total: i64 = req
                    .body
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_i64()).sum())
                    .unwrap_or(0);
                Ok(ServiceResponse::ok(&req, json!({ "total": total })))
            }),
        )
        .unwrap();

        let handler = bridge(bus, "sum".into(), Duration::from_secs(1), 1024);
        let response = handler.call(post("/sum", "[1,2,3]")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "total": 6 }));
    }

    #[tokio::test]
    async fn service_error_becomes_status() {
        let bus = Arc::new(MessageBus::new());
        bus.register(
            "strict",
            service_fn(|_req: ServiceRequest| async {
                Err(ServiceError::new(StatusCode::UNPROCESSABLE_ENTITY, "bad input"))
            }),
        )
        .unwrap();

        let handler = bridge(bus, "strict".into(), Duration::from_secs(1), 1024);
        let response = handler.call(post("/strict", "{}")).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await, json!({ "error": "bad input" }));
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let bus = Arc::new(MessageBus::new());
        let handler = bridge(bus, "any".into(), Duration::from_secs(1), 4);
        let response = handler.call(post("/any", "0123456789")).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn missing_channel_is_unavailable() {
        let bus = Arc::new(MessageBus::new());
        let handler = bridge(bus, "gone".into(), Duration::from_secs(1), 1024);
        let response = handler.call(post("/gone", "")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn static_and_spa_serving() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("index.html"), "<app>").unwrap();

        let get = |uri: &str| {
            axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };

        let files = static_dir("/files", dir.path().to_path_buf());
        let response = files.call(get("/files/file.txt")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = files.call(get("/files/nope.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let app = spa("/app", dir.path().to_path_buf());
        let response = app.call(get("/app/some/client/route")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<app>");
    }
}
