//! Per-route middleware.
//!
//! Global concerns (tracing, request ids, body limits, panic catching) are
//! tower layers on the outer axum router. Middleware here is attached to a
//! single endpoint or mount at runtime through the [`MiddlewareManager`],
//! which rewrites the route table and is therefore subject to the mutation
//! guard.

use std::fmt;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::routing::{EndpointKey, RouteError, RouteHandler, RouteTable};

/// Intercepts a request before (and a response after) the route handler.
pub trait Middleware: Send + Sync + fmt::Debug {
    fn intercept(&self, request: Request, next: RouteHandler) -> BoxFuture<'static, Response>;
}

/// Attaches and detaches middleware chains on registered routes.
pub trait MiddlewareManager: Send + Sync {
    /// Replace the chain on the endpoint registered for `uri` + `method`.
    fn set_middleware(
        &self,
        uri: &str,
        method: &Method,
        chain: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouteError>;

    /// Drop every middleware from the endpoint.
    fn remove_middleware(&self, uri: &str, method: &Method) -> Result<(), RouteError>;

    /// Replace the chain on the static or SPA mount at `prefix`.
    fn set_static_middleware(
        &self,
        prefix: &str,
        chain: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouteError>;
}

/// Middleware manager backed by the server's route table.
#[derive(Clone)]
pub struct RouteMiddlewareManager {
    routes: Arc<RouteTable>,
}

impl RouteMiddlewareManager {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }
}

impl MiddlewareManager for RouteMiddlewareManager {
    fn set_middleware(
        &self,
        uri: &str,
        method: &Method,
        chain: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouteError> {
        let key = EndpointKey::new(uri, method.clone());
        let count = chain.len();
        self.routes
            .mutate(|entries| entries.set_endpoint_middleware(&key, chain))?;
        tracing::debug!(endpoint = %key, middleware = count, "Middleware chain set");
        Ok(())
    }

    fn remove_middleware(&self, uri: &str, method: &Method) -> Result<(), RouteError> {
        self.set_middleware(uri, method, Vec::new())
    }

    fn set_static_middleware(
        &self,
        prefix: &str,
        chain: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouteError> {
        let prefix = crate::config::schema::normalize_prefix(prefix);
        self.routes
            .mutate(|entries| entries.set_mount_middleware(&prefix, chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    use crate::routing::{Endpoint, RouteKind};

    #[derive(Debug)]
    struct Tag(&'static str);

    impl Middleware for Tag {
        fn intercept(&self, request: Request, next: RouteHandler) -> BoxFuture<'static, Response> {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.call(request).await;
                response
                    .headers_mut()
                    .append("x-tag", HeaderValue::from_static(tag));
                response
            })
        }
    }

    fn table_with_endpoint() -> Arc<RouteTable> {
        let table = Arc::new(RouteTable::new());
        table
            .mutate(|e| {
                e.add_endpoint(Endpoint::new(
                    EndpointKey::new("/hello", Method::GET),
                    RouteKind::Metrics,
                    RouteHandler::new(|_req| async { "hi".into_response() }),
                )?)
            })
            .unwrap();
        table
    }

    fn get(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn chain_runs_in_order_and_can_be_removed() {
        let table = table_with_endpoint();
        let manager = RouteMiddlewareManager::new(table.clone());

        manager
            .set_middleware(
                "/hello",
                &Method::GET,
                vec![Arc::new(Tag("outer")), Arc::new(Tag("inner"))],
            )
            .unwrap();

        let res = table.dispatch(get("/hello")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let tags: Vec<_> = res.headers().get_all("x-tag").iter().collect();
        // inner appends first on the way out
        assert_eq!(tags, vec!["inner", "outer"]);
        assert_eq!(table.route_info("/hello", &Method::GET).unwrap().middleware_count, 2);

        manager.remove_middleware("/hello", &Method::GET).unwrap();
        let res = table.dispatch(get("/hello")).await;
        assert!(res.headers().get("x-tag").is_none());
    }

    #[test]
    fn unknown_route_is_not_found() {
        let manager = RouteMiddlewareManager::new(table_with_endpoint());
        let err = manager
            .set_middleware("/nope", &Method::GET, Vec::new())
            .unwrap_err();
        assert!(matches!(err, RouteError::RouteNotFound { .. }));

        let err = manager.set_static_middleware("/static", Vec::new()).unwrap_err();
        assert!(matches!(err, RouteError::RouteNotFound { .. }));
    }
}
