//! REST bridges from HTTP endpoints onto bus channels.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use switchyard::routing::RouteKind;
use switchyard::{
    service_fn, FabricService, RestBridgeConfig, RouteError, Server, ServiceError,
    ServiceRequest, ServiceResponse,
};

mod common;

/// A service that declares its own GET bridges on `channel`.
struct DeclaredBridges {
    channel: &'static str,
    uris: Vec<&'static str>,
}

impl FabricService for DeclaredBridges {
    fn handle_request(
        &self,
        request: ServiceRequest,
    ) -> BoxFuture<'static, Result<ServiceResponse, ServiceError>> {
        Box::pin(async move { Ok(ServiceResponse::ok(&request, json!("declared"))) })
    }

    fn rest_bridge_config(&self) -> Vec<RestBridgeConfig> {
        self.uris
            .iter()
            .map(|uri| RestBridgeConfig::new(self.channel, "GET", *uri))
            .collect()
    }
}

#[tokio::test]
async fn test_bridge_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "items")
        .unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "POST", "/rest/items/{id}"))
        .unwrap();

    let running = common::start(server).await;
    let res = common::client()
        .post(running.url("/rest/items/7?verbose=1"))
        .body(r#"{"name":"lamp"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&res.text().await.unwrap()).unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["uri"], "/rest/items/7");
    assert_eq!(body["params"]["id"], "7");
    assert_eq!(body["body"], json!({ "name": "lamp" }));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_service_error_becomes_status() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    let picky = service_fn(|request| async move {
        if request.body.is_null() {
            return Err(ServiceError::new(StatusCode::BAD_REQUEST, "body required"));
        }
        Ok(ServiceResponse::ok(&request, json!("accepted")).with_status(StatusCode::CREATED))
    });
    server.register_service(picky, "orders").unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("orders", "PUT", "/orders"))
        .unwrap();

    let running = common::start(server).await;
    let client = common::client();

    let res = client.put(running.url("/orders")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.text().await.unwrap(), r#"{"error":"body required"}"#);

    let res = client
        .put(running.url("/orders"))
        .body("42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_channel_keeps_first() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "items")
        .unwrap();

    let err = server
        .register_service(common::silent_service(), "items")
        .unwrap_err();
    assert_eq!(err, RouteError::DuplicateChannel("items".into()));

    server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", "/items"))
        .unwrap();
    let running = common::start(server).await;

    // The echo service still answers; the silent one would time out.
    let res = common::client().get(running.url("/items")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_route_and_distinct_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "items")
        .unwrap();

    server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", "/items"))
        .unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "DELETE", "/items/{id}"))
        .unwrap();

    let err = server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", "/items"))
        .unwrap_err();
    assert!(matches!(err, RouteError::DuplicateRoute { .. }));

    let get = server.get_rest_bridge_sub_route("/items", "GET").unwrap();
    assert_eq!(get.channel, "items");
    let delete = server
        .get_rest_bridge_sub_route("/items/{id}", "DELETE")
        .unwrap();
    assert_eq!(delete.channel, "items");
    assert_eq!(server.channel_endpoints("items").len(), 2);

    assert!(matches!(
        server.get_rest_bridge_sub_route("/items", "POST"),
        Err(RouteError::RouteNotFound { .. })
    ));
}

#[tokio::test]
async fn test_bridge_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "items")
        .unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "HEAD", "/items"))
        .unwrap();

    // GET is new but HEAD clashes, so neither is registered.
    let mut config = RestBridgeConfig::new("items", "GET", "/items");
    config.allow_head = true;
    assert!(matches!(
        server.set_http_channel_bridge(&config),
        Err(RouteError::DuplicateRoute { .. })
    ));
    assert!(server.get_rest_bridge_sub_route("/items", "GET").is_err());
    assert_eq!(server.channel_endpoints("items").len(), 1);
}

#[tokio::test]
async fn test_bridge_validation_errors() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));

    assert_eq!(
        server
            .set_http_channel_bridge(&RestBridgeConfig::new("ghost", "GET", "/ghost"))
            .unwrap_err(),
        RouteError::ChannelNotFound("ghost".into())
    );

    server
        .register_service(common::echo_service(), "items")
        .unwrap();
    assert!(matches!(
        server.set_http_channel_bridge(&RestBridgeConfig::new("items", "TRACE", "/items")),
        Err(RouteError::InvalidMethod(_))
    ));
    assert!(matches!(
        server.set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", "items")),
        Err(RouteError::InvalidUri(_))
    ));
}

#[tokio::test]
async fn test_bridge_timeout_releases_pending_requests() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::silent_service(), "void")
        .unwrap();
    let timeout = Duration::from_millis(200);
    server
        .set_http_channel_bridge_with_timeout(&RestBridgeConfig::new("void", "GET", "/void"), timeout)
        .unwrap();

    let running = common::start(server).await;
    let client = common::client();
    let bus = running.server.bus();

    for _ in 0..5 {
        let started = Instant::now();
        let res = client.get(running.url("/void")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() < timeout + Duration::from_secs(1));
    }

    // Cancelled service calls unwind on their worker tasks.
    let deadline = Instant::now() + Duration::from_secs(2);
    while bus.pending_requests() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(bus.pending_requests(), 0);

    running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bridging_while_live() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "items")
        .unwrap();
    let running = common::start(server).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let server = running.server.clone();
        tasks.push(tokio::spawn(async move {
            let uri = format!("/items/{}", i);
            let result = server.set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", uri.clone()));
            (uri, result)
        }));
    }

    let mut registered = Vec::new();
    for task in tasks {
        let (uri, result) = task.await.unwrap();
        match result {
            Ok(keys) => {
                assert_eq!(keys.len(), 1);
                registered.push(uri);
            }
            Err(RouteError::Busy) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert!(!registered.is_empty());
    assert_eq!(running.server.channel_endpoints("items").len(), registered.len());

    let client = common::client();
    for uri in &registered {
        assert!(running.server.get_rest_bridge_sub_route(uri, "GET").is_ok());
        let info = running.server.route_info(uri, &Method::GET).unwrap();
        assert_eq!(
            info.kind,
            RouteKind::Bridge {
                channel: "items".into()
            }
        );

        let res = client.get(running.url(uri)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_service_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "items")
        .unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", "/items"))
        .unwrap();
    let running = common::start(server).await;

    assert!(running.server.bus().close_channel("items"));
    let res = common::client().get(running.url("/items")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_declared_bridge_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "first")
        .unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("first", "GET", "/taken"))
        .unwrap();

    let clashing = Arc::new(DeclaredBridges {
        channel: "second",
        uris: vec!["/own", "/taken"],
    });
    let err = server
        .register_service(clashing.clone(), "second")
        .unwrap_err();
    assert!(matches!(err, RouteError::DuplicateRoute { .. }));
    assert!(!server.bus().has_channel("second"));
    assert!(server.channel_endpoints("second").is_empty());
    assert!(server.get_rest_bridge_sub_route("/own", "GET").is_err());
    assert!(server.route_info("/own", &Method::GET).is_none());

    // Retrying fails on the route again, not on a leftover channel.
    assert!(matches!(
        server.register_service(clashing, "second"),
        Err(RouteError::DuplicateRoute { .. })
    ));

    let fixed = Arc::new(DeclaredBridges {
        channel: "second",
        uris: vec!["/own", "/other"],
    });
    server.register_service(fixed, "second").unwrap();
    assert_eq!(server.channel_endpoints("second").len(), 2);
    assert_eq!(
        server.get_rest_bridge_sub_route("/taken", "GET").unwrap().channel,
        "first"
    );

    let running = common::start(server).await;
    let res = common::client().get(running.url("/own")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), r#""declared""#);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_lookup_by_template_shape() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(common::echo_service(), "items")
        .unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", "/items/{id}"))
        .unwrap();

    let route = server.get_rest_bridge_sub_route("/items/{x}", "GET").unwrap();
    assert_eq!(route.channel, "items");
    assert!(matches!(
        server.set_http_channel_bridge(&RestBridgeConfig::new("items", "GET", "/items/{x}")),
        Err(RouteError::DuplicateRoute { .. })
    ));
}
