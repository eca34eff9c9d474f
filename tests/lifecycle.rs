//! Startup and shutdown ordering against real listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use serde_json::json;
use switchyard::broker::{BrokerAcceptor, ConnectError};
use switchyard::config::{EndpointConfig, TlsConfig};
use switchyard::{
    service_fn, RestBridgeConfig, Server, ServerError, ServerState, ServiceResponse, Shutdown,
};

mod common;

/// Acceptor that refuses to listen.
struct UnreachableBroker {
    closed: Arc<AtomicBool>,
}

impl BrokerAcceptor for UnreachableBroker {
    fn listen(&self, _config: &EndpointConfig) -> BoxFuture<'_, Result<(), ConnectError>> {
        Box::pin(async { Err(ConnectError::Unreachable("test broker is down".into())) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.closed.store(true, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn is_listening(&self) -> bool {
        false
    }
}

/// Acceptor that never finishes connecting.
struct HangingBroker;

impl BrokerAcceptor for HangingBroker {
    fn listen(&self, _config: &EndpointConfig) -> BoxFuture<'_, Result<(), ConnectError>> {
        Box::pin(std::future::pending())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn is_listening(&self) -> bool {
        false
    }
}

/// Acceptor that takes a while to connect.
#[derive(Default)]
struct SlowBroker {
    listening: AtomicBool,
}

impl BrokerAcceptor for SlowBroker {
    fn listen(&self, _config: &EndpointConfig) -> BoxFuture<'_, Result<(), ConnectError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.listening.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.listening.store(false, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_start_then_stop_releases_listener() {
    let dir = tempfile::tempdir().unwrap();
    let running = common::start(Server::new(common::test_config(dir.path()))).await;
    let addr = running.addr;
    let server = running.server.clone();

    assert!(server.availability().http);
    assert_eq!(server.state(), ServerState::Serving(addr));

    running.stop().await.unwrap();

    assert_eq!(server.state(), ServerState::Stopped);
    assert!(!server.availability().http);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_default_broker_closes_with_server() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    config.fabric_config.enabled = true;

    let running = common::start(Server::new(config)).await;
    let server = running.server.clone();
    assert!(server.availability().broker);

    running.stop().await.unwrap();
    let snapshot = server.availability();
    assert!(!snapshot.http);
    assert!(!snapshot.broker);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let running = common::start(Server::new(common::test_config(dir.path()))).await;

    let result = running.server.start(Shutdown::new().subscribe()).await;
    assert!(matches!(result, Err(ServerError::AlreadyStarted)));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let running = common::start(Server::new(common::test_config(dir.path()))).await;
    let server = running.server.clone();

    tokio::join!(server.stop(), server.stop());
    server.stop().await;

    // `start` returns once its own stop observes the completed sequence.
    running.task.await.unwrap().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_missing_tls_files_fail_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    config.tls_config = Some(TlsConfig {
        cert_file: "missing-cert.pem".into(),
        key_file: "missing-key.pem".into(),
        skip_certificate_validation: false,
    });

    let server = Server::new(config);
    let result = server.start(Shutdown::new().subscribe()).await;

    assert!(matches!(result, Err(ServerError::Tls(_))));
    assert_eq!(server.state(), ServerState::Failed);
    assert_eq!(server.ready().await, None);
}

#[tokio::test]
async fn test_port_in_use_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = common::test_config(dir.path());
    config.port = taken.local_addr().unwrap().port();

    let server = Server::new(config);
    let result = server.start(Shutdown::new().subscribe()).await;
    assert!(matches!(result, Err(ServerError::Bind(_))));
    assert!(!server.availability().http);
}

#[tokio::test]
async fn test_required_broker_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    config.fabric_config.enabled = true;
    config.fabric_config.required = true;

    let closed = Arc::new(AtomicBool::new(false));
    let broker = UnreachableBroker {
        closed: closed.clone(),
    };
    let server = Server::with_broker(config, move |_bus| {
        Arc::new(broker) as Arc<dyn BrokerAcceptor>
    });

    let result = server.start(Shutdown::new().subscribe()).await;
    assert!(matches!(
        result,
        Err(ServerError::Connect(ConnectError::Unreachable(_)))
    ));
    // Never listened, so shutdown has nothing to close.
    assert!(!closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_optional_broker_failure_degrades_to_http_only() {
    let dir = tempfile::tempdir().unwrap();
    common::write_file(dir.path(), "public/ping.txt", "pong");
    let mut config = common::test_config(dir.path());
    config.static_dir = vec!["public".into()];
    config.fabric_config.enabled = true;

    let server = Server::with_broker(config, |_bus| {
        Arc::new(UnreachableBroker {
            closed: Arc::new(AtomicBool::new(false)),
        }) as Arc<dyn BrokerAcceptor>
    });
    let running = common::start(server).await;

    let snapshot = running.server.availability();
    assert!(snapshot.http);
    assert!(!snapshot.broker);

    let res = common::client()
        .get(running.url("/ping.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "pong");

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_broker_connect_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    config.fabric_config.enabled = true;
    config.fabric_config.required = true;
    config.fabric_config.connect_timeout_secs = 1;

    let server = Server::with_broker(config, |_bus| {
        Arc::new(HangingBroker) as Arc<dyn BrokerAcceptor>
    });
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        server.start(Shutdown::new().subscribe()),
    )
    .await
    .expect("connect timeout was not enforced");

    assert!(matches!(
        result,
        Err(ServerError::Connect(ConnectError::Timeout(_)))
    ));
}

#[tokio::test]
async fn test_in_flight_request_survives_stop() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::new(common::test_config(dir.path()));

    let slow = service_fn(|request| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(ServiceResponse::ok(&request, json!({ "done": true })))
    });
    server.register_service(slow, "slow").unwrap();
    server
        .set_http_channel_bridge(&RestBridgeConfig::new("slow", "GET", "/slow"))
        .unwrap();

    let running = common::start(server).await;
    let url = running.url("/slow");
    let addr = running.addr;

    let request = tokio::spawn(async move { common::client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let server = running.server.clone();
    running.stop().await.unwrap();

    let res = request.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), r#"{"done":true}"#);

    assert_eq!(server.state(), ServerState::Stopped);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_hooks_run_after_drain() {
    struct Hooked {
        stopped: Arc<AtomicBool>,
    }

    impl switchyard::FabricService for Hooked {
        fn handle_request(
            &self,
            request: switchyard::ServiceRequest,
        ) -> BoxFuture<'static, Result<ServiceResponse, switchyard::ServiceError>> {
            Box::pin(async move { Ok(ServiceResponse::ok(&request, json!(null))) })
        }

        fn on_server_shutdown(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let stopped = Arc::new(AtomicBool::new(false));
    let server = Server::new(common::test_config(dir.path()));
    server
        .register_service(
            Arc::new(Hooked {
                stopped: stopped.clone(),
            }),
            "hooked",
        )
        .unwrap();

    let running = common::start(server).await;
    assert!(!stopped.load(Ordering::SeqCst));
    running.stop().await.unwrap();
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_during_startup_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut config = common::test_config(dir.path());
    config.port = port;
    config.fabric_config.enabled = true;

    let broker = Arc::new(SlowBroker::default());
    let server = {
        let broker = broker.clone();
        Server::with_broker(config, move |_bus| broker as Arc<dyn BrokerAcceptor>)
    };

    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.start(Shutdown::new().subscribe()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.state(), ServerState::Starting);

    tokio::time::timeout(Duration::from_secs(3), server.stop())
        .await
        .expect("stop did not finish");
    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("start did not return")
        .unwrap()
        .unwrap();

    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.ready().await, None);
    let snapshot = server.availability();
    assert!(!snapshot.http);
    assert!(!snapshot.broker);
    assert!(!broker.is_listening());
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
}
