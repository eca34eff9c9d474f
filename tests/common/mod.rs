//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde_json::json;
use switchyard::{
    service_fn, FabricService, Server, ServerConfig, ServerError, ServiceError, ServiceResponse,
    Shutdown,
};
use tokio::task::JoinHandle;

/// A config bound to an ephemeral loopback port with the broker disabled.
pub fn test_config(root: &Path) -> ServerConfig {
    let mut config = ServerConfig {
        root_dir: root.to_path_buf(),
        host: "127.0.0.1".to_string(),
        port: 0,
        no_banner: true,
        shutdown_timeout_secs: 5,
        rest_bridge_timeout_secs: 5,
        ..ServerConfig::default()
    };
    config.fabric_config.enabled = false;
    config
}

/// A running server plus what the test needs to drive and stop it.
pub struct Running {
    pub server: Server,
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Trigger the shutdown signal and wait for `start` to return.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(15), self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Start `server` in the background and wait until it is serving.
pub async fn start(server: Server) -> Running {
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.start(signal).await })
    };

    let addr = tokio::time::timeout(Duration::from_secs(5), server.ready())
        .await
        .expect("server did not become ready")
        .expect("server failed to start");

    Running {
        server,
        addr,
        shutdown,
        task,
    }
}

/// Non-pooled client so every request opens its own connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// A service echoing the request body and path parameters.
pub fn echo_service() -> std::sync::Arc<dyn FabricService> {
    service_fn(|request| async move {
        let payload = json!({
            "method": request.method,
            "uri": request.uri,
            "params": request.path_params,
            "body": request.body,
        });
        Ok(ServiceResponse::ok(&request, payload))
    })
}

/// A service that never answers.
pub fn silent_service() -> std::sync::Arc<dyn FabricService> {
    service_fn(|_request| std::future::pending::<Result<ServiceResponse, ServiceError>>())
}

/// Write `contents` to `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}
