//! The server aggregate and its registration API.
//!
//! # Responsibilities
//! - Own the configuration, route table, bus, broker acceptor and
//!   availability flags of one server
//! - Register services, REST bridges and static routes, before or after start
//! - Build the outer axum router (tracing, request ids, body limit, panics)
//!
//! Startup lives in `lifecycle::startup`, shutdown in `lifecycle::shutdown`.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::Request;
use axum::http::{HeaderName, Method};
use axum::Router;
use axum_server::Handle;
use tokio::sync::{watch, Mutex as AsyncMutex, OnceCell};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::broker::{BrokerAcceptor, WebSocketBroker};
use crate::bus::{FabricService, MessageBus, RestBridgeConfig};
use crate::config::{normalize_prefix, ServerConfig};
use crate::error::ServerError;
use crate::health::{Availability, AvailabilitySnapshot};
use crate::http::handlers;
use crate::http::middleware::{MiddlewareManager, RouteMiddlewareManager};
use crate::http::request::{self, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::routing::{
    BridgeRoute, EndpointKey, Mount, MountKind, RouteError, RouteTable, ServiceBridge,
};

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Starting,
    Serving(SocketAddr),
    Stopping,
    Stopped,
    Failed,
}

pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) routes: Arc<RouteTable>,
    pub(crate) bridge: ServiceBridge,
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) broker: Option<Arc<dyn BrokerAcceptor>>,
    pub(crate) availability: Availability,
    pub(crate) tls_override: Mutex<TlsSlot>,
    pub(crate) handle: Handle,
    pub(crate) serve_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    pub(crate) state: watch::Sender<ServerState>,
    pub(crate) started: AtomicBool,
    /// Held by `start` while booting; the shutdown sequence waits on it.
    pub(crate) boot_lock: AsyncMutex<()>,
    pub(crate) stop_requested: Shutdown,
    pub(crate) stopped: OnceCell<()>,
}

impl ServerInner {
    pub(crate) fn lock_serve_task(&self) -> MutexGuard<'_, Option<JoinHandle<std::io::Result<()>>>> {
        self.serve_task.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock_tls_override(&self) -> MutexGuard<'_, TlsSlot> {
        self.tls_override.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Caller-supplied TLS config; locked once startup has consumed it.
#[derive(Default)]
pub(crate) struct TlsSlot {
    pub(crate) config: Option<Arc<rustls::ServerConfig>>,
    pub(crate) locked: bool,
}

/// A dual-protocol server: HTTP routes and a broker behind one lifecycle.
///
/// Cloning is cheap; clones share the same server.
#[derive(Clone)]
pub struct Server {
    pub(crate) inner: Arc<ServerInner>,
}

impl Server {
    /// Create a server with the default WebSocket broker (when the broker
    /// is enabled in `config`).
    pub fn new(config: ServerConfig) -> Self {
        let timeout = config.rest_bridge_timeout();
        Self::with_broker(config, move |bus| {
            Arc::new(WebSocketBroker::new(bus, timeout)) as Arc<dyn BrokerAcceptor>
        })
    }

    /// Create a server whose broker acceptor is built by `make_broker`.
    pub fn with_broker<F>(config: ServerConfig, make_broker: F) -> Self
    where
        F: FnOnce(Arc<MessageBus>) -> Arc<dyn BrokerAcceptor>,
    {
        let routes = Arc::new(RouteTable::new());
        let bus = Arc::new(MessageBus::new());
        let bridge = ServiceBridge::new(routes.clone(), bus.clone(), config.max_body_size);
        let broker = config
            .fabric_config
            .enabled
            .then(|| make_broker(bus.clone()));
        let (state, _) = watch::channel(ServerState::Created);

        Self {
            inner: Arc::new(ServerInner {
                config,
                routes,
                bridge,
                bus,
                broker,
                availability: Availability::new(),
                tls_override: Mutex::new(TlsSlot::default()),
                handle: Handle::new(),
                serve_task: Mutex::new(None),
                state,
                started: AtomicBool::new(false),
                boot_lock: AsyncMutex::new(()),
                stop_requested: Shutdown::new(),
                stopped: OnceCell::new(),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.inner.bus.clone()
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    pub fn availability(&self) -> AvailabilitySnapshot {
        self.inner.availability.snapshot()
    }

    /// Resolves to the bound address once serving, or `None` if startup
    /// failed or the server stopped first.
    pub async fn ready(&self) -> Option<SocketAddr> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|s| {
                matches!(
                    s,
                    ServerState::Serving(_)
                        | ServerState::Stopping
                        | ServerState::Stopped
                        | ServerState::Failed
                )
            })
            .await
            .ok()
            .map(|s| *s)?;
        match state {
            ServerState::Serving(addr) => Some(addr),
            _ => None,
        }
    }

    /// Bind `service` to `channel` and set up the REST bridges it declares.
    ///
    /// If any declared bridge fails the channel is closed again, so a failed
    /// registration leaves neither the channel nor any of its bridges behind.
    pub fn register_service(
        &self,
        service: Arc<dyn FabricService>,
        channel: &str,
    ) -> Result<(), RouteError> {
        self.inner
            .bus
            .register(channel, service.clone())
            .map_err(|_| RouteError::DuplicateChannel(channel.to_string()))?;

        let configs = service.rest_bridge_config();
        if let Err(e) = self
            .inner
            .bridge
            .bridge_configs(&configs, self.inner.config.rest_bridge_timeout())
        {
            self.inner.bus.close_channel(channel);
            tracing::warn!(channel = %channel, error = %e, "Service registration rolled back");
            return Err(e);
        }
        tracing::info!(channel = %channel, bridges = configs.len(), "Service registered");
        Ok(())
    }

    /// Bridge an HTTP method + URI onto a service channel.
    pub fn set_http_channel_bridge(
        &self,
        config: &RestBridgeConfig,
    ) -> Result<Vec<EndpointKey>, RouteError> {
        self.inner
            .bridge
            .bridge_config(config, self.inner.config.rest_bridge_timeout())
    }

    /// Bridge with an explicit request timeout.
    pub fn set_http_channel_bridge_with_timeout(
        &self,
        config: &RestBridgeConfig,
        timeout: Duration,
    ) -> Result<Vec<EndpointKey>, RouteError> {
        self.inner.bridge.bridge_config(config, timeout)
    }

    /// Serve `dir` (relative to the root dir) under `prefix`, replacing any
    /// mount already at that prefix.
    pub fn set_static_route(&self, prefix: &str, dir: &str) -> Result<(), RouteError> {
        let prefix = normalize_prefix(prefix);
        let dir = self.inner.config.resolve(dir);
        let handler = handlers::static_dir(&prefix, dir.clone());
        let replaced = self.inner.routes.mutate(|entries| {
            Ok(entries.set_mount(Mount::new(
                prefix.clone(),
                MountKind::Static { dir: dir.clone() },
                handler,
            )))
        })?;
        tracing::info!(
            prefix = %prefix,
            dir = %dir.display(),
            replaced = replaced.is_some(),
            "Static route set"
        );
        Ok(())
    }

    /// Use a caller-built TLS configuration instead of loading the PEM files.
    pub fn customize_tls_config(&self, tls: Arc<rustls::ServerConfig>) -> Result<(), ServerError> {
        let mut slot = self.inner.lock_tls_override();
        if slot.locked {
            return Err(ServerError::TlsLocked);
        }
        slot.config = Some(tls);
        Ok(())
    }

    /// Look up the bridge registered for `uri` + `method`.
    pub fn get_rest_bridge_sub_route(
        &self,
        uri: &str,
        method: &str,
    ) -> Result<BridgeRoute, RouteError> {
        self.inner.bridge.lookup(uri, method)
    }

    /// Endpoints bridged to `channel`.
    pub fn channel_endpoints(&self, channel: &str) -> Vec<EndpointKey> {
        self.inner.bridge.channel_endpoints(channel)
    }

    pub fn middleware_manager(&self) -> Arc<dyn MiddlewareManager> {
        Arc::new(RouteMiddlewareManager::new(self.inner.routes.clone()))
    }

    /// Reverse lookup into the route table.
    pub fn route_info(&self, uri: &str, method: &Method) -> Option<crate::routing::RouteInfo> {
        self.inner.routes.route_info(uri, method)
    }

    /// The outer axum router: every request goes through the route table.
    pub(crate) fn app(&self) -> Router {
        let routes = self.inner.routes.clone();
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .fallback(move |request: Request| {
                let routes = routes.clone();
                async move { routes.dispatch(request).await }
            })
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(request::make_span))
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(axum::middleware::from_fn(request::access_log))
                    .layer(CatchPanicLayer::new())
                    .layer(RequestBodyLimitLayer::new(self.inner.config.max_body_size)),
            )
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("availability", &self.availability())
            .finish()
    }
}
