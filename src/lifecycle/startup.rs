//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Mount static, SPA, metrics and broker routes
//! - Load TLS, connect the broker, bind and serve HTTP
//! - Block until the shutdown signal, then stop
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned from `start`, after cleanup
//! - A broker that fails to connect is fatal only when `required`
//! - Listeners start last (traffic only when ready); the route guard goes
//!   live as soon as the listener does
//! - `start` holds the boot lock while booting and the shutdown sequence
//!   waits for it, so a stop that races startup still drains the listener

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::Method;
use axum_server::tls_rustls::RustlsConfig;

use crate::broker::ConnectError;
use crate::config::{validate_config, ConfigError};
use crate::error::ServerError;
use crate::http::handlers;
use crate::http::server::{Server, ServerState};
use crate::lifecycle::ShutdownSignal;
use crate::net::{listener, tls, BindError, TlsError};
use crate::observability::metrics::{self, METRICS_PATH};
use crate::routing::{Endpoint, EndpointKey, Mount, MountKind, RouteError, RouteKind};
use crate::security::SecurityHeaders;

impl Server {
    /// Start serving and block until `signal` fires (or [`Server::stop`] is
    /// called), then shut down. May be called once.
    pub async fn start(&self, mut signal: ShutdownSignal) -> Result<(), ServerError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        if inner.stopped.initialized() {
            return Err(ServerError::Stopped);
        }

        let booting = inner.boot_lock.lock().await;
        if inner.stop_requested.is_triggered() {
            drop(booting);
            tracing::info!("Stop requested before startup");
            self.stop().await;
            return Ok(());
        }
        inner.state.send_replace(ServerState::Starting);
        let booted = self.boot().await;
        drop(booting);

        if let Err(e) = booted {
            tracing::error!(error = %e, "Server failed to start");
            self.stop().await;
            inner.state.send_replace(ServerState::Failed);
            return Err(e);
        }

        let mut stop_requested = inner.stop_requested.subscribe();
        tokio::select! {
            _ = signal.recv() => tracing::info!("Shutdown signal received"),
            _ = stop_requested.recv() => {}
        }

        self.stop().await;
        Ok(())
    }

    /// Returns `None` when a stop arrived mid-boot. Whatever was already
    /// brought up (broker, listener task) is left for the shutdown sequence.
    async fn boot(&self) -> Result<Option<SocketAddr>, ServerError> {
        let inner = &self.inner;
        let config = &inner.config;

        validate_config(config).map_err(ConfigError::Validation)?;
        self.install_routes()?;
        if config.enable_prometheus {
            metrics::spawn_upkeep(metrics::init_metrics(), inner.stop_requested.subscribe());
        }
        let tls = self.load_tls().await?;
        if self.stop_pending() {
            return Ok(None);
        }
        self.connect_broker().await?;
        if self.stop_pending() {
            return Ok(None);
        }

        let std_listener = listener::bind(config)?;
        let service = self.app().into_make_service();
        let handle = inner.handle.clone();
        let secure = tls.is_some();
        let task = match tls {
            Some(tls) => tokio::spawn(
                axum_server::from_tcp_rustls(std_listener, tls)
                    .handle(handle)
                    .serve(service),
            ),
            None => tokio::spawn(axum_server::from_tcp(std_listener).handle(handle).serve(service)),
        };
        *inner.lock_serve_task() = Some(task);

        let Some(addr) = inner.handle.listening().await else {
            let task = inner.lock_serve_task().take();
            let error = match task {
                Some(task) => match task.await {
                    Ok(Err(e)) => e,
                    _ => std::io::Error::other("listener exited before serving"),
                },
                None => std::io::Error::other("listener task missing"),
            };
            return Err(BindError::Configure(error).into());
        };
        if self.stop_pending() {
            return Ok(None);
        }

        inner.availability.set_http_up(true);
        inner.routes.guard().go_live();
        inner.state.send_replace(ServerState::Serving(addr));
        tracing::info!(address = %addr, tls = secure, "HTTP server listening");

        if !config.no_banner {
            print_banner(self, addr, secure);
        }
        Ok(Some(addr))
    }

    fn stop_pending(&self) -> bool {
        let pending = self.inner.stop_requested.is_triggered();
        if pending {
            tracing::info!("Stop requested during startup");
        }
        pending
    }

    fn install_routes(&self) -> Result<(), RouteError> {
        let inner = &self.inner;
        let config = &inner.config;
        let statics = config.static_routes();
        let prometheus = config.enable_prometheus.then(metrics::init_metrics);
        let broker_handler = inner.broker.as_ref().and_then(|b| b.connection_handler());

        inner.routes.mutate(|entries| {
            for route in &statics {
                let dir = config.resolve(&route.dir);
                let handler = handlers::static_dir(&route.prefix, dir.clone());
                entries.set_mount(Mount::new(
                    route.prefix.clone(),
                    MountKind::Static { dir },
                    handler,
                ));
            }

            if let Some(spa) = &config.spa_config {
                let root = config.resolve(&spa.root_folder);
                let handler = handlers::spa(&spa.base_uri, root.clone());
                entries.set_mount(Mount::new(
                    spa.base_uri.clone(),
                    MountKind::Spa { root },
                    handler,
                ));
            }

            if let Some(handle) = prometheus {
                let key = EndpointKey::new(METRICS_PATH, Method::GET);
                entries.add_endpoint(Endpoint::new(
                    key.clone(),
                    RouteKind::Metrics,
                    metrics::metrics_handler(handle),
                )?)?;
                entries.set_endpoint_middleware(&key, vec![Arc::new(SecurityHeaders)])?;
            }

            if let Some(handler) = broker_handler {
                let key = EndpointKey::new(config.fabric_config.fabric_endpoint.clone(), Method::GET);
                entries.add_endpoint(Endpoint::new(key, RouteKind::Broker, handler)?)?;
            }
            Ok(())
        })?;

        for route in &statics {
            tracing::info!(prefix = %route.prefix, dir = %route.dir.display(), "Static directory mounted");
        }
        if let Some(spa) = &config.spa_config {
            tracing::info!(uri = %spa.base_uri, root = %spa.root_folder.display(), "SPA mounted");
        }
        Ok(())
    }

    async fn load_tls(&self) -> Result<Option<RustlsConfig>, TlsError> {
        let custom = {
            let mut slot = self.inner.lock_tls_override();
            slot.locked = true;
            slot.config.clone()
        };

        let config = &self.inner.config;
        match (custom, &config.tls_config) {
            (Some(custom), _) => {
                tracing::info!("Using customized TLS configuration");
                Ok(Some(tls::from_custom(custom)))
            }
            (None, Some(tls_config)) => tls::load_tls_config(config, tls_config).await.map(Some),
            (None, None) => Ok(None),
        }
    }

    async fn connect_broker(&self) -> Result<(), ConnectError> {
        let inner = &self.inner;
        let Some(broker) = &inner.broker else {
            return Ok(());
        };
        let fabric = &inner.config.fabric_config;
        let timeout = fabric.connect_timeout();

        let result = match tokio::time::timeout(timeout, broker.listen(&fabric.endpoint_config)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                inner.availability.set_broker_up(true);
                tracing::info!(endpoint = %fabric.fabric_endpoint, "Broker connected");
                Ok(())
            }
            Err(e) if fabric.required => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Broker unavailable, continuing HTTP-only");
                Ok(())
            }
        }
    }
}

fn print_banner(server: &Server, addr: SocketAddr, secure: bool) {
    let config = server.config();
    let scheme = if secure { "https" } else { "http" };
    println!();
    println!("  switchyard {}", env!("CARGO_PKG_VERSION"));
    println!("  listening   {}://{}", scheme, addr);
    for route in config.static_routes() {
        println!("  static      {} -> {}", route.prefix, route.dir.display());
    }
    if let Some(spa) = &config.spa_config {
        println!("  spa         {} -> {}", spa.base_uri, spa.root_folder.display());
    }
    if server.availability().broker {
        println!("  broker      {}", config.fabric_config.fabric_endpoint);
    }
    if config.enable_prometheus {
        println!("  metrics     {}", METRICS_PATH);
    }
    println!();
}
