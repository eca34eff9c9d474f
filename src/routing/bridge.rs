//! Service-to-route bridge.
//!
//! Maps bus channels onto HTTP method + URI pairs. Each `bridge` call is
//! all-or-nothing: either every requested pair is registered or none is.
//! The registry (endpoint → bridge route, channel → endpoints) sits behind
//! one coarse lock; writes are rare. Endpoints are keyed by template shape,
//! so `/items/{id}` and `/items/{x}` name the same bridge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::http::Method;

use crate::bus::{MessageBus, RestBridgeConfig};
use crate::http::handlers;
use crate::routing::error::RouteError;
use crate::routing::matcher::PathTemplate;
use crate::routing::router::{Endpoint, EndpointKey, RouteHandler, RouteKind, RouteTable};

/// Methods a bridge may be registered for.
const BRIDGE_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// A registered bridge endpoint.
#[derive(Debug, Clone)]
pub struct BridgeRoute {
    pub key: EndpointKey,
    pub channel: String,
    pub timeout: Duration,
    pub handler: RouteHandler,
}

/// Shape of the URI template plus method.
type ShapeKey = (String, Method);

#[derive(Default)]
struct BridgeRegistry {
    endpoint_handlers: HashMap<ShapeKey, BridgeRoute>,
    channel_endpoints: HashMap<String, Vec<EndpointKey>>,
}

pub struct ServiceBridge {
    routes: Arc<RouteTable>,
    bus: Arc<MessageBus>,
    registry: Mutex<BridgeRegistry>,
    max_body_size: usize,
}

impl ServiceBridge {
    pub fn new(routes: Arc<RouteTable>, bus: Arc<MessageBus>, max_body_size: usize) -> Self {
        Self {
            routes,
            bus,
            registry: Mutex::new(BridgeRegistry::default()),
            max_body_size,
        }
    }

    /// Bridge `channel` onto every (method, uri) pair in `endpoints`.
    pub fn bridge(
        &self,
        channel: &str,
        endpoints: &[(String, String)],
        timeout: Duration,
    ) -> Result<Vec<EndpointKey>, RouteError> {
        self.bridge_batch(&[(channel.to_string(), endpoints.to_vec())], timeout)
    }

    /// Bridge from a service's declared config.
    pub fn bridge_config(
        &self,
        config: &RestBridgeConfig,
        timeout: Duration,
    ) -> Result<Vec<EndpointKey>, RouteError> {
        self.bridge(&config.service_channel, &config.endpoints(), timeout)
    }

    /// Bridge several configs as one unit: all of them or none.
    pub fn bridge_configs(
        &self,
        configs: &[RestBridgeConfig],
        timeout: Duration,
    ) -> Result<Vec<EndpointKey>, RouteError> {
        if configs.is_empty() {
            return Ok(Vec::new());
        }
        let batch: Vec<(String, Vec<(String, String)>)> = configs
            .iter()
            .map(|c| (c.service_channel.clone(), c.endpoints()))
            .collect();
        self.bridge_batch(&batch, timeout)
    }

    fn bridge_batch(
        &self,
        batch: &[(String, Vec<(String, String)>)],
        timeout: Duration,
    ) -> Result<Vec<EndpointKey>, RouteError> {
        let mut routes = Vec::new();
        for (channel, endpoints) in batch {
            if !self.bus.has_channel(channel) {
                return Err(RouteError::ChannelNotFound(channel.clone()));
            }
            for (method, uri) in endpoints {
                let key = EndpointKey::new(uri.clone(), parse_method(method)?);
                let shape = PathTemplate::parse(uri)?.shape();
                let handler = handlers::bridge(
                    self.bus.clone(),
                    channel.clone(),
                    timeout,
                    self.max_body_size,
                );
                routes.push((
                    shape,
                    BridgeRoute {
                        key,
                        channel: channel.clone(),
                        timeout,
                        handler,
                    },
                ));
            }
        }

        // Registry lock first, then the route table: the two stay in step.
        let mut registry = self.lock_registry();
        self.routes.mutate(|entries| {
            for (_, route) in &routes {
                entries.add_endpoint(Endpoint::new(
                    route.key.clone(),
                    RouteKind::Bridge {
                        channel: route.channel.clone(),
                    },
                    route.handler.clone(),
                )?)?;
            }
            Ok(())
        })?;

        let mut keys = Vec::with_capacity(routes.len());
        for (shape, route) in routes {
            tracing::info!(
                channel = %route.channel,
                endpoint = %route.key,
                timeout_ms = timeout.as_millis() as u64,
                "REST bridge registered"
            );
            registry
                .channel_endpoints
                .entry(route.channel.clone())
                .or_default()
                .push(route.key.clone());
            keys.push(route.key.clone());
            registry
                .endpoint_handlers
                .insert((shape, route.key.method.clone()), route);
        }
        Ok(keys)
    }

    /// Look up a bridge by URI template and method. Parameter names in
    /// `uri` need not match the ones used at registration.
    pub fn lookup(&self, uri: &str, method: &str) -> Result<BridgeRoute, RouteError> {
        let not_found = || RouteError::RouteNotFound {
            method: method.to_string(),
            uri: uri.to_string(),
        };
        let method = parse_method(method).map_err(|_| not_found())?;
        let shape = PathTemplate::parse(uri).map_err(|_| not_found())?.shape();
        self.lock_registry()
            .endpoint_handlers
            .get(&(shape, method))
            .cloned()
            .ok_or_else(not_found)
    }

    /// Endpoints bridged to `channel`, in registration order.
    pub fn channel_endpoints(&self, channel: &str) -> Vec<EndpointKey> {
        self.lock_registry()
            .channel_endpoints
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    fn lock_registry(&self) -> MutexGuard<'_, BridgeRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_method(method: &str) -> Result<Method, RouteError> {
    let upper = method.trim().to_ascii_uppercase();
    BRIDGE_METHODS
        .iter()
        .find(|m| m.as_str() == upper)
        .cloned()
        .ok_or_else(|| RouteError::InvalidMethod(method.to_string()))
}
