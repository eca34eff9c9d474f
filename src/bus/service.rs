//! Services that answer requests on bus channels.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::bus::message::{ServiceError, ServiceRequest, ServiceResponse};

/// A service bound to one bus channel.
pub trait FabricService: Send + Sync + 'static {
    /// Answer one request. Dropping the returned future cancels the call.
    fn handle_request(
        &self,
        request: ServiceRequest,
    ) -> BoxFuture<'static, Result<ServiceResponse, ServiceError>>;

    /// REST bridges the server sets up when the service is registered.
    fn rest_bridge_config(&self) -> Vec<RestBridgeConfig> {
        Vec::new()
    }

    /// Called once during shutdown, after the HTTP drain and broker close.
    fn on_server_shutdown(&self) {}
}

/// Maps one HTTP method + URI onto a service channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestBridgeConfig {
    pub service_channel: String,
    pub uri: String,
    pub method: String,
    #[serde(default)]
    pub allow_head: bool,
    #[serde(default)]
    pub allow_options: bool,
}

impl RestBridgeConfig {
    pub fn new(
        service_channel: impl Into<String>,
        method: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            service_channel: service_channel.into(),
            uri: uri.into(),
            method: method.into(),
            allow_head: false,
            allow_options: false,
        }
    }

    /// The (method, uri) pairs this bridge claims.
    pub fn endpoints(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(self.method.clone(), self.uri.clone())];
        if self.allow_head {
            pairs.push(("HEAD".to_string(), self.uri.clone()));
        }
        if self.allow_options {
            pairs.push(("OPTIONS".to_string(), self.uri.clone()));
        }
        pairs
    }
}

/// A service built from a closure.
pub struct FnService<F> {
    f: F,
}

impl<F, Fut> FabricService for FnService<F>
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceResponse, ServiceError>> + Send + 'static,
{
    fn handle_request(
        &self,
        request: ServiceRequest,
    ) -> BoxFuture<'static, Result<ServiceResponse, ServiceError>> {
        Box::pin((self.f)(request))
    }
}

/// Wrap an async closure as a [`FabricService`].
pub fn service_fn<F, Fut>(f: F) -> Arc<dyn FabricService>
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceResponse, ServiceError>> + Send + 'static,
{
    Arc::new(FnService { f })
}
