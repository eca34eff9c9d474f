//! Route table and dispatch.
//!
//! # Responsibilities
//! - Store registered endpoints (method + path template) and directory mounts
//! - Dispatch each request to the best match
//! - Apply per-route middleware chains
//!
//! # Design Decisions
//! - Writers stage a copy of the entries, compile it, then publish the
//!   compiled snapshot through `ArcSwap`; a failed write publishes nothing
//! - Dispatch reads the snapshot without locking
//! - Endpoints beat mounts; literal endpoints beat templated ones; mounts are
//!   tried longest prefix first
//! - O(n) scans are acceptable for typical route counts

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;

use crate::http::middleware::Middleware;
use crate::routing::error::RouteError;
use crate::routing::guard::RouteGuard;
use crate::routing::matcher::{PathParams, PathTemplate, PrefixMatcher};

/// A type-erased async request handler.
#[derive(Clone)]
pub struct RouteHandler(Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>);

impl RouteHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self(Arc::new(move |req| Box::pin(f(req))))
    }

    pub fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        (self.0)(request)
    }

    /// Wrap this handler in a middleware chain; the first element runs first.
    pub fn with_middleware(&self, chain: &[Arc<dyn Middleware>]) -> RouteHandler {
        chain.iter().rev().fold(self.clone(), |next, middleware| {
            let middleware = middleware.clone();
            RouteHandler(Arc::new(move |req| middleware.intercept(req, next.clone())))
        })
    }
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RouteHandler")
    }
}

/// Identifies an endpoint by URI and method. Renders as `uri-METHOD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub uri: String,
    pub method: Method,
}

impl EndpointKey {
    pub fn new(uri: impl Into<String>, method: Method) -> Self {
        Self {
            uri: uri.into(),
            method,
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.uri, self.method)
    }
}

/// What an endpoint is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// REST bridge onto a bus channel.
    Bridge { channel: String },
    /// Broker streaming transport upgrade.
    Broker,
    /// Metrics exposition.
    Metrics,
}

/// What a directory mount serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountKind {
    Static { dir: PathBuf },
    Spa { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub key: EndpointKey,
    pub kind: RouteKind,
    template: PathTemplate,
    handler: RouteHandler,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Endpoint {
    pub fn new(
        key: EndpointKey,
        kind: RouteKind,
        handler: RouteHandler,
    ) -> Result<Self, RouteError> {
        let template = PathTemplate::parse(&key.uri)?;
        Ok(Self {
            key,
            kind,
            template,
            handler,
            middleware: Vec::new(),
        })
    }

    fn id(&self) -> (String, Method) {
        (self.template.shape(), self.key.method.clone())
    }
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub prefix: String,
    pub kind: MountKind,
    handler: RouteHandler,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Mount {
    pub fn new(prefix: impl Into<String>, kind: MountKind, handler: RouteHandler) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
            handler,
            middleware: Vec::new(),
        }
    }
}

/// Read-only view of a registered endpoint.
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub key: EndpointKey,
    pub kind: RouteKind,
    pub middleware_count: usize,
}

/// The mutable registration state behind the compiled snapshot.
#[derive(Debug, Clone, Default)]
pub struct RouteEntries {
    endpoints: HashMap<(String, Method), Endpoint>,
    mounts: BTreeMap<String, Mount>,
}

impl RouteEntries {
    pub fn contains_endpoint(&self, key: &EndpointKey) -> Result<bool, RouteError> {
        let shape = PathTemplate::parse(&key.uri)?.shape();
        Ok(self.endpoints.contains_key(&(shape, key.method.clone())))
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Result<(), RouteError> {
        let id = endpoint.id();
        if self.endpoints.contains_key(&id) {
            return Err(RouteError::DuplicateRoute {
                method: endpoint.key.method.to_string(),
                uri: endpoint.key.uri.clone(),
            });
        }
        self.endpoints.insert(id, endpoint);
        Ok(())
    }

    /// Insert or replace the mount at `mount.prefix`.
    pub fn set_mount(&mut self, mount: Mount) -> Option<MountKind> {
        let middleware = self
            .mounts
            .get(&mount.prefix)
            .map(|old| old.middleware.clone())
            .unwrap_or_default();
        let mount = Mount { middleware, ..mount };
        self.mounts
            .insert(mount.prefix.clone(), mount)
            .map(|old| old.kind)
    }

    pub fn set_endpoint_middleware(
        &mut self,
        key: &EndpointKey,
        chain: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouteError> {
        let endpoint = self.endpoint_mut(key)?;
        endpoint.middleware = chain;
        Ok(())
    }

    pub fn set_mount_middleware(
        &mut self,
        prefix: &str,
        chain: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouteError> {
        let mount = self
            .mounts
            .get_mut(prefix)
            .ok_or_else(|| RouteError::RouteNotFound {
                method: "*".to_string(),
                uri: prefix.to_string(),
            })?;
        mount.middleware = chain;
        Ok(())
    }

    fn endpoint_mut(&mut self, key: &EndpointKey) -> Result<&mut Endpoint, RouteError> {
        let shape = PathTemplate::parse(&key.uri)?.shape();
        self.endpoints
            .get_mut(&(shape, key.method.clone()))
            .ok_or_else(|| RouteError::RouteNotFound {
                method: key.method.to_string(),
                uri: key.uri.clone(),
            })
    }

    fn compile(&self) -> CompiledRoutes {
        let mut endpoints: Vec<CompiledEndpoint> = self
            .endpoints
            .values()
            .map(|e| CompiledEndpoint {
                template: e.template.clone(),
                method: e.key.method.clone(),
                handler: e.handler.with_middleware(&e.middleware),
            })
            .collect();
        endpoints.sort_by(|a, b| {
            a.template
                .param_count()
                .cmp(&b.template.param_count())
                .then_with(|| a.template.as_str().cmp(b.template.as_str()))
        });

        let mut mounts: Vec<CompiledMount> = self
            .mounts
            .values()
            .map(|m| CompiledMount {
                matcher: PrefixMatcher::new(m.prefix.clone()),
                handler: m.handler.with_middleware(&m.middleware),
            })
            .collect();
        mounts.sort_by(|a, b| b.matcher.prefix().len().cmp(&a.matcher.prefix().len()));

        CompiledRoutes { endpoints, mounts }
    }
}

struct CompiledEndpoint {
    template: PathTemplate,
    method: Method,
    handler: RouteHandler,
}

struct CompiledMount {
    matcher: PrefixMatcher,
    handler: RouteHandler,
}

#[derive(Default)]
struct CompiledRoutes {
    endpoints: Vec<CompiledEndpoint>,
    mounts: Vec<CompiledMount>,
}

enum Resolved {
    Endpoint(RouteHandler, PathParams),
    Mount(RouteHandler),
    MethodNotAllowed,
    NotFound,
}

impl CompiledRoutes {
    fn resolve(&self, method: &Method, path: &str) -> Resolved {
        let mut path_matched = false;
        for endpoint in &self.endpoints {
            if let Some(params) = endpoint.template.matches(path) {
                if endpoint.method == *method {
                    return Resolved::Endpoint(endpoint.handler.clone(), params);
                }
                path_matched = true;
            }
        }
        if path_matched {
            return Resolved::MethodNotAllowed;
        }

        self.mounts
            .iter()
            .find(|m| m.matcher.matches(path))
            .map(|m| Resolved::Mount(m.handler.clone()))
            .unwrap_or(Resolved::NotFound)
    }
}

/// The shared router: registration entries, mutation guard and the
/// published dispatch snapshot.
pub struct RouteTable {
    guard: RouteGuard,
    entries: Mutex<RouteEntries>,
    compiled: ArcSwap<CompiledRoutes>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            guard: RouteGuard::new(),
            entries: Mutex::new(RouteEntries::default()),
            compiled: ArcSwap::from_pointee(CompiledRoutes::default()),
        }
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    /// Apply a structural change.
    ///
    /// Once the listener is live the guard slot is required and contention
    /// returns [`RouteError::Busy`]. The change is all-or-nothing: `f` works
    /// on a staged copy that is only published if it returns `Ok`.
    pub fn mutate<T>(
        &self,
        f: impl FnOnce(&mut RouteEntries) -> Result<T, RouteError>,
    ) -> Result<T, RouteError> {
        let token = if self.guard.is_live() {
            Some(self.guard.begin_mutation()?)
        } else {
            None
        };

        let mut entries = self.lock_entries();
        let mut staged = entries.clone();
        let out = f(&mut staged)?;

        self.compiled.store(Arc::new(staged.compile()));
        *entries = staged;
        drop(entries);

        if let Some(token) = token {
            self.guard.end_mutation(token);
        }
        Ok(out)
    }

    /// Reverse lookup by URI template and method.
    pub fn route_info(&self, uri: &str, method: &Method) -> Option<RouteInfo> {
        let shape = PathTemplate::parse(uri).ok()?.shape();
        let entries = self.lock_entries();
        entries
            .endpoints
            .get(&(shape, method.clone()))
            .map(|e| RouteInfo {
                key: e.key.clone(),
                kind: e.kind.clone(),
                middleware_count: e.middleware.len(),
            })
    }

    /// Registered mounts, longest prefix first.
    pub fn mounts(&self) -> Vec<(String, MountKind)> {
        let entries = self.lock_entries();
        let mut mounts: Vec<_> = entries
            .mounts
            .values()
            .map(|m| (m.prefix.clone(), m.kind.clone()))
            .collect();
        mounts.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        mounts
    }

    /// Dispatch a request against the current snapshot.
    pub async fn dispatch(&self, mut request: Request) -> Response {
        let routes = self.compiled.load_full();
        let resolved = routes.resolve(request.method(), request.uri().path());
        match resolved {
            Resolved::Endpoint(handler, params) => {
                request.extensions_mut().insert(params);
                handler.call(request).await
            }
            Resolved::Mount(handler) => handler.call(request).await,
            Resolved::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            Resolved::NotFound => StatusCode::NOT_FOUND.into_response(),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, RouteEntries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
