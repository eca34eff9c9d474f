//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (axum-server)
//!     → server.rs (outer router: request id, trace, access log, panics, body limit)
//!     → routing::RouteTable::dispatch
//!     → middleware (per-route chains)
//!     → handlers.rs (static, SPA, bridge) or broker upgrade
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod server;

pub use middleware::{Middleware, MiddlewareManager};
pub use request::X_REQUEST_ID;
pub use server::{Server, ServerState};
