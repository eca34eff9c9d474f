//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ServerConfig host/port
//!     → listener.rs (bind, BindError on failure)
//!     → tls.rs (optional rustls config from PEM files or caller)
//!     → axum-server serves the bound socket
//!
//! Broker sessions:
//!     → connection.rs (ids, live count, bounded wait on shutdown)
//! ```
//!
//! # Design Decisions
//! - Bind happens in startup so a taken port fails `start()`
//! - TLS is optional and handled transparently by axum-server

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::BindError;
pub use tls::TlsError;
