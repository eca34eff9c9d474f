//! Top-level server errors.

use thiserror::Error;

use crate::broker::ConnectError;
use crate::config::ConfigError;
use crate::net::{BindError, TlsError};
use crate::routing::RouteError;

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Certificate or key could not be loaded.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// A required broker could not be connected.
    #[error("broker connect error: {0}")]
    Connect(#[from] ConnectError),

    /// The HTTP port is unavailable.
    #[error("bind error: {0}")]
    Bind(#[from] BindError),

    /// A built-in route clashed with one registered by the caller.
    #[error("route error: {0}")]
    Route(#[from] RouteError),

    /// `start` was called a second time.
    #[error("server has already been started")]
    AlreadyStarted,

    /// `start` was called after `stop`.
    #[error("server has been stopped")]
    Stopped,

    /// TLS customization arrived after the listener was bound.
    #[error("TLS configuration can only be customized before the listener binds")]
    TlsLocked,
}
