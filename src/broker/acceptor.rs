//! The contract the server needs from a broker.

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::config::EndpointConfig;
use crate::routing::RouteHandler;

/// Broker could not be brought up.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The broker did not come up within the connect timeout.
    #[error("broker did not connect within {0:?}")]
    Timeout(std::time::Duration),

    /// Endpoint settings the broker cannot work with.
    #[error("invalid broker endpoint configuration: {0}")]
    InvalidConfig(String),

    /// `listen` called twice.
    #[error("broker is already listening")]
    AlreadyListening,

    /// Transport failure.
    #[error("broker unreachable: {0}")]
    Unreachable(String),
}

/// Accepts broker connections.
///
/// Implementations may accept on their own socket or, by returning a
/// handler from [`connection_handler`](Self::connection_handler), through
/// the HTTP listener at the configured fabric endpoint.
pub trait BrokerAcceptor: Send + Sync {
    /// Start accepting connections.
    fn listen(&self, config: &EndpointConfig) -> BoxFuture<'_, Result<(), ConnectError>>;

    /// Stop accepting and close open sessions.
    fn close(&self) -> BoxFuture<'_, ()>;

    fn is_listening(&self) -> bool;

    /// Handler the server mounts at the fabric endpoint, if any.
    fn connection_handler(&self) -> Option<RouteHandler> {
        None
    }
}
