//! Registration and lookup errors for the route table.

use thiserror::Error;

/// Errors returned synchronously to whoever registers or looks up routes.
///
/// None of these affect the running server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Another route already claims this method + URI.
    #[error("route {method} {uri} is already registered")]
    DuplicateRoute { method: String, uri: String },

    /// The bus channel already has a service.
    #[error("service channel {0} is already registered")]
    DuplicateChannel(String),

    /// Not one of the HTTP methods a bridge may use.
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    /// URI that cannot be turned into a route.
    #[error("invalid route URI {0:?}")]
    InvalidUri(String),

    /// Bridging to a channel nobody serves.
    #[error("service channel {0} does not exist")]
    ChannelNotFound(String),

    /// Lookup miss.
    #[error("no route for {method} {uri}")]
    RouteNotFound { method: String, uri: String },

    /// Another route mutation is in progress; retry later.
    #[error("route table is busy with another mutation")]
    Busy,
}
