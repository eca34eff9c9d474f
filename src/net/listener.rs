//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve the configured host/port
//! - Bind before serving so a taken port is a startup error, not a task failure
//!
//! # Design Decisions
//! - Port 0 binds an OS-assigned port; the real address is read back

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use thiserror::Error;

use crate::config::ServerConfig;

/// Error type for listener binding.
#[derive(Debug, Error)]
pub enum BindError {
    /// The host/port did not resolve to any address.
    #[error("cannot resolve listen address {0}")]
    Resolve(String),

    /// Failed to bind (port in use, permission denied, ...).
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Failed to configure the bound socket.
    #[error("failed to configure listener: {0}")]
    Configure(#[from] std::io::Error),
}

/// Bind the configured address. The listener is non-blocking, ready for
/// handing to the async server.
pub fn bind(config: &ServerConfig) -> Result<TcpListener, BindError> {
    let address = config.bind_address();
    let addr = address
        .to_socket_addrs()
        .map_err(|_| BindError::Resolve(address.clone()))?
        .next()
        .ok_or_else(|| BindError::Resolve(address.clone()))?;

    let listener = TcpListener::bind(addr).map_err(|source| BindError::Bind { addr, source })?;
    listener.set_nonblocking(true)?;

    tracing::info!(address = %listener.local_addr()?, "Listener bound");
    Ok(listener)
}
