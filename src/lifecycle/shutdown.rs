//! Shutdown coordination.
//!
//! [`Shutdown`] is the external cancellation signal handed to
//! `Server::start`; `Server::stop` runs the ordered drain:
//!
//! ```text
//! availability down → HTTP drain (bounded) → broker close
//!     → service shutdown hooks → bus close → Stopped
//! ```

use std::time::Duration;

use tokio::sync::watch;

use crate::http::server::{Server, ServerState};

/// Grace period for the listener task to exit after a forced shutdown.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Coordinator for graceful shutdown.
///
/// Every subscriber observes the trigger, including ones that subscribe
/// after it fired.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered (or the coordinator is gone).
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

impl Server {
    /// Stop the server. Idempotent: later calls wait for the first to finish.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.stop_requested.trigger();
        inner.stopped.get_or_init(|| self.shutdown_sequence()).await;
    }

    async fn shutdown_sequence(&self) {
        let inner = &self.inner;
        // A boot in progress finishes (or bails) before anything is torn down.
        let _booted = inner.boot_lock.lock().await;
        let timeout = inner.config.shutdown_timeout();
        inner.state.send_replace(ServerState::Stopping);
        tracing::info!(timeout_secs = timeout.as_secs(), "Shutting down");

        inner.availability.set_http_up(false);
        inner.availability.set_broker_up(false);

        self.drain_http(timeout).await;

        // Only after the drain: bridged requests in flight still need the broker.
        if let Some(broker) = &inner.broker {
            if broker.is_listening() {
                broker.close().await;
            }
        }

        for service in inner.bus.services() {
            service.on_server_shutdown();
        }
        inner.bus.close();

        inner.state.send_replace(ServerState::Stopped);
        tracing::info!("Shutdown complete");
    }

    async fn drain_http(&self, timeout: Duration) {
        let inner = &self.inner;
        let task = inner.lock_serve_task().take();
        let Some(mut task) = task else {
            return;
        };

        inner.handle.graceful_shutdown(None);
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => tracing::info!("HTTP listener drained"),
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP listener exited with error"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP listener task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    connections = inner.handle.connection_count(),
                    "ShutdownTimeoutExceeded: forcing remaining connections closed"
                );
                inner.handle.shutdown();
                if tokio::time::timeout(FORCE_CLOSE_GRACE, &mut task).await.is_err() {
                    task.abort();
                }
            }
        }
    }
}
