//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Build routes → TLS → Broker connect → HTTP listen → wait
//!
//! Shutdown (shutdown.rs):
//!     Signal or stop() → Availability down → Drain HTTP (bounded)
//!     → Close broker → Service hooks → Close bus
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, listeners last
//! - The broker closes after the HTTP drain, never before
//! - Shutdown has timeout: forced close after deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::forward_signals;
