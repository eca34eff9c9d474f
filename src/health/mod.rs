//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle (startup/shutdown)
//!     → availability.rs (set_http_up / set_broker_up on transitions)
//!     → Server::availability() snapshot for health-check callers
//! ```
//!
//! # Design Decisions
//! - Purely observational: nothing is gated on these flags
//! - HTTP and broker are tracked independently

pub mod availability;

pub use availability::{Availability, AvailabilitySnapshot};
