//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Route handler response
//!     → headers.rs (add missing hardening headers)
//!     → client
//! ```
//!
//! Request body limits are enforced globally by the outer router.

pub mod headers;

pub use headers::SecurityHeaders;
