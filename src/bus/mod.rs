//! Message bus subsystem.
//!
//! # Data Flow
//! ```text
//! REST bridge handler / broker SEND frame
//!     → channel.rs (MessageBus::request → per-channel worker)
//!     → service.rs (FabricService::handle_request)
//!     → message.rs (ChannelResponse back to the caller)
//! ```
//!
//! # Design Decisions
//! - One worker per channel, one task per request
//! - Every wait on a reply is bounded by the caller's timeout
//! - Abandoning a reply cancels the service call

pub mod channel;
pub mod message;
pub mod service;

pub use channel::{BusError, MessageBus, PendingReply};
pub use message::{ChannelResponse, ServiceError, ServiceRequest, ServiceResponse};
pub use service::{service_fn, FabricService, RestBridgeConfig};
