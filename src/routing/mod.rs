//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (resolve against the compiled snapshot)
//!     → matcher.rs (path templates, prefix mounts)
//!     → endpoint or mount handler, else 405/404
//!
//! Registration (startup or live):
//!     bridge.rs / static mounts / middleware changes
//!     → RouteTable::mutate (guard.rs when live)
//!     → stage, compile, publish
//! ```
//!
//! # Design Decisions
//! - Dispatch never takes a lock
//! - Once live, one structural write at a time; contention fails with Busy
//! - Deterministic: same input always matches same route

pub mod bridge;
pub mod error;
pub mod guard;
pub mod matcher;
pub mod router;

pub use bridge::{BridgeRoute, ServiceBridge};
pub use error::RouteError;
pub use guard::{GuardState, RouteGuard, RouteMutation};
pub use matcher::PathParams;
pub use router::{
    Endpoint, EndpointKey, Mount, MountKind, RouteEntries, RouteHandler, RouteInfo, RouteKind,
    RouteTable,
};
