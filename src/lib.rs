//! Switchyard: an embeddable dual-protocol application server.
//!
//! One listener serves REST endpoints, static assets and a single page
//! application, and carries a STOMP broker over WebSocket. Both surfaces share
//! one route table and one lifecycle.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────┐
//!                        │                  SWITCHYARD                   │
//!                        │                                               │
//!   HTTP request         │  ┌─────────┐   ┌──────────┐   ┌────────────┐  │
//!   ─────────────────────┼─▶│   net   │──▶│   http   │──▶│  routing   │  │
//!                        │  │listener │   │  server  │   │ route table│  │
//!                        │  └─────────┘   └──────────┘   └─────┬──────┘  │
//!                        │                                     │         │
//!                        │            static / SPA ◀───────────┤         │
//!                        │                                     ▼         │
//!   STOMP over WS        │  ┌─────────┐                 ┌────────────┐   │
//!   ─────────────────────┼─▶│ broker  │────────────────▶│    bus     │   │
//!                        │  │ session │                 │  services  │   │
//!                        │  └─────────┘                 └────────────┘   │
//!                        │                                               │
//!                        │  ┌─────────────────────────────────────────┐  │
//!                        │  │ config · health · lifecycle · security  │  │
//!                        │  │ observability                           │  │
//!                        │  └─────────────────────────────────────────┘  │
//!                        └───────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Messaging
pub mod broker;
pub mod bus;

// Cross-cutting concerns
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use broker::{BrokerAcceptor, ConnectError, WebSocketBroker};
pub use bus::{
    service_fn, FabricService, MessageBus, RestBridgeConfig, ServiceError, ServiceRequest,
    ServiceResponse,
};
pub use config::{load_config, ServerConfig};
pub use error::ServerError;
pub use health::AvailabilitySnapshot;
pub use http::{Middleware, MiddlewareManager, Server, ServerState};
pub use lifecycle::{Shutdown, ShutdownSignal};
pub use routing::RouteError;
