//! Broker (fabric) subsystem.
//!
//! # Data Flow
//! ```text
//! GET fabric_endpoint (WebSocket upgrade)
//!     → websocket.rs (socket pump, heart-beats, shutdown)
//!     → session.rs (STOMP commands, subscriptions)
//!     → frame.rs (wire codec)
//!     → bus (SEND to request prefixes)
//! ```
//!
//! # Design Decisions
//! - The server only depends on the `BrokerAcceptor` contract
//! - Closing the acceptor closes every open session
//! - Subscriptions are shared across sessions; a session's entries go
//!   with it

pub mod acceptor;
pub mod frame;
pub mod session;
pub mod websocket;

pub use acceptor::{BrokerAcceptor, ConnectError};
pub use frame::{Command, Frame, FrameError};
pub use session::{BrokerShared, Flow, Session, Subscriptions};
pub use websocket::WebSocketBroker;
