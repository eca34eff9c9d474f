//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON/TOML) or CLI flags
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc with the server and its subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only TLS may be swapped before bind
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    normalize_prefix, BrokerConfig, EndpointConfig, LogConfig, LogFormat, ServerConfig,
    SpaConfig, StaticRoute, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
