//! Configuration validation.
//!
//! Serde handles syntax (a port outside `u16` never deserializes); this
//! module checks the semantic rules and reports every violation at once.

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{EndpointConfig, ServerConfig, StaticRoute};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No host to bind to.
    #[error("host must not be empty")]
    EmptyHost,

    /// TLS enabled without both halves of the key pair.
    #[error("tls_config requires both cert_file and key_file (missing {0})")]
    TlsIncomplete(&'static str),

    /// Broker enabled without an endpoint.
    #[error("fabric_endpoint must not be empty unless the broker is disabled")]
    BrokerEndpointEmpty,

    /// A URI-like setting that must be absolute.
    #[error("{field} must start with '/' (got {value:?})")]
    NotAbsolute { field: &'static str, value: String },

    /// Two static directories claim the same prefix.
    #[error("static prefix {0} is mounted more than once")]
    DuplicateStaticPrefix(String),

    /// SPA mount collides with a static mount.
    #[error("spa base_uri {0} collides with a static prefix")]
    SpaCollision(String),

    /// A duration that has to be positive.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }

    if let Some(tls) = &config.tls_config {
        if tls.cert_file.trim().is_empty() {
            errors.push(ValidationError::TlsIncomplete("cert_file"));
        }
        if tls.key_file.trim().is_empty() {
            errors.push(ValidationError::TlsIncomplete("key_file"));
        }
    }

    let broker = &config.fabric_config;
    if broker.enabled {
        if broker.fabric_endpoint.trim().is_empty() {
            errors.push(ValidationError::BrokerEndpointEmpty);
        } else {
            check_absolute(&mut errors, "fabric_endpoint", &broker.fabric_endpoint);
        }
        check_endpoint_prefixes(&mut errors, &broker.endpoint_config);
        if broker.connect_timeout_secs == 0 {
            errors.push(ValidationError::ZeroDuration("connect_timeout_secs"));
        }
    }

    let mut prefixes = HashSet::new();
    for route in config.static_dir.iter().map(|s| StaticRoute::parse(s)) {
        if !prefixes.insert(route.prefix.clone()) {
            errors.push(ValidationError::DuplicateStaticPrefix(route.prefix));
        }
    }

    if let Some(spa) = &config.spa_config {
        check_absolute(&mut errors, "spa_config.base_uri", &spa.base_uri);
        if spa.base_uri != "/" && prefixes.contains(&spa.base_uri) {
            errors.push(ValidationError::SpaCollision(spa.base_uri.clone()));
        }
    }

    if config.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::ZeroDuration("shutdown_timeout_secs"));
    }
    if config.rest_bridge_timeout_secs == 0 {
        errors.push(ValidationError::ZeroDuration("rest_bridge_timeout_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_endpoint_prefixes(errors: &mut Vec<ValidationError>, endpoint: &EndpointConfig) {
    check_absolute(errors, "topic_prefix", &endpoint.topic_prefix);
    check_absolute(errors, "user_queue_prefix", &endpoint.user_queue_prefix);
    check_absolute(errors, "app_request_prefix", &endpoint.app_request_prefix);
    check_absolute(errors, "app_request_queue_prefix", &endpoint.app_request_queue_prefix);
}

fn check_absolute(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if !value.starts_with('/') {
        errors.push(ValidationError::NotAbsolute {
            field,
            value: value.to_string(),
        });
    }
}
