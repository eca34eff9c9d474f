//! Subsystem availability.
//!
//! Two independent flags, one per subsystem. Only the lifecycle code flips
//! them; anyone may read a snapshot.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::observability::metrics;

/// Point-in-time view of both flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AvailabilitySnapshot {
    pub http: bool,
    pub broker: bool,
}

#[derive(Debug, Default)]
pub struct Availability {
    http: AtomicBool,
    broker: AtomicBool,
}

impl Availability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call changed the flag.
    pub fn set_http_up(&self, up: bool) -> bool {
        transition(&self.http, "http", up)
    }

    /// Returns true if this call changed the flag.
    pub fn set_broker_up(&self, up: bool) -> bool {
        transition(&self.broker, "broker", up)
    }

    pub fn snapshot(&self) -> AvailabilitySnapshot {
        AvailabilitySnapshot {
            http: self.http.load(Ordering::Acquire),
            broker: self.broker.load(Ordering::Acquire),
        }
    }
}

fn transition(flag: &AtomicBool, subsystem: &'static str, up: bool) -> bool {
    let was = flag.swap(up, Ordering::AcqRel);
    if was == up {
        return false;
    }
    if up {
        tracing::info!(subsystem, "Subsystem available");
    } else {
        tracing::info!(subsystem, "Subsystem unavailable");
    }
    metrics::record_subsystem_up(subsystem, up);
    true
}
