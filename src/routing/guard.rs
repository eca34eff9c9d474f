//! Route table mutation guard.
//!
//! Before the HTTP listener is live, registration runs unguarded. Once live,
//! every structural write must hold the single mutation slot; contenders fail
//! fast with [`RouteError::Busy`] instead of queueing behind it.
//!
//! # States
//! ```text
//! Free ──begin_mutation──▶ Mutating
//!  ▲                          │
//!  └────end_mutation / drop───┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::routing::error::RouteError;

/// Guard state. Stored as a `u8` so it can live in an atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GuardState {
    Free = 0,
    Mutating = 1,
}

impl GuardState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => GuardState::Free,
            _ => GuardState::Mutating,
        }
    }
}

/// Single-slot exclusive flag protecting the shared router.
#[derive(Debug)]
pub struct RouteGuard {
    state: AtomicU8,
    live: AtomicBool,
}

impl RouteGuard {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GuardState::Free as u8),
            live: AtomicBool::new(false),
        }
    }

    /// Claim the mutation slot.
    ///
    /// The acquire ordering makes every write published by the previous
    /// holder visible before the caller's mutation runs.
    pub fn begin_mutation(&self) -> Result<RouteMutation<'_>, RouteError> {
        self.state
            .compare_exchange(
                GuardState::Free as u8,
                GuardState::Mutating as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .map_err(|_| RouteError::Busy)?;

        Ok(RouteMutation { guard: self })
    }

    /// Release the slot. Equivalent to dropping the token.
    pub fn end_mutation(&self, token: RouteMutation<'_>) {
        debug_assert!(std::ptr::eq(token.guard, self));
        drop(token);
    }

    pub fn state(&self) -> GuardState {
        GuardState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Mark the HTTP listener as serving; mutations are guarded from now on.
    pub fn go_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of holding the mutation slot. Releases it on drop.
#[derive(Debug)]
pub struct RouteMutation<'a> {
    guard: &'a RouteGuard,
}

impl Drop for RouteMutation<'_> {
    fn drop(&mut self) {
        self.guard
            .state
            .store(GuardState::Free as u8, Ordering::Release);
    }
}
