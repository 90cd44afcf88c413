//! # Operational Control Handles
//!
//! Externally-allocated handles for operating and monitoring a circuit
//! breaker: `ManualOverride` forces isolation or closure independent of
//! observed outcomes, `StateObserver` reads state without mutating it.
//! Both bind to exactly one breaker for their lifetime and hold only a
//! non-owning reference, so a dropped breaker is reported rather than
//! kept alive.

use std::sync::{OnceLock, Weak};

use crate::controller::{CallOutcome, CircuitController, CircuitState};
use crate::error::CircuitBreakerError;

fn bind_slot(
    slot: &OnceLock<Weak<CircuitController>>,
    target: Weak<CircuitController>,
) -> Result<(), CircuitBreakerError> {
    slot.set(target)
        .map_err(|_| CircuitBreakerError::AlreadyBound)
}

fn resolve(
    slot: &OnceLock<Weak<CircuitController>>,
) -> Result<std::sync::Arc<CircuitController>, CircuitBreakerError> {
    slot.get()
        .ok_or(CircuitBreakerError::NotBound)?
        .upgrade()
        .ok_or(CircuitBreakerError::NotBound)
}

/// Forces a bound circuit breaker open or closed, bypassing failure
/// accounting. Bind with
/// [`CircuitBreaker::bind_override`](crate::CircuitBreaker::bind_override).
#[derive(Debug, Default)]
pub struct ManualOverride {
    target: OnceLock<Weak<CircuitController>>,
}

impl ManualOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self, target: Weak<CircuitController>) -> Result<(), CircuitBreakerError> {
        bind_slot(&self.target, target)
    }

    /// True once bound to a breaker (even one since dropped).
    pub fn is_bound(&self) -> bool {
        self.target.get().is_some()
    }

    /// Force the breaker into unconditional rejection. Only
    /// [`close`](Self::close) recovers from this; break expiry does not.
    pub fn isolate(&self) -> Result<(), CircuitBreakerError> {
        resolve(&self.target)?.isolate();
        Ok(())
    }

    /// Clear any isolation and restore normal operation with all failure
    /// accounting reset.
    pub fn close(&self) -> Result<(), CircuitBreakerError> {
        resolve(&self.target)?.manual_close();
        Ok(())
    }
}

/// Read-only window onto a bound breaker's state. Bind with
/// [`CircuitBreaker::bind_observer`](crate::CircuitBreaker::bind_observer).
#[derive(Debug, Default)]
pub struct StateObserver {
    target: OnceLock<Weak<CircuitController>>,
}

impl StateObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self, target: Weak<CircuitController>) -> Result<(), CircuitBreakerError> {
        bind_slot(&self.target, target)
    }

    pub fn is_bound(&self) -> bool {
        self.target.get().is_some()
    }

    /// Current state of the bound breaker.
    pub fn current_state(&self) -> Result<CircuitState, CircuitBreakerError> {
        Ok(resolve(&self.target)?.state())
    }

    /// Last outcome the bound breaker classified as a handled failure.
    pub fn last_handled_outcome(&self) -> Result<Option<CallOutcome>, CircuitBreakerError> {
        Ok(resolve(&self.target)?.last_handled_outcome())
    }
}
