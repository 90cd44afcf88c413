//! # Circuit Breaker Facade
//!
//! The public entry point: construction from a validated configuration,
//! the `before_call`/`after_call` contract consumed by execution
//! pipelines, and a convenience `call` wrapper for protecting a single
//! async operation with predicate-based outcome classification.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::CircuitBreakerConfig;
use crate::control::{ManualOverride, StateObserver};
use crate::controller::{CallOutcome, CallPermit, CircuitController, CircuitState};
use crate::error::{CallError, CircuitBreakerError, RejectReason};
use crate::events::EventRecord;
use crate::metrics::BreakerMetrics;

/// A named circuit breaker protecting one downstream dependency.
///
/// Cheap to clone; clones share the same state machine.
#[derive(Clone)]
pub struct CircuitBreaker {
    controller: Arc<CircuitController>,
}

impl CircuitBreaker {
    /// Create a circuit breaker with the given name and configuration,
    /// using the operating-system clock.
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, CircuitBreakerError> {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker with an injected clock, for deterministic
    /// control of break expiry and window rotation in tests.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CircuitBreakerError> {
        config.validate()?;
        let name = name.into();
        info!(
            breaker = %name,
            accounting = ?config.failure_accounting,
            break_duration_ms = config.break_duration.as_millis() as u64,
            dynamic_break = config.break_duration_generator.is_some(),
            "Circuit breaker initialized"
        );
        Ok(Self {
            controller: Arc::new(CircuitController::new(name, config, clock)),
        })
    }

    /// Breaker name used in logs and metrics.
    pub fn name(&self) -> &str {
        self.controller.name()
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.controller.state()
    }

    /// True while the breaker is under a manual isolation.
    pub fn is_isolated(&self) -> bool {
        self.state() == CircuitState::Isolated
    }

    /// Last outcome that was classified as a handled failure, if any.
    pub fn last_handled_outcome(&self) -> Option<CallOutcome> {
        self.controller.last_handled_outcome()
    }

    /// Pre-call admission gate. On success the returned permit must be
    /// settled with [`after_call`](Self::after_call); dropping it instead
    /// counts as a cancelled call.
    pub fn before_call(&self) -> Result<CallPermit, RejectReason> {
        self.controller.before_call()
    }

    /// Post-call accounting hook, exactly once per permit, with the
    /// predicate-classified outcome.
    pub fn after_call(&self, permit: CallPermit, outcome: CallOutcome) {
        self.controller.after_call(permit, outcome);
    }

    /// Execute an operation through the circuit breaker, counting every
    /// error as a handled failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.call_classified(|_| true, operation).await
    }

    /// Execute an operation through the circuit breaker with a custom
    /// failure predicate. Errors for which `is_handled` returns false are
    /// surfaced to the caller but treated as successes by the accounting,
    /// mirroring how an upstream predicate evaluator classifies outcomes.
    pub async fn call_classified<P, F, Fut, T, E>(
        &self,
        is_handled: P,
        operation: F,
    ) -> Result<T, CallError<E>>
    where
        P: FnOnce(&E) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let permit = self.before_call()?;

        // If the future is dropped mid-flight the permit's Drop releases
        // the probe slot; the outcome is then never recorded.
        let result = operation().await;

        let outcome = match &result {
            Ok(_) => CallOutcome::Unhandled,
            Err(error) if is_handled(error) => CallOutcome::Handled(error.to_string()),
            Err(_) => CallOutcome::Unhandled,
        };
        self.after_call(permit, outcome);

        result.map_err(CallError::Inner)
    }

    /// Register a transition listener. Listeners observe every transition
    /// exactly once, in transition order, and are never invoked while the
    /// state lock is held.
    pub fn on_transition<L>(&self, listener: L)
    where
        L: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.controller.subscribe(listener);
    }

    /// Bind a manual-override handle to this breaker. Fails with
    /// [`CircuitBreakerError::AlreadyBound`] if the handle is already
    /// bound to any breaker.
    pub fn bind_override(&self, handle: &ManualOverride) -> Result<(), CircuitBreakerError> {
        handle.bind(Arc::downgrade(&self.controller))
    }

    /// Bind a read-only state observer to this breaker. Same single-bind
    /// rule as [`bind_override`](Self::bind_override).
    pub fn bind_observer(&self, handle: &StateObserver) -> Result<(), CircuitBreakerError> {
        handle.bind(Arc::downgrade(&self.controller))
    }

    /// Snapshot of lifetime tallies and the current state.
    pub fn metrics(&self) -> BreakerMetrics {
        self.controller.metrics()
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::consecutive(threshold, Duration::from_millis(100)),
        )
        .expect("valid config")
    }

    #[tokio::test]
    async fn test_call_passes_through_success() {
        let breaker = breaker(3);

        let result = breaker.call(|| async { Ok::<_, String>("payload") }).await;
        assert_eq!(result.unwrap(), "payload");

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
    }

    #[tokio::test]
    async fn test_call_counts_errors_and_opens() {
        let breaker = breaker(2);

        for _ in 0..2 {
            let result: Result<(), _> = breaker
                .call(|| async { Err::<(), _>("connection refused".to_string()) })
                .await;
            assert!(matches!(result, Err(CallError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Next call fails fast without executing.
        let result = breaker
            .call(|| async { Ok::<_, String>("should not run") })
            .await;
        assert!(matches!(
            result,
            Err(CallError::Rejected(RejectReason::Broken { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unhandled_errors_do_not_trip_the_circuit() {
        let breaker = breaker(1);

        // The predicate declines to count this error.
        let result: Result<(), _> = breaker
            .call_classified(
                |error: &String| error.contains("timeout"),
                || async { Err::<(), _>("bad request".to_string()) },
            )
            .await;
        assert!(matches!(result, Err(CallError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.last_handled_outcome(), None);
    }

    #[tokio::test]
    async fn test_last_handled_outcome_carries_detail() {
        let breaker = breaker(5);

        let _: Result<(), _> = breaker
            .call(|| async { Err::<(), _>("disk full".to_string()) })
            .await;

        assert_eq!(
            breaker.last_handled_outcome(),
            Some(CallOutcome::Handled("disk full".to_string()))
        );
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let result = CircuitBreaker::new(
            "bad",
            CircuitBreakerConfig::consecutive(0, Duration::from_secs(1)),
        );
        assert!(matches!(
            result,
            Err(CircuitBreakerError::InvalidConfiguration(_))
        ));
    }
}
