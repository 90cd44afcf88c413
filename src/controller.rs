//! # Circuit Controller
//!
//! The state machine at the heart of the crate. Owns the current state,
//! break deadline, half-open probe slot, and failure-accounting behavior,
//! all guarded by one exclusive lock per breaker instance. Exposes the
//! pre-call admission gate and the post-call accounting hook, and fires
//! ordered transition notifications through the event dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::behavior::{build_behavior, CircuitBehavior};
use crate::clock::Clock;
use crate::config::{BreakDurationGenerator, BreakSignal, CircuitBreakerConfig};
use crate::error::RejectReason;
use crate::events::{EventDispatcher, EventRecord, TransitionEvent};
use crate::metrics::BreakerMetrics;

/// Circuit breaker states representing the current operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, all calls are allowed through.
    Closed,
    /// Failure mode, all calls are rejected until the break elapses.
    Open,
    /// Testing recovery, exactly one probe call is permitted.
    HalfOpen,
    /// Forced open by manual override; never recovers on its own.
    Isolated,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Isolated => "isolated",
        };
        f.write_str(name)
    }
}

/// A permitted call's result as classified by the caller's predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    /// A failure the breaker should react to, with a human-readable
    /// description of what went wrong.
    Handled(String),

    /// A success, or a failure the predicate chose not to count.
    Unhandled,
}

/// Proof that a call was admitted by the gate.
///
/// Must be settled exactly once via `after_call`. Dropping the permit
/// without settling (a cancelled call) releases the half-open probe slot
/// if one was reserved and contributes nothing to failure accounting, so
/// a cancelled probe is neither a recovery signal nor a failure.
#[derive(Debug)]
pub struct CallPermit {
    controller: Arc<CircuitController>,
    probe: bool,
    generation: u64,
    completed: bool,
}

impl CallPermit {
    /// True when this permit is the single half-open recovery probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.completed {
            self.controller.abandon(self.probe, self.generation);
        }
    }
}

/// Lifetime call tallies for metric snapshots.
#[derive(Debug, Clone, Copy, Default)]
struct Tallies {
    successes: u64,
    failures: u64,
    rejected: u64,
}

/// All mutable controller state; touched only through the lock.
#[derive(Debug)]
struct ControllerInner {
    state: CircuitState,
    break_until: Option<Instant>,
    half_open_attempts: u32,
    probe_reserved: bool,
    last_handled_outcome: Option<CallOutcome>,
    behavior: Box<dyn CircuitBehavior>,
    /// Bumped on every state transition; outcomes carrying a stale
    /// generation are not counted.
    generation: u64,
    tallies: Tallies,
}

/// The circuit breaker state machine. One per breaker instance, shared
/// behind an `Arc` with permits and bound handles.
pub(crate) struct CircuitController {
    name: String,
    break_duration: Duration,
    break_duration_generator: Option<BreakDurationGenerator>,
    clock: Arc<dyn Clock>,
    dispatcher: EventDispatcher,
    inner: Mutex<ControllerInner>,
}

/// Bounded lock wait used in debug builds to surface deadlocks instead
/// of hanging.
#[cfg(debug_assertions)]
const LOCK_STALL_LIMIT: Duration = Duration::from_secs(5);

impl CircuitController {
    /// Build a controller from a validated configuration.
    pub fn new(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let behavior = build_behavior(&config.failure_accounting, now);
        Self {
            dispatcher: EventDispatcher::new(name.clone()),
            name,
            break_duration: config.break_duration,
            break_duration_generator: config.break_duration_generator,
            clock,
            inner: Mutex::new(ControllerInner {
                state: CircuitState::Closed,
                break_until: None,
                half_open_attempts: 0,
                probe_reserved: false,
                last_handled_outcome: None,
                behavior,
                generation: 0,
                tallies: Tallies::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the state lock. Debug builds bound the wait and treat a
    /// timeout as a diagnosed deadlock, fatal to this call only; release
    /// builds block unconditionally so a detection false-positive can
    /// never fail production traffic.
    #[cfg(debug_assertions)]
    fn guard(&self) -> MutexGuard<'_, ControllerInner> {
        match self.inner.try_lock_for(LOCK_STALL_LIMIT) {
            Some(guard) => guard,
            None => panic!(
                "circuit breaker '{}' state lock not acquired within {:?}; probable deadlock",
                self.name, LOCK_STALL_LIMIT
            ),
        }
    }

    #[cfg(not(debug_assertions))]
    fn guard(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock()
    }

    pub fn state(&self) -> CircuitState {
        self.guard().state
    }

    pub fn last_handled_outcome(&self) -> Option<CallOutcome> {
        self.guard().last_handled_outcome.clone()
    }

    pub fn subscribe<L>(&self, listener: L)
    where
        L: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(listener);
    }

    /// Pre-call admission gate.
    ///
    /// Decides under the lock whether the call may run, reserving the
    /// single half-open probe slot when applicable. The lock is held only
    /// for the state fields, never across the wrapped call.
    pub fn before_call(self: &Arc<Self>) -> Result<CallPermit, RejectReason> {
        let now = self.clock.now();
        let mut fire = false;

        let permit = {
            let mut inner = self.guard();
            match inner.state {
                CircuitState::Isolated => {
                    inner.tallies.rejected += 1;
                    debug!(breaker = %self.name, "Call rejected while isolated");
                    return Err(RejectReason::Isolated);
                }
                CircuitState::Open => {
                    match inner.break_until {
                        Some(until) if now < until => {
                            inner.tallies.rejected += 1;
                            let retry_after = until - now;
                            debug!(
                                breaker = %self.name,
                                retry_after_ms = retry_after.as_millis() as u64,
                                "Call rejected while open"
                            );
                            return Err(RejectReason::Broken { retry_after });
                        }
                        Some(_) => {}
                        None => {
                            warn!(
                                breaker = %self.name,
                                "Circuit open without a break deadline; probing immediately"
                            );
                        }
                    }

                    // Break elapsed: admit a single recovery probe.
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_reserved = true;
                    inner.generation += 1;
                    self.dispatcher
                        .enqueue(TransitionEvent::HalfOpened, self.clock.wall());
                    info!(breaker = %self.name, "Circuit breaker half-open (testing recovery)");
                    fire = true;
                    self.permit(&inner, true)
                }
                CircuitState::HalfOpen => {
                    if inner.probe_reserved {
                        inner.tallies.rejected += 1;
                        debug!(breaker = %self.name, "Call rejected; recovery probe in flight");
                        return Err(RejectReason::Broken {
                            retry_after: Duration::ZERO,
                        });
                    }
                    // A previous probe was cancelled; this call takes over
                    // the slot.
                    inner.probe_reserved = true;
                    self.permit(&inner, true)
                }
                CircuitState::Closed => self.permit(&inner, false),
            }
        };

        if fire {
            self.dispatcher.drain();
        }
        Ok(permit)
    }

    fn permit(self: &Arc<Self>, inner: &ControllerInner, probe: bool) -> CallPermit {
        CallPermit {
            controller: Arc::clone(self),
            probe,
            generation: inner.generation,
            completed: false,
        }
    }

    /// Post-call accounting hook, exactly once per permitted call.
    ///
    /// Delegates the open/stay decision to the active behavior, applies
    /// the transition table, and enqueues any notification under the same
    /// lock before draining after release.
    pub fn after_call(&self, mut permit: CallPermit, outcome: CallOutcome) {
        permit.completed = true;
        let now = self.clock.now();
        let handled = matches!(outcome, CallOutcome::Handled(_));

        {
            let mut inner = self.guard();
            if handled {
                inner.tallies.failures += 1;
                inner.last_handled_outcome = Some(outcome);
            } else {
                inner.tallies.successes += 1;
            }

            if permit.generation != inner.generation {
                // The circuit transitioned while this call was running;
                // its outcome no longer describes the current era.
                debug!(
                    breaker = %self.name,
                    state = %inner.state,
                    "Outcome arrived after a state transition; not counted"
                );
            } else {
                match inner.state {
                    CircuitState::Closed => {
                        if handled {
                            if inner.behavior.on_failure(now) {
                                self.open_locked(&mut inner, now);
                            }
                        } else {
                            inner.behavior.on_success(now);
                        }
                    }
                    CircuitState::HalfOpen => {
                        inner.probe_reserved = false;
                        if handled {
                            // The generator must see the updated attempt
                            // count so backoff can escalate per probe.
                            inner.half_open_attempts =
                                inner.half_open_attempts.saturating_add(1);
                            inner.behavior.on_failure(now);
                            self.open_locked(&mut inner, now);
                        } else {
                            self.close_locked(&mut inner, now, false);
                        }
                    }
                    CircuitState::Open | CircuitState::Isolated => {
                        // Same-generation permits cannot reach these
                        // states; the gate never admits calls in them.
                        debug!(
                            breaker = %self.name,
                            state = %inner.state,
                            "Outcome ignored in rejecting state"
                        );
                    }
                }
            }
        }

        self.dispatcher.drain();
    }

    /// A permit was dropped without an outcome (cancelled call). Frees
    /// the probe slot so a cancelled probe cannot wedge recovery; records
    /// nothing.
    fn abandon(&self, probe: bool, generation: u64) {
        if !probe {
            return;
        }
        let mut inner = self.guard();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.probe_reserved = false;
            debug!(breaker = %self.name, "Probe cancelled before completion; slot released");
        }
    }

    /// Manual override: force unconditional rejection.
    pub fn isolate(&self) {
        {
            let mut inner = self.guard();
            inner.state = CircuitState::Isolated;
            inner.break_until = None;
            inner.probe_reserved = false;
            inner.generation += 1;
            self.dispatcher.enqueue(
                TransitionEvent::Opened {
                    break_duration: None,
                    is_manual: true,
                },
                self.clock.wall(),
            );
            warn!(breaker = %self.name, "Circuit breaker manually isolated");
        }
        self.dispatcher.drain();
    }

    /// Manual override: force normal operation with fresh accounting.
    pub fn manual_close(&self) {
        let now = self.clock.now();
        {
            let mut inner = self.guard();
            self.close_locked(&mut inner, now, true);
        }
        self.dispatcher.drain();
    }

    /// Metric snapshot of the current state and lifetime tallies.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.guard();
        BreakerMetrics::collect(
            self.name.clone(),
            inner.state,
            inner.tallies.successes,
            inner.tallies.failures,
            inner.tallies.rejected,
            inner.half_open_attempts,
            self.clock.wall(),
        )
    }

    /// Transition to open after a handled failure, computing the break
    /// duration from the configured constant or generator. Caller holds
    /// the lock; the notification is enqueued here and drained by the
    /// caller after release.
    fn open_locked(&self, inner: &mut ControllerInner, now: Instant) {
        let health = inner.behavior.health(now);
        let signal = BreakSignal {
            failure_rate: health.failure_rate,
            failure_count: health.failure_count,
            half_open_attempts: inner.half_open_attempts,
        };
        let break_duration = match &self.break_duration_generator {
            Some(generator) => generator(&signal),
            None => self.break_duration,
        };

        inner.state = CircuitState::Open;
        inner.break_until = Some(now + break_duration);
        inner.probe_reserved = false;
        inner.generation += 1;
        self.dispatcher.enqueue(
            TransitionEvent::Opened {
                break_duration: Some(break_duration),
                is_manual: false,
            },
            self.clock.wall(),
        );
        error!(
            breaker = %self.name,
            break_duration_ms = break_duration.as_millis() as u64,
            failure_count = signal.failure_count,
            half_open_attempts = signal.half_open_attempts,
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Transition to closed, resetting all failure accounting. Used by
    /// both a successful recovery probe and a manual close.
    fn close_locked(&self, inner: &mut ControllerInner, now: Instant, is_manual: bool) {
        inner.state = CircuitState::Closed;
        inner.break_until = None;
        inner.half_open_attempts = 0;
        inner.probe_reserved = false;
        inner.behavior.reset(now);
        inner.generation += 1;
        self.dispatcher
            .enqueue(TransitionEvent::Closed { is_manual }, self.clock.wall());
        info!(
            breaker = %self.name,
            manual = is_manual,
            "Circuit breaker closed (recovered)"
        );
    }
}

impl std::fmt::Debug for CircuitController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitController")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CircuitBreakerConfig;

    fn controller(config: CircuitBreakerConfig) -> (Arc<CircuitController>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let controller = Arc::new(CircuitController::new(
            "test".to_string(),
            config,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        (controller, clock)
    }

    fn fail(controller: &Arc<CircuitController>) {
        let permit = controller.before_call().expect("call admitted");
        controller.after_call(permit, CallOutcome::Handled("downstream error".to_string()));
    }

    #[test]
    fn test_closed_admits_and_counts_failures() {
        let (controller, _clock) =
            controller(CircuitBreakerConfig::consecutive(2, Duration::from_secs(5)));

        fail(&controller);
        assert_eq!(controller.state(), CircuitState::Closed);

        fail(&controller);
        assert_eq!(controller.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_with_remaining_break() {
        let (controller, clock) =
            controller(CircuitBreakerConfig::consecutive(1, Duration::from_secs(5)));

        fail(&controller);
        clock.advance(Duration::from_secs(2));

        let rejection = controller.before_call().unwrap_err();
        assert_eq!(
            rejection,
            RejectReason::Broken {
                retry_after: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn test_half_open_admits_exactly_one_probe() {
        let (controller, clock) =
            controller(CircuitBreakerConfig::consecutive(1, Duration::from_secs(5)));

        fail(&controller);
        clock.advance(Duration::from_secs(5));

        let probe = controller.before_call().expect("probe admitted");
        assert!(probe.is_probe());
        assert_eq!(controller.state(), CircuitState::HalfOpen);

        // A second caller while the probe is outstanding.
        let rejection = controller.before_call().unwrap_err();
        assert_eq!(
            rejection,
            RejectReason::Broken {
                retry_after: Duration::ZERO
            }
        );

        controller.after_call(probe, CallOutcome::Unhandled);
        assert_eq!(controller.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cancelled_probe_releases_slot_without_accounting() {
        let (controller, clock) =
            controller(CircuitBreakerConfig::consecutive(1, Duration::from_secs(5)));

        fail(&controller);
        clock.advance(Duration::from_secs(5));

        let probe = controller.before_call().expect("probe admitted");
        drop(probe);

        // Still half-open, and the slot is free again for the next probe.
        assert_eq!(controller.state(), CircuitState::HalfOpen);
        let retry = controller.before_call().expect("slot released");
        assert!(retry.is_probe());
    }

    #[test]
    fn test_stale_outcome_is_not_counted() {
        let (controller, _clock) =
            controller(CircuitBreakerConfig::consecutive(1, Duration::from_secs(5)));

        // Two calls admitted concurrently in the same closed era.
        let first = controller.before_call().expect("admitted");
        let second = controller.before_call().expect("admitted");

        controller.after_call(first, CallOutcome::Handled("boom".to_string()));
        assert_eq!(controller.state(), CircuitState::Open);

        // The straggler completes after the transition; a success must
        // not close the circuit it never probed.
        controller.after_call(second, CallOutcome::Unhandled);
        assert_eq!(controller.state(), CircuitState::Open);
    }

    #[test]
    fn test_last_handled_outcome_is_tracked() {
        let (controller, _clock) =
            controller(CircuitBreakerConfig::consecutive(3, Duration::from_secs(5)));

        assert_eq!(controller.last_handled_outcome(), None);
        fail(&controller);
        assert_eq!(
            controller.last_handled_outcome(),
            Some(CallOutcome::Handled("downstream error".to_string()))
        );
    }

    #[test]
    fn test_isolate_overrides_everything_until_manual_close() {
        let (controller, clock) =
            controller(CircuitBreakerConfig::consecutive(1, Duration::from_secs(1)));

        controller.isolate();
        assert_eq!(controller.state(), CircuitState::Isolated);

        // Break expiry never applies while isolated.
        clock.advance(Duration::from_secs(60));
        assert_eq!(controller.before_call().unwrap_err(), RejectReason::Isolated);

        controller.manual_close();
        assert_eq!(controller.state(), CircuitState::Closed);
        assert!(controller.before_call().is_ok());
    }

    #[test]
    fn test_metrics_snapshot_counts_calls() {
        let (controller, _clock) =
            controller(CircuitBreakerConfig::consecutive(2, Duration::from_secs(5)));

        let permit = controller.before_call().unwrap();
        controller.after_call(permit, CallOutcome::Unhandled);
        fail(&controller);
        fail(&controller);
        // Now open; this one is rejected.
        assert!(controller.before_call().is_err());

        let metrics = controller.metrics();
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 2);
        assert_eq!(metrics.rejected_count, 1);
        assert_eq!(metrics.current_state, CircuitState::Open);
    }
}
