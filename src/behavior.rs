//! # Failure-Accounting Behaviors
//!
//! Pluggable decision policies answering "should this failure open the
//! circuit?" and "should this success reset failure accounting?". The
//! controller is agnostic to which strategy is active; both live behind
//! the [`CircuitBehavior`] trait and are mutated only under the
//! controller's lock.

use std::fmt;
use std::time::Instant;

use crate::config::FailureAccounting;
use crate::health::HealthMetrics;

/// Accounting view handed to the break-duration generator when the
/// circuit opens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BehaviorHealth {
    pub failure_rate: f64,
    pub failure_count: u64,
}

/// Failure-accounting strategy contract shared by both modes.
pub(crate) trait CircuitBehavior: Send + fmt::Debug {
    /// A permitted call completed with an unhandled (success) outcome.
    fn on_success(&mut self, now: Instant);

    /// A permitted call completed with a handled failure. Returns true
    /// when the accumulated failures warrant opening the circuit.
    fn on_failure(&mut self, now: Instant) -> bool;

    /// Discard all accumulated accounting (transition into closed).
    fn reset(&mut self, now: Instant);

    /// Current failure rate and count for break-duration computation.
    fn health(&mut self, now: Instant) -> BehaviorHealth;
}

/// Opens after N handled failures in a row; any success starts over.
#[derive(Debug)]
pub(crate) struct ConsecutiveFailureBehavior {
    failure_threshold: u32,
    consecutive_failures: u32,
}

impl ConsecutiveFailureBehavior {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            consecutive_failures: 0,
        }
    }
}

impl CircuitBehavior for ConsecutiveFailureBehavior {
    fn on_success(&mut self, _now: Instant) {
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self, _now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures >= self.failure_threshold
    }

    fn reset(&mut self, _now: Instant) {
        self.consecutive_failures = 0;
    }

    fn health(&mut self, _now: Instant) -> BehaviorHealth {
        // No ratio is sampled in this mode.
        BehaviorHealth {
            failure_rate: 0.0,
            failure_count: u64::from(self.consecutive_failures),
        }
    }
}

/// Opens when the windowed failure ratio crosses the configured bound,
/// once the window holds enough samples to be statistically meaningful.
#[derive(Debug)]
pub(crate) struct SampledRatioBehavior {
    failure_ratio: f64,
    minimum_throughput: u32,
    metrics: HealthMetrics,
}

impl SampledRatioBehavior {
    pub fn new(
        failure_ratio: f64,
        minimum_throughput: u32,
        sampling_duration: std::time::Duration,
        now: Instant,
    ) -> Self {
        Self {
            failure_ratio,
            minimum_throughput,
            metrics: HealthMetrics::new(sampling_duration, now),
        }
    }
}

impl CircuitBehavior for SampledRatioBehavior {
    fn on_success(&mut self, now: Instant) {
        self.metrics.record_success(now);
    }

    fn on_failure(&mut self, now: Instant) -> bool {
        self.metrics.record_failure(now);
        let snapshot = self.metrics.snapshot(now);
        // Below minimum throughput the ratio is not statistically
        // significant and the circuit stays closed.
        snapshot.total() >= u64::from(self.minimum_throughput)
            && snapshot.failure_rate() >= self.failure_ratio
    }

    fn reset(&mut self, now: Instant) {
        self.metrics.reset(now);
    }

    fn health(&mut self, now: Instant) -> BehaviorHealth {
        let snapshot = self.metrics.snapshot(now);
        BehaviorHealth {
            failure_rate: snapshot.failure_rate(),
            failure_count: snapshot.failures,
        }
    }
}

/// Build the behavior instance for a validated accounting configuration.
pub(crate) fn build_behavior(
    accounting: &FailureAccounting,
    now: Instant,
) -> Box<dyn CircuitBehavior> {
    match accounting {
        FailureAccounting::ConsecutiveFailures { failure_threshold } => {
            Box::new(ConsecutiveFailureBehavior::new(*failure_threshold))
        }
        FailureAccounting::SampledRatio {
            failure_ratio,
            minimum_throughput,
            sampling_duration,
        } => Box::new(SampledRatioBehavior::new(
            *failure_ratio,
            *minimum_throughput,
            *sampling_duration,
            now,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_consecutive_opens_at_threshold() {
        let now = Instant::now();
        let mut behavior = ConsecutiveFailureBehavior::new(3);

        assert!(!behavior.on_failure(now));
        assert!(!behavior.on_failure(now));
        assert!(behavior.on_failure(now));
    }

    #[test]
    fn test_consecutive_success_starts_over() {
        let now = Instant::now();
        let mut behavior = ConsecutiveFailureBehavior::new(2);

        assert!(!behavior.on_failure(now));
        behavior.on_success(now);
        assert!(!behavior.on_failure(now));
        assert!(behavior.on_failure(now));
    }

    #[test]
    fn test_consecutive_threshold_of_one() {
        let now = Instant::now();
        let mut behavior = ConsecutiveFailureBehavior::new(1);
        assert!(behavior.on_failure(now));
    }

    #[test]
    fn test_ratio_respects_minimum_throughput() {
        let now = Instant::now();
        let mut behavior =
            SampledRatioBehavior::new(0.5, 10, Duration::from_secs(30), now);

        // Nine failures: ratio 1.0 but throughput 9 < 10.
        for _ in 0..9 {
            assert!(!behavior.on_failure(now));
        }
        // Tenth sample reaches minimum throughput.
        assert!(behavior.on_failure(now));
    }

    #[test]
    fn test_ratio_below_bound_stays_closed() {
        let now = Instant::now();
        let mut behavior =
            SampledRatioBehavior::new(0.6, 4, Duration::from_secs(30), now);

        behavior.on_success(now);
        behavior.on_success(now);
        behavior.on_success(now);
        // 1 failure / 4 total = 0.25 < 0.6.
        assert!(!behavior.on_failure(now));

        let health = behavior.health(now);
        assert_eq!(health.failure_count, 1);
        assert!((health.failure_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ratio_reset_discards_window() {
        let now = Instant::now();
        let mut behavior =
            SampledRatioBehavior::new(0.5, 2, Duration::from_secs(30), now);

        assert!(!behavior.on_failure(now));
        behavior.reset(now);
        // After reset the window restarts; one failure is below throughput.
        assert!(!behavior.on_failure(now));
        assert!(behavior.on_failure(now));
    }
}
