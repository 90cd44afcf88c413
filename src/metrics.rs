//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of breaker activity for monitoring and
//! alerting: per-breaker lifetime tallies plus a fleet-level aggregation
//! across every breaker a manager owns.

use std::collections::HashMap;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::CircuitState;

/// Snapshot of a single circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// Breaker name.
    pub breaker: String,

    /// State at collection time.
    pub current_state: CircuitState,

    /// Executed calls (successes plus failures; rejections excluded).
    pub total_calls: u64,

    /// Calls whose outcome was not a handled failure.
    pub success_count: u64,

    /// Calls classified as handled failures.
    pub failure_count: u64,

    /// Calls refused by the admission gate without executing.
    pub rejected_count: u64,

    /// Lifetime failure rate over executed calls (0.0 to 1.0).
    pub failure_rate: f64,

    /// Lifetime success rate over executed calls (0.0 to 1.0).
    pub success_rate: f64,

    /// Consecutive failed recovery probes since the breaker last closed.
    pub half_open_attempts: u32,

    /// When this snapshot was taken.
    pub collected_at: DateTime<Utc>,
}

impl BreakerMetrics {
    pub(crate) fn collect(
        breaker: String,
        current_state: CircuitState,
        success_count: u64,
        failure_count: u64,
        rejected_count: u64,
        half_open_attempts: u32,
        wall: SystemTime,
    ) -> Self {
        let total_calls = success_count + failure_count;
        let (failure_rate, success_rate) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            breaker,
            current_state,
            total_calls,
            success_count,
            failure_count,
            rejected_count,
            failure_rate,
            success_rate,
            half_open_attempts,
            collected_at: DateTime::<Utc>::from(wall),
        }
    }

    /// Whether this breaker looks healthy: closed with a reasonable
    /// failure rate, or actively testing recovery.
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::HalfOpen => true,
            CircuitState::Open | CircuitState::Isolated => false,
        }
    }

    /// Human-readable state description.
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing downstream health",
            CircuitState::Isolated => "Isolated - Manually forced open",
        }
    }

    /// Format a one-line summary for logging.
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {}",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count
        )
    }
}

/// Aggregated metrics across every breaker in a fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetMetrics {
    /// Snapshots by breaker name.
    pub breakers: HashMap<String, BreakerMetrics>,

    /// When the aggregation was collected.
    pub collected_at: DateTime<Utc>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self {
            breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add_breaker(&mut self, metrics: BreakerMetrics) {
        self.breakers.insert(metrics.breaker.clone(), metrics);
        self.collected_at = Utc::now();
    }

    /// Count of breakers in each state.
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Breakers currently considered unhealthy.
    pub fn unhealthy_breakers(&self) -> Vec<(&String, &BreakerMetrics)> {
        self.breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .collect()
    }

    /// Fleet health score from 0.0 to 1.0; an empty fleet is healthy.
    pub fn health_score(&self) -> f64 {
        if self.breakers.is_empty() {
            return 1.0;
        }
        let healthy = self
            .breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();
        healthy as f64 / self.breakers.len() as f64
    }

    /// Executed calls across the fleet.
    pub fn total_calls(&self) -> u64 {
        self.breakers.values().map(|m| m.total_calls).sum()
    }

    /// Handled failures across the fleet.
    pub fn total_failures(&self) -> u64 {
        self.breakers.values().map(|m| m.failure_count).sum()
    }

    /// Fleet-wide failure rate over executed calls.
    pub fn fleet_failure_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            return 0.0;
        }
        self.total_failures() as f64 / total as f64
    }

    /// Format a one-line summary for logging.
    pub fn format_summary(&self) -> String {
        let counts = self.count_by_state();
        let count_of = |state: CircuitState| counts.get(&state).copied().unwrap_or(0);
        format!(
            "Breakers: {} total | {} closed | {} open | {} half-open | {} isolated | Health: {:.1}% | Failure rate: {:.2}%",
            self.breakers.len(),
            count_of(CircuitState::Closed),
            count_of(CircuitState::Open),
            count_of(CircuitState::HalfOpen),
            count_of(CircuitState::Isolated),
            self.health_score() * 100.0,
            self.fleet_failure_rate() * 100.0
        )
    }
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}
