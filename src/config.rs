//! # Circuit Breaker Configuration
//!
//! Configuration structures and validation for circuit breaker behavior:
//! the failure-accounting mode, the recovery break duration (constant or
//! dynamically generated), and the per-component registry settings used
//! by the manager.
//!
//! All parameters are validated when a breaker is constructed; an invalid
//! configuration never reaches call time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CircuitBreakerError;

/// Smallest accepted sliding-window span. Below this the ten window
/// buckets would be too narrow to hold a meaningful sample.
const MIN_SAMPLING_DURATION: Duration = Duration::from_millis(10);

/// How call failures are accumulated into an "open the circuit" decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailureAccounting {
    /// Open after `failure_threshold` handled failures in a row.
    ConsecutiveFailures { failure_threshold: u32 },

    /// Open when the failure ratio over a sliding time window reaches
    /// `failure_ratio`, provided at least `minimum_throughput` calls were
    /// sampled in the window. Below that throughput the circuit never
    /// opens regardless of ratio.
    SampledRatio {
        failure_ratio: f64,
        minimum_throughput: u32,
        sampling_duration: Duration,
    },
}

/// Inputs to a dynamic break-duration generator, taken at the moment the
/// circuit opens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreakSignal {
    /// Failure ratio over the current window (0.0 in consecutive mode,
    /// where no ratio is sampled).
    pub failure_rate: f64,

    /// Failures currently counted by the active accounting strategy.
    pub failure_count: u64,

    /// Consecutive failed recovery probes since the circuit last closed.
    /// Grows by one per failed probe, which is what makes escalating
    /// backoff possible.
    pub half_open_attempts: u32,
}

/// Computes the break duration for each transition into the open state.
pub type BreakDurationGenerator = Arc<dyn Fn(&BreakSignal) -> Duration + Send + Sync>;

/// Configuration for a single circuit breaker.
#[derive(Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure-accounting strategy deciding when the circuit opens.
    pub failure_accounting: FailureAccounting,

    /// Time to reject calls after opening, before a recovery probe is
    /// allowed. Ignored when a generator is installed.
    pub break_duration: Duration,

    /// Optional dynamic break-duration computation. Not serializable;
    /// installed programmatically via `with_break_duration_generator`.
    #[serde(skip)]
    pub break_duration_generator: Option<BreakDurationGenerator>,
}

impl CircuitBreakerConfig {
    /// Consecutive-failure accounting with a constant break duration.
    pub fn consecutive(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            failure_accounting: FailureAccounting::ConsecutiveFailures { failure_threshold },
            break_duration,
            break_duration_generator: None,
        }
    }

    /// Sliding-window ratio accounting with a constant break duration.
    pub fn sampled_ratio(
        failure_ratio: f64,
        minimum_throughput: u32,
        sampling_duration: Duration,
        break_duration: Duration,
    ) -> Self {
        Self {
            failure_accounting: FailureAccounting::SampledRatio {
                failure_ratio,
                minimum_throughput,
                sampling_duration,
            },
            break_duration,
            break_duration_generator: None,
        }
    }

    /// Install a dynamic break-duration generator, replacing the constant
    /// `break_duration` for every subsequent open transition.
    pub fn with_break_duration_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&BreakSignal) -> Duration + Send + Sync + 'static,
    {
        self.break_duration_generator = Some(Arc::new(generator));
        self
    }

    /// Validate configuration parameters. Fails fast with
    /// [`CircuitBreakerError::InvalidConfiguration`] before any controller
    /// is built.
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        match &self.failure_accounting {
            FailureAccounting::ConsecutiveFailures { failure_threshold } => {
                if *failure_threshold == 0 {
                    return Err(CircuitBreakerError::InvalidConfiguration(
                        "failure_threshold must be at least 1".to_string(),
                    ));
                }
            }
            FailureAccounting::SampledRatio {
                failure_ratio,
                minimum_throughput,
                sampling_duration,
            } => {
                if !(*failure_ratio > 0.0 && *failure_ratio <= 1.0) {
                    return Err(CircuitBreakerError::InvalidConfiguration(format!(
                        "failure_ratio must be within (0, 1], got {failure_ratio}"
                    )));
                }
                if *minimum_throughput < 2 {
                    return Err(CircuitBreakerError::InvalidConfiguration(
                        "minimum_throughput must be at least 2".to_string(),
                    ));
                }
                if *sampling_duration < MIN_SAMPLING_DURATION {
                    return Err(CircuitBreakerError::InvalidConfiguration(format!(
                        "sampling_duration must be at least {MIN_SAMPLING_DURATION:?}"
                    )));
                }
            }
        }

        if self.break_duration.is_zero() && self.break_duration_generator.is_none() {
            return Err(CircuitBreakerError::InvalidConfiguration(
                "break_duration must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::consecutive(5, Duration::from_secs(30))
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_accounting", &self.failure_accounting)
            .field("break_duration", &self.break_duration)
            .field(
                "break_duration_generator",
                &self.break_duration_generator.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

/// Registry-level configuration: a default breaker configuration plus
/// named per-component overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Configuration applied to components without an explicit entry.
    pub default_config: CircuitBreakerConfig,

    /// Per-component configuration overrides.
    pub component_configs: HashMap<String, CircuitBreakerConfig>,

    /// Soft cap on registered breakers; crossing it logs a warning.
    pub max_breakers: usize,
}

impl ManagerConfig {
    /// Configuration for a specific component, falling back to the
    /// default when no override exists.
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Validate the default and every override.
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.max_breakers == 0 {
            return Err(CircuitBreakerError::InvalidConfiguration(
                "max_breakers must be greater than 0".to_string(),
            ));
        }
        self.default_config.validate()?;
        for (name, config) in &self.component_configs {
            config.validate().map_err(|err| {
                CircuitBreakerError::InvalidConfiguration(format!("component '{name}': {err}"))
            })?;
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_config: CircuitBreakerConfig::default(),
            component_configs: HashMap::new(),
            max_breakers: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_config_validation() {
        let valid = CircuitBreakerConfig::consecutive(3, Duration::from_secs(5));
        assert!(valid.validate().is_ok());

        let zero_threshold = CircuitBreakerConfig::consecutive(0, Duration::from_secs(5));
        assert!(zero_threshold.validate().is_err());

        let zero_break = CircuitBreakerConfig::consecutive(3, Duration::ZERO);
        assert!(zero_break.validate().is_err());
    }

    #[test]
    fn test_ratio_config_validation() {
        let valid =
            CircuitBreakerConfig::sampled_ratio(0.5, 10, Duration::from_secs(30), Duration::from_secs(5));
        assert!(valid.validate().is_ok());

        let ratio_too_high =
            CircuitBreakerConfig::sampled_ratio(1.5, 10, Duration::from_secs(30), Duration::from_secs(5));
        assert!(ratio_too_high.validate().is_err());

        let ratio_zero =
            CircuitBreakerConfig::sampled_ratio(0.0, 10, Duration::from_secs(30), Duration::from_secs(5));
        assert!(ratio_zero.validate().is_err());

        let throughput_too_low =
            CircuitBreakerConfig::sampled_ratio(0.5, 1, Duration::from_secs(30), Duration::from_secs(5));
        assert!(throughput_too_low.validate().is_err());

        let window_too_short =
            CircuitBreakerConfig::sampled_ratio(0.5, 10, Duration::from_millis(1), Duration::from_secs(5));
        assert!(window_too_short.validate().is_err());
    }

    #[test]
    fn test_generator_makes_constant_duration_optional() {
        let config = CircuitBreakerConfig::consecutive(3, Duration::ZERO)
            .with_break_duration_generator(|signal| {
                Duration::from_secs(u64::from(signal.half_open_attempts) + 1)
            });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config =
            CircuitBreakerConfig::sampled_ratio(0.25, 20, Duration::from_secs(60), Duration::from_secs(10));
        let json = serde_json::to_string(&config).expect("serialize");
        let restored: CircuitBreakerConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.failure_accounting, config.failure_accounting);
        assert_eq!(restored.break_duration, config.break_duration);
        assert!(restored.break_duration_generator.is_none());
    }

    #[test]
    fn test_manager_config_component_fallback() {
        let mut config = ManagerConfig::default();
        config.component_configs.insert(
            "queue".to_string(),
            CircuitBreakerConfig::consecutive(2, Duration::from_secs(10)),
        );

        let queue = config.config_for_component("queue");
        assert_eq!(
            queue.failure_accounting,
            FailureAccounting::ConsecutiveFailures {
                failure_threshold: 2
            }
        );

        let other = config.config_for_component("database");
        assert_eq!(other.failure_accounting, config.default_config.failure_accounting);
    }

    #[test]
    fn test_manager_config_validates_overrides() {
        let mut config = ManagerConfig::default();
        config.component_configs.insert(
            "bad".to_string(),
            CircuitBreakerConfig::consecutive(0, Duration::from_secs(1)),
        );

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
