//! # Circuit Breaker Manager
//!
//! Registry of named circuit breakers for the different downstream
//! components of a system. Resolves per-component configuration,
//! aggregates fleet metrics, and provides emergency isolate/close
//! controls driven through each breaker's bound manual override.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::ManagerConfig;
use crate::control::ManualOverride;
use crate::controller::CircuitState;
use crate::error::CircuitBreakerError;
use crate::metrics::{BreakerMetrics, FleetMetrics};

/// A registered breaker together with its operational control handle.
#[derive(Debug)]
struct ManagedBreaker {
    breaker: Arc<CircuitBreaker>,
    control: ManualOverride,
}

/// Manager for the circuit breakers of a system's components.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: Arc<RwLock<HashMap<String, ManagedBreaker>>>,
    config: ManagerConfig,
}

impl CircuitBreakerManager {
    /// Create a manager from a validated registry configuration.
    pub fn from_config(config: ManagerConfig) -> Result<Self, CircuitBreakerError> {
        config.validate()?;
        info!(
            max_breakers = config.max_breakers,
            component_overrides = config.component_configs.len(),
            "Circuit breaker manager initialized"
        );
        Ok(Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            config,
        })
    }

    /// Get or create the circuit breaker for a component.
    pub async fn get_breaker(
        &self,
        component_name: &str,
    ) -> Result<Arc<CircuitBreaker>, CircuitBreakerError> {
        {
            let breakers = self.breakers.read().await;
            if let Some(managed) = breakers.get(component_name) {
                return Ok(Arc::clone(&managed.breaker));
            }
        }

        let mut breakers = self.breakers.write().await;

        // Double-check: another task may have created it while we waited
        // for the write lock.
        if let Some(managed) = breakers.get(component_name) {
            return Ok(Arc::clone(&managed.breaker));
        }

        if breakers.len() >= self.config.max_breakers {
            warn!(
                component = component_name,
                current_count = breakers.len(),
                max_breakers = self.config.max_breakers,
                "Breaker count exceeds the configured cap"
            );
        }

        let component_config = self.config.config_for_component(component_name);
        let breaker = Arc::new(CircuitBreaker::new(component_name, component_config)?);

        let control = ManualOverride::new();
        breaker.bind_override(&control)?;

        breakers.insert(
            component_name.to_string(),
            ManagedBreaker {
                breaker: Arc::clone(&breaker),
                control,
            },
        );
        info!(
            component = component_name,
            total_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        Ok(breaker)
    }

    /// Names of every registered breaker.
    pub async fn breaker_names(&self) -> Vec<String> {
        let breakers = self.breakers.read().await;
        breakers.keys().cloned().collect()
    }

    /// Metrics for one component, if registered.
    pub async fn metrics_for(&self, component_name: &str) -> Option<BreakerMetrics> {
        let breakers = self.breakers.read().await;
        breakers
            .get(component_name)
            .map(|managed| managed.breaker.metrics())
    }

    /// Aggregated metrics across every registered breaker.
    pub async fn fleet_metrics(&self) -> FleetMetrics {
        let mut fleet = FleetMetrics::new();
        let breakers = self.breakers.read().await;
        for managed in breakers.values() {
            fleet.add_breaker(managed.breaker.metrics());
        }
        fleet
    }

    /// Count of breakers in each state.
    pub async fn state_summary(&self) -> HashMap<CircuitState, usize> {
        self.fleet_metrics().await.count_by_state()
    }

    /// Fleet health score from 0.0 to 1.0.
    pub async fn health_score(&self) -> f64 {
        self.fleet_metrics().await.health_score()
    }

    /// Emergency stop: isolate every registered breaker.
    pub async fn isolate_all(&self) {
        warn!("Isolating all circuit breakers (emergency stop)");
        let breakers = self.breakers.read().await;
        for (name, managed) in breakers.iter() {
            if let Err(error) = managed.control.isolate() {
                warn!(component = %name, %error, "Failed to isolate breaker");
            }
        }
    }

    /// Emergency recovery: close every registered breaker with fresh
    /// accounting.
    pub async fn close_all(&self) {
        warn!("Closing all circuit breakers (emergency recovery)");
        let breakers = self.breakers.read().await;
        for (name, managed) in breakers.iter() {
            if let Err(error) = managed.control.close() {
                warn!(component = %name, %error, "Failed to close breaker");
            }
        }
    }

    /// Remove a component's breaker. Returns true when one was removed.
    pub async fn remove_breaker(&self, component_name: &str) -> bool {
        let mut breakers = self.breakers.write().await;
        if breakers.remove(component_name).is_some() {
            info!(
                component = component_name,
                remaining = breakers.len(),
                "Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }
}

impl Clone for CircuitBreakerManager {
    fn clone(&self) -> Self {
        Self {
            breakers: Arc::clone(&self.breakers),
            config: self.config.clone(),
        }
    }
}
