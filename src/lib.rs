#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Breaker Core
//!
//! Concurrency-safe circuit breaker engine: wraps an arbitrary unit of
//! work and protects a failing downstream dependency from further load
//! by tripping into a rejecting state once failures exceed a configured
//! threshold, then probing for recovery before resuming normal traffic.
//!
//! ## Architecture
//!
//! - **State machine**: `Closed` / `Open` / `HalfOpen` / `Isolated`, all
//!   mutation under one exclusive lock per breaker
//! - **Failure accounting**: consecutive-failure counting or a
//!   sliding-window failure ratio with a minimum-throughput guard
//! - **Ordered notifications**: transition events delivered exactly once,
//!   in transition order, on a single-consumer path
//! - **Operational control**: bind-once manual override and read-only
//!   state observer handles, plus a registry manager for fleets
//!
//! ## Module Organization
//!
//! - [`breaker`] - Public facade and the async `call` helper
//! - [`config`] - Accounting modes, break durations, validation
//! - [`control`] - Manual override and state observer handles
//! - [`clock`] - Injectable time source for deterministic tests
//! - [`error`] - Rejections and construction-time failures
//! - [`events`] - Transition events and listener registration
//! - [`manager`] - Named-breaker registry with fleet controls
//! - [`metrics`] - Per-breaker and fleet metric snapshots
//! - [`logging`] - Opt-in tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use breaker_core::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new(
//!     "payments_api",
//!     CircuitBreakerConfig::consecutive(5, Duration::from_secs(30)),
//! )?;
//!
//! let response = breaker
//!     .call(|| async {
//!         // Downstream call here
//!         Ok::<&str, std::io::Error>("ok")
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Pipelines that own their execution flow use the lower-level contract
//! directly: [`CircuitBreaker::before_call`] to admit a call and
//! [`CircuitBreaker::after_call`] to report its classified outcome.

pub mod breaker;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod metrics;

mod behavior;
mod controller;
mod health;

pub use breaker::CircuitBreaker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BreakDurationGenerator, BreakSignal, CircuitBreakerConfig, FailureAccounting, ManagerConfig,
};
pub use control::{ManualOverride, StateObserver};
pub use controller::{CallOutcome, CallPermit, CircuitState};
pub use error::{CallError, CircuitBreakerError, RejectReason};
pub use events::{EventRecord, TransitionEvent};
pub use manager::CircuitBreakerManager;
pub use metrics::{BreakerMetrics, FleetMetrics};
