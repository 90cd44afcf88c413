//! # Error Taxonomy
//!
//! Rejections surfaced by the admission gate, construction-time failures,
//! and the combined error type returned by the `call` helper.

use std::time::Duration;

/// Why the admission gate refused a call.
///
/// Returned synchronously from `before_call`; nothing in this crate
/// retries on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The circuit is open and the break window has not elapsed.
    ///
    /// Recoverable by waiting; `retry_after` is the remaining break
    /// duration (zero when a half-open probe is already in flight).
    #[error("circuit is broken; retry after {retry_after:?}")]
    Broken { retry_after: Duration },

    /// The circuit was manually isolated and only a manual close will
    /// let calls through again.
    #[error("circuit is manually isolated")]
    Isolated,
}

/// Configuration and handle-binding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    /// A threshold, ratio, throughput, or duration was outside its valid
    /// range. Raised at construction, never at call time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A `ManualOverride` or `StateObserver` was bound to a second
    /// circuit breaker. Handles are single-owner for their lifetime.
    #[error("handle is already bound to a circuit breaker")]
    AlreadyBound,

    /// A handle was used before being bound, or its circuit breaker has
    /// been dropped.
    #[error("handle is not bound to a live circuit breaker")]
    NotBound,
}

/// Error surface of [`CircuitBreaker::call`](crate::CircuitBreaker::call):
/// either the gate rejected the call, or the wrapped operation itself
/// failed and was recorded.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// The call never executed.
    #[error("{0}")]
    Rejected(#[from] RejectReason),

    /// The wrapped operation ran and returned an error.
    #[error("wrapped call failed: {0}")]
    Inner(E),
}

impl<E> CallError<E> {
    /// True when the call was refused by the gate without executing.
    pub fn is_rejected(&self) -> bool {
        matches!(self, CallError::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_display() {
        let broken = RejectReason::Broken {
            retry_after: Duration::from_secs(5),
        };
        assert!(broken.to_string().contains("retry after"));
        assert_eq!(
            RejectReason::Isolated.to_string(),
            "circuit is manually isolated"
        );
    }

    #[test]
    fn test_call_error_classification() {
        let rejected: CallError<String> = CallError::Rejected(RejectReason::Isolated);
        assert!(rejected.is_rejected());

        let inner: CallError<String> = CallError::Inner("boom".to_string());
        assert!(!inner.is_rejected());
        assert!(inner.to_string().contains("boom"));
    }
}
