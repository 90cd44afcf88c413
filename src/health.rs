//! # Health Metrics
//!
//! Sliding-time-window success/failure counter backing the ratio-based
//! accounting strategy. The window is a fixed ring of time buckets
//! rotated lazily on access, trading precision (granularity is one
//! bucket width) for O(1) amortized updates instead of a timestamped
//! sample log.

use std::time::{Duration, Instant};

/// Number of buckets spanning the sampling window.
pub(crate) const BUCKET_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    successes: u32,
    failures: u32,
}

/// Aggregated window contents at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowSnapshot {
    pub successes: u64,
    pub failures: u64,
}

impl WindowSnapshot {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failures over total, 0.0 on an empty window.
    pub fn failure_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.failures as f64 / total as f64
    }
}

/// Bucketed sliding window of call outcomes.
///
/// Buckets older than `sampling_duration` relative to "now" are zeroed
/// before any read or write, so the sum of live buckets is always the
/// current window sample. No background timer is involved.
#[derive(Debug)]
pub(crate) struct HealthMetrics {
    buckets: [Bucket; BUCKET_COUNT],
    bucket_width: Duration,
    head: usize,
    head_start: Instant,
}

impl HealthMetrics {
    pub fn new(sampling_duration: Duration, now: Instant) -> Self {
        Self {
            buckets: [Bucket::default(); BUCKET_COUNT],
            bucket_width: sampling_duration / BUCKET_COUNT as u32,
            head: 0,
            head_start: now,
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        self.rotate(now);
        self.buckets[self.head].successes += 1;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.rotate(now);
        self.buckets[self.head].failures += 1;
    }

    pub fn snapshot(&mut self, now: Instant) -> WindowSnapshot {
        self.rotate(now);
        let mut snapshot = WindowSnapshot {
            successes: 0,
            failures: 0,
        };
        for bucket in &self.buckets {
            snapshot.successes += u64::from(bucket.successes);
            snapshot.failures += u64::from(bucket.failures);
        }
        snapshot
    }

    /// Zero the window, e.g. on a transition back to normal operation.
    pub fn reset(&mut self, now: Instant) {
        self.buckets = [Bucket::default(); BUCKET_COUNT];
        self.head = 0;
        self.head_start = now;
    }

    /// Advance the head bucket to cover `now`, zeroing every bucket that
    /// aged out since the last access.
    fn rotate(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.head_start);
        if elapsed < self.bucket_width {
            return;
        }

        let steps = (elapsed.as_nanos() / self.bucket_width.as_nanos().max(1)) as u64;
        if steps >= BUCKET_COUNT as u64 {
            // The whole window aged out while idle.
            self.buckets = [Bucket::default(); BUCKET_COUNT];
            self.head = 0;
            self.head_start = now;
        } else {
            for _ in 0..steps {
                self.head = (self.head + 1) % BUCKET_COUNT;
                self.buckets[self.head] = Bucket::default();
            }
            self.head_start += self.bucket_width * steps as u32;
        }
    }
}
