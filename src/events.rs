//! # Transition Events
//!
//! State-transition notifications and their delivery path. Transitions
//! enqueue an event record while still holding the controller's state
//! lock, which pins the global order; delivery happens after the lock is
//! released, drained by exactly one consumer at a time so listeners never
//! observe transitions out of order or concurrently.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::error;

/// A state transition worth telling the outside world about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionEvent {
    /// The circuit started rejecting calls. `break_duration` is `None`
    /// for a manual isolation, whose rejection is unconditional.
    Opened {
        break_duration: Option<Duration>,
        is_manual: bool,
    },

    /// The circuit resumed normal operation.
    Closed { is_manual: bool },

    /// The break window elapsed and a single recovery probe is allowed.
    HalfOpened,
}

/// A delivered transition notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Name of the circuit breaker that transitioned.
    pub breaker: String,

    /// What happened.
    pub event: TransitionEvent,

    /// Wall-clock time of the transition.
    pub occurred_at: DateTime<Utc>,
}

type Listener = Arc<dyn Fn(&EventRecord) + Send + Sync>;

/// Strictly-ordered transition notification path.
///
/// `enqueue` must be called while holding the lock that performed the
/// transition; `drain` must be called after releasing it. Whichever
/// thread wins the drain token delivers pending records in FIFO order;
/// everyone else returns immediately, so delivery is serialized without
/// a background task.
pub(crate) struct EventDispatcher {
    breaker: String,
    listeners: RwLock<Vec<Listener>>,
    queue: Mutex<VecDeque<EventRecord>>,
    draining: AtomicBool,
}

impl EventDispatcher {
    pub fn new(breaker: String) -> Self {
        Self {
            breaker,
            listeners: RwLock::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn subscribe<L>(&self, listener: L)
    where
        L: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Append an event to the delivery queue. Caller holds the state
    /// lock, so queue order equals transition order.
    pub fn enqueue(&self, event: TransitionEvent, wall: SystemTime) {
        let record = EventRecord {
            breaker: self.breaker.clone(),
            event,
            occurred_at: DateTime::<Utc>::from(wall),
        };
        self.queue.lock().push_back(record);
    }

    /// Deliver pending events if no other thread is already doing so.
    pub fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                // Another thread holds the drain token and will pick up
                // anything we enqueued.
                return;
            }

            loop {
                let record = self.queue.lock().pop_front();
                let Some(record) = record else { break };
                self.deliver(&record);
            }

            self.draining.store(false, Ordering::Release);

            // A producer may have enqueued between our last pop and the
            // token release; retry so nothing is stranded.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, record: &EventRecord) {
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(record))).is_err() {
                error!(
                    breaker = %record.breaker,
                    event = ?record.event,
                    "Transition listener panicked; continuing delivery"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("breaker", &self.breaker)
            .field("listeners", &self.listeners.read().len())
            .field("queued", &self.queue.lock().len())
            .finish()
    }
}
