//! InputHandle - the combiner's record for one registered queue

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::queue::{InputQueue, QueueId};

/// Empty-period accounting for one input
#[derive(Debug, Default, Clone, Copy)]
struct EmptyTracking {
    /// When the queue was first seen empty since the last drain
    since: Option<Instant>,
    /// Total empty time accumulated since the last drain
    accumulated: Duration,
}

/// A registered input queue with its weight and empty-tracking state
///
/// Equality and hashing use the queue identity only. Two handles for the same
/// queue are the same member whatever priority they were built with.
pub struct InputHandle<T> {
    id: QueueId,
    queue: Arc<dyn InputQueue<T>>,
    priority: f64,
    empty_timeout: Duration,
    tracking: Mutex<EmptyTracking>,
}

impl<T> InputHandle<T> {
    /// Wrap `queue`; an already-empty queue starts its empty period now
    pub fn new(queue: Arc<dyn InputQueue<T>>, priority: f64, empty_timeout: Duration) -> Self {
        let id = QueueId::of(&queue);
        let since = queue.is_empty().then(Instant::now);
        debug!(%id, priority, ?empty_timeout, starts_empty = since.is_some(), "InputHandle::new: called");
        Self {
            id,
            queue,
            priority,
            empty_timeout,
            tracking: Mutex::new(EmptyTracking {
                since,
                accumulated: Duration::ZERO,
            }),
        }
    }

    fn tracking(&self) -> MutexGuard<'_, EmptyTracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn empty_timeout(&self) -> Duration {
        self.empty_timeout
    }

    /// True if the underlying queue holds no items
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take one item from the underlying queue without blocking
    pub(crate) fn try_take(&self) -> Option<T> {
        self.queue.try_take()
    }

    /// Record that the queue was observed empty
    ///
    /// A non-empty queue resets tracking instead. The first observation starts
    /// the empty period; each later one adds the time since that same start to
    /// the accumulator. The start is not advanced until a reset.
    pub fn mark_empty_observed(&self) {
        self.mark_empty_observed_at(Instant::now());
    }

    pub(crate) fn mark_empty_observed_at(&self, now: Instant) {
        if !self.queue.is_empty() {
            self.reset_empty_tracking();
            return;
        }

        let mut tracking = self.tracking();
        match tracking.since {
            None => {
                tracking.since = Some(now);
                tracking.accumulated = Duration::ZERO;
            }
            Some(since) => {
                tracking.accumulated += now.saturating_duration_since(since);
            }
        }
        debug!(id = %self.id, accumulated = ?tracking.accumulated, "InputHandle::mark_empty_observed: called");
    }

    /// Clear the empty period after a successful drain
    pub fn reset_empty_tracking(&self) {
        *self.tracking() = EmptyTracking::default();
    }

    /// Total empty time accumulated since the last reset
    pub fn accumulated_empty(&self) -> Duration {
        self.tracking().accumulated
    }

    /// True once the accumulated empty time exceeds the timeout
    pub fn is_timed_out(&self) -> bool {
        self.accumulated_empty() > self.empty_timeout
    }
}

impl<T> PartialEq for InputHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for InputHandle<T> {}

impl<T> Hash for InputHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for InputHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracking = *self.tracking();
        f.debug_struct("InputHandle")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("empty_timeout", &self.empty_timeout)
            .field("empty_since", &tracking.since)
            .field("accumulated_empty", &tracking.accumulated)
            .finish()
    }
}
