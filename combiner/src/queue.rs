//! Input queue abstraction
//!
//! The combiner never owns an input queue. Callers keep their own `Arc` to the
//! queue and continue to push into it (or pop from it) while the combiner
//! observes and drains it. A queue is identified by the address of its shared
//! allocation, so any clone of the caller's `Arc` names the same input.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

/// A pollable queue the combiner can drain one item at a time
pub trait InputQueue<T>: Send + Sync {
    /// True if the queue currently holds no items
    fn is_empty(&self) -> bool;

    /// Remove and return one item without blocking
    fn try_take(&self) -> Option<T>;
}

/// Identity of a registered queue
///
/// Derived from the shared allocation behind an `Arc`, never from the queue
/// contents or the priority it was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueueId(usize);

impl QueueId {
    /// Identity of the queue behind `queue`
    pub fn of<Q: ?Sized>(queue: &Arc<Q>) -> Self {
        Self(Arc::as_ptr(queue) as *const () as usize)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue-{:x}", self.0)
    }
}

/// In-process FIFO queue usable as a combiner input
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Create an empty queue already wrapped for sharing with a combiner
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item to the back of the queue
    pub fn push(&self, item: T) {
        self.items().push_back(item);
    }

    /// Append every item from `items`
    pub fn extend<I: IntoIterator<Item = T>>(&self, items: I) {
        let mut guard = self.items();
        guard.extend(items);
        debug!(len = guard.len(), "WorkQueue::extend: called");
    }

    /// Remove the item at the front of the queue
    pub fn pop(&self) -> Option<T> {
        self.items().pop_front()
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("len", &self.len()).finish()
    }
}

impl<T: Send> InputQueue<T> for WorkQueue<T> {
    fn is_empty(&self) -> bool {
        WorkQueue::is_empty(self)
    }

    fn try_take(&self) -> Option<T> {
        self.pop()
    }
}
