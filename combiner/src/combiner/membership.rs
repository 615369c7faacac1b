//! MembershipSet - committed inputs plus staged add/remove intents
//!
//! Callers only touch the two staging collections, each behind its own short
//! std mutex. The committed registry sits behind a single async mutex held by
//! the accounting loop for a whole maintenance cycle:
//!
//! 1. merge staged adds
//! 2. select a weighted batch and push it to the hand-off worker
//! 3. stage timed-out members for removal, then apply every staged removal
//!
//! Lock order is always registry, then a staging mutex.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::CombinerError;
use crate::queue::QueueId;

use super::handle::InputHandle;
use super::selector::select_batch;
use super::status::{CycleReport, InputSnapshot};

/// Committed membership, only mutated during a maintenance cycle
pub(crate) struct Registry<T> {
    /// Members by queue identity
    members: HashMap<QueueId, Arc<InputHandle<T>>>,

    /// Same members, sorted by priority descending
    by_priority: Vec<Arc<InputHandle<T>>>,

    /// Largest member priority, 0 when empty
    max_priority: f64,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            by_priority: Vec::new(),
            max_priority: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: QueueId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn max_priority(&self) -> f64 {
        self.max_priority
    }

    pub fn by_priority(&self) -> &[Arc<InputHandle<T>>] {
        &self.by_priority
    }

    /// Merge handles; a queue that is already a member keeps its existing handle
    pub fn apply_adds<I>(&mut self, handles: I) -> usize
    where
        I: IntoIterator<Item = Arc<InputHandle<T>>>,
    {
        let mut added = 0;
        for handle in handles {
            if self.members.contains_key(&handle.id()) {
                debug!(id = %handle.id(), "Registry::apply_adds: already a member, skipping");
                continue;
            }
            let priority = handle.priority();
            let position = self.by_priority.partition_point(|h| h.priority() >= priority);
            self.by_priority.insert(position, Arc::clone(&handle));
            self.members.insert(handle.id(), handle);
            self.max_priority = self.max_priority.max(priority);
            added += 1;
        }
        added
    }

    /// Members whose accumulated empty time exceeds their timeout
    pub fn timed_out(&self) -> Vec<QueueId> {
        self.by_priority
            .iter()
            .filter(|h| h.is_timed_out())
            .map(|h| h.id())
            .collect()
    }

    /// Remove members by identity, recomputing the maximum if it left
    pub fn apply_removes<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = QueueId>,
    {
        let mut removed = 0;
        let mut recompute = false;
        for id in ids {
            let Some(handle) = self.members.remove(&id) else {
                debug!(%id, "Registry::apply_removes: not a member, ignoring");
                continue;
            };
            self.by_priority.retain(|h| h.id() != id);
            if handle.priority() == self.max_priority {
                recompute = true;
            }
            removed += 1;
        }
        if recompute {
            self.max_priority = self.by_priority.first().map_or(0.0, |h| h.priority());
            debug!(max_priority = self.max_priority, "Registry::apply_removes: recomputed max priority");
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<InputSnapshot> {
        self.by_priority
            .iter()
            .map(|h| InputSnapshot {
                id: h.id(),
                priority: h.priority(),
                empty_timeout: h.empty_timeout(),
                accumulated_empty: h.accumulated_empty(),
                timed_out: h.is_timed_out(),
            })
            .collect()
    }
}

/// Caller's queue reference held by a staged removal
///
/// Keeps the allocation behind a `QueueId` alive until the removal is applied,
/// so the address cannot be reused by a queue registered in the meantime.
type KeepAlive = Box<dyn Any + Send + Sync>;

/// Committed registry plus the staging collections callers write into
pub struct MembershipSet<T> {
    registry: tokio::sync::Mutex<Registry<T>>,
    pending_add: Mutex<HashMap<QueueId, Arc<InputHandle<T>>>>,
    pending_remove: Mutex<HashMap<QueueId, KeepAlive>>,
}

impl<T> MembershipSet<T> {
    pub fn new() -> Self {
        Self {
            registry: tokio::sync::Mutex::new(Registry::new()),
            pending_add: Mutex::new(HashMap::new()),
            pending_remove: Mutex::new(HashMap::new()),
        }
    }

    fn pending_add(&self) -> MutexGuard<'_, HashMap<QueueId, Arc<InputHandle<T>>>> {
        self.pending_add.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_remove(&self) -> MutexGuard<'_, HashMap<QueueId, KeepAlive>> {
        self.pending_remove.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage a handle for the next merge; the first staged handle per queue wins
    pub fn request_add(&self, handle: InputHandle<T>) -> bool {
        let id = handle.id();
        let mut pending = self.pending_add();
        if pending.contains_key(&id) {
            debug!(%id, "MembershipSet::request_add: already staged");
            return false;
        }
        pending.insert(id, Arc::new(handle));
        debug!(%id, staged = pending.len(), "MembershipSet::request_add: staged");
        true
    }

    /// Stage a removal; unknown queues are dropped at merge time
    pub fn request_remove<Q>(&self, queue: &Arc<Q>)
    where
        Q: ?Sized + Send + Sync + 'static,
    {
        let id = QueueId::of(queue);
        let mut pending = self.pending_remove();
        pending.insert(id, Box::new(Arc::clone(queue)));
        debug!(%id, staged = pending.len(), "MembershipSet::request_remove: staged");
    }

    /// True if `id` is in the committed set
    pub async fn contains(&self, id: QueueId) -> bool {
        self.registry.lock().await.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.lock().await.is_empty()
    }

    pub async fn max_priority(&self) -> f64 {
        self.registry.lock().await.max_priority()
    }

    /// Committed members in priority order
    pub async fn snapshot(&self) -> Vec<InputSnapshot> {
        self.registry.lock().await.snapshot()
    }

    /// Run one maintenance cycle: add, select and dispatch, evict and remove
    pub async fn maintain<R: Rng>(
        &self,
        batch_size: usize,
        refill_threshold: usize,
        dispatch: &mpsc::Sender<Arc<InputHandle<T>>>,
        rng: &mut R,
    ) -> Result<CycleReport, CombinerError> {
        let mut registry = self.registry.lock().await;
        let mut report = CycleReport::default();

        let staged = std::mem::take(&mut *self.pending_add());
        if !staged.is_empty() {
            report.added = registry.apply_adds(staged.into_values());
            debug!(added = report.added, members = registry.len(), "MembershipSet::maintain: merged adds");
        }
        report.peak_members = registry.len();

        let queued = dispatch.max_capacity() - dispatch.capacity();
        if !registry.is_empty() && queued < refill_threshold {
            let batch = select_batch(registry.by_priority(), registry.max_priority(), batch_size, rng);
            for handle in batch {
                match dispatch.try_send(handle) {
                    Ok(()) => report.dispatched += 1,
                    Err(TrySendError::Full(_)) => {
                        debug!(dispatched = report.dispatched, "MembershipSet::maintain: dispatch channel full");
                        break;
                    }
                    Err(TrySendError::Closed(_)) => return Err(CombinerError::DispatchClosed),
                }
            }
        }

        let timed_out = registry.timed_out();
        report.timed_out = timed_out.len();
        // Staged references stay alive until the removal has been applied
        let staged: Vec<(QueueId, KeepAlive)> = self.pending_remove().drain().collect();
        if !timed_out.is_empty() || !staged.is_empty() {
            let removals = timed_out.iter().copied().chain(staged.iter().map(|(id, _)| *id));
            report.removed = registry.apply_removes(removals);
        }
        drop(staged);
        for id in &timed_out {
            info!(%id, "Evicted input after empty timeout");
        }

        Ok(report)
    }
}

impl<T> Default for MembershipSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkQueue;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::{Duration, Instant};

    fn handle(queue: &Arc<WorkQueue<u32>>, priority: f64) -> InputHandle<u32> {
        InputHandle::new(queue.clone(), priority, Duration::from_secs(60))
    }

    async fn cycle(set: &MembershipSet<u32>, tx: &mpsc::Sender<Arc<InputHandle<u32>>>) -> CycleReport {
        let mut rng = StdRng::seed_from_u64(3);
        set.maintain(10, 5, tx, &mut rng).await.unwrap()
    }

    #[tokio::test]
    async fn test_staged_add_visible_after_cycle() {
        let set = MembershipSet::new();
        let (tx, _rx) = mpsc::channel(20);
        let queue = WorkQueue::shared();

        assert!(set.request_add(handle(&queue, 1.0)));
        assert!(!set.contains(QueueId::of(&queue)).await);

        let report = cycle(&set, &tx).await;
        assert_eq!(report.added, 1);
        assert!(set.contains(QueueId::of(&queue)).await);
    }

    #[tokio::test]
    async fn test_duplicate_add_yields_one_member() {
        let set = MembershipSet::new();
        let (tx, _rx) = mpsc::channel(20);
        let queue = WorkQueue::shared();

        assert!(set.request_add(handle(&queue, 1.0)));
        assert!(!set.request_add(handle(&queue, 4.0)));
        cycle(&set, &tx).await;

        // Re-adding a committed member is a no-op too
        set.request_add(handle(&queue, 8.0));
        cycle(&set, &tx).await;

        let snapshot = set.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].priority, 1.0);
    }

    #[tokio::test]
    async fn test_remove_by_identity_only() {
        let set = MembershipSet::new();
        let (tx, _rx) = mpsc::channel(20);
        let queue = WorkQueue::shared();
        set.request_add(handle(&queue, 9.0));
        cycle(&set, &tx).await;

        // Removal names the queue, never the registered priority
        set.request_remove(&queue);
        let report = cycle(&set, &tx).await;

        assert_eq!(report.removed, 1);
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let set = MembershipSet::<u32>::new();
        let (tx, _rx) = mpsc::channel(20);
        let stranger: Arc<WorkQueue<u32>> = WorkQueue::shared();

        set.request_remove(&stranger);
        let report = cycle(&set, &tx).await;

        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn test_staged_removal_pins_queue_identity() {
        let set = MembershipSet::<u32>::new();
        let (tx, _rx) = mpsc::channel(20);

        let retired: Arc<WorkQueue<u32>> = WorkQueue::shared();
        let retired_id = QueueId::of(&retired);
        set.request_remove(&retired);
        drop(retired);

        // The staged removal still owns the old allocation, so a replacement
        // queue cannot take over its address before the cycle runs
        let fresh: Arc<WorkQueue<u32>> = WorkQueue::shared();
        fresh.push(1);
        assert_ne!(QueueId::of(&fresh), retired_id);
        set.request_add(handle(&fresh, 1.0));

        let report = cycle(&set, &tx).await;
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 0);
        assert!(set.contains(QueueId::of(&fresh)).await);
    }

    #[tokio::test]
    async fn test_max_priority_recomputed_on_removal() {
        let set = MembershipSet::new();
        let (tx, _rx) = mpsc::channel(20);
        let high = WorkQueue::shared();
        let mid = WorkQueue::shared();
        let low = WorkQueue::shared();
        set.request_add(handle(&high, 9.0));
        set.request_add(handle(&mid, 4.0));
        set.request_add(handle(&low, 1.0));
        cycle(&set, &tx).await;
        assert_eq!(set.max_priority().await, 9.0);

        set.request_remove(&high);
        cycle(&set, &tx).await;
        assert_eq!(set.max_priority().await, 4.0);

        set.request_remove(&mid);
        set.request_remove(&low);
        cycle(&set, &tx).await;
        assert_eq!(set.max_priority().await, 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_is_priority_ordered() {
        let set = MembershipSet::new();
        let (tx, _rx) = mpsc::channel(20);
        let queues: Vec<_> = (0..4).map(|_| WorkQueue::shared()).collect();
        for (queue, priority) in queues.iter().zip([2.0, 7.0, 2.0, 5.0]) {
            set.request_add(handle(queue, priority));
        }
        cycle(&set, &tx).await;

        let priorities: Vec<f64> = set.snapshot().await.iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![7.0, 5.0, 2.0, 2.0]);
    }

    #[tokio::test]
    async fn test_single_member_fills_batch() {
        let set = MembershipSet::new();
        let (tx, mut rx) = mpsc::channel(20);
        let queue = WorkQueue::shared();
        set.request_add(handle(&queue, 0.5));

        let report = cycle(&set, &tx).await;

        assert_eq!(report.dispatched, 10);
        for _ in 0..10 {
            assert_eq!(rx.try_recv().unwrap().id(), QueueId::of(&queue));
        }
    }

    #[tokio::test]
    async fn test_dispatch_gated_by_backlog() {
        let set = MembershipSet::new();
        let (tx, mut rx) = mpsc::channel(20);
        let queue = WorkQueue::shared();
        set.request_add(handle(&queue, 1.0));

        assert_eq!(cycle(&set, &tx).await.dispatched, 10);
        // Ten handles still queued, well over the refill threshold
        assert_eq!(cycle(&set, &tx).await.dispatched, 0);

        for _ in 0..6 {
            rx.try_recv().unwrap();
        }
        assert_eq!(cycle(&set, &tx).await.dispatched, 10);
    }

    #[tokio::test]
    async fn test_closed_dispatch_is_error() {
        let set = MembershipSet::new();
        let (tx, rx) = mpsc::channel(20);
        drop(rx);
        let queue = WorkQueue::shared();
        set.request_add(handle(&queue, 1.0));

        let mut rng = StdRng::seed_from_u64(3);
        let result = set.maintain(10, 5, &tx, &mut rng).await;
        assert!(matches!(result, Err(CombinerError::DispatchClosed)));
    }

    #[tokio::test]
    async fn test_timed_out_member_evicted_after_dispatch() {
        let set = MembershipSet::new();
        let (tx, mut rx) = mpsc::channel(20);
        let queue = WorkQueue::shared();
        queue.push(1);
        let timed = InputHandle::new(queue.clone(), 1.0, Duration::ZERO);
        queue.pop();
        let start = Instant::now();
        timed.mark_empty_observed_at(start);
        timed.mark_empty_observed_at(start + Duration::from_millis(1));
        assert!(timed.is_timed_out());

        set.request_add(timed);
        let report = cycle(&set, &tx).await;

        // Added and still selected in the same cycle, then evicted
        assert_eq!(report.added, 1);
        assert_eq!(report.dispatched, 10);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.removed, 1);
        assert!(!set.contains(QueueId::of(&queue)).await);
        assert!(rx.try_recv().is_ok());
    }
}
