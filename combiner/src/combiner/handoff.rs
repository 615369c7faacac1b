//! HandoffWorker - moves one item per dispatched handle to the output
//!
//! Suspends in two places: waiting for the next handle, and waiting for the
//! consumer to take the item. Both waits race the cancellation token, so a stop
//! abandons whatever hand-off is in flight.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CombinerError;
use crate::rendezvous::RendezvousSender;

use super::handle::InputHandle;
use super::status::StatsCounters;

/// Result of handling one dispatched handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandoffOutcome {
    /// One item reached the consumer
    Forwarded,
    /// The queue had nothing to give
    Empty,
    /// Stop was signalled mid hand-off
    Cancelled,
}

pub(crate) struct HandoffWorker<T> {
    dispatch: mpsc::Receiver<Arc<InputHandle<T>>>,
    output: RendezvousSender<T>,
    token: CancellationToken,
    stats: Arc<StatsCounters>,
}

impl<T: Send + 'static> HandoffWorker<T> {
    pub fn new(
        dispatch: mpsc::Receiver<Arc<InputHandle<T>>>,
        output: RendezvousSender<T>,
        token: CancellationToken,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            dispatch,
            output,
            token,
            stats,
        }
    }

    /// Run until cancelled, the dispatch channel closes, or the consumer goes away
    ///
    /// Handles left in the dispatch channel on exit are dropped, not replayed.
    pub async fn run(mut self) -> Result<(), CombinerError> {
        debug!("HandoffWorker::run: called");
        loop {
            let handle = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = self.dispatch.recv() => match next {
                    Some(handle) => handle,
                    None => {
                        debug!("HandoffWorker::run: dispatch channel closed");
                        break;
                    }
                },
            };

            if self.hand_off(&handle).await? == HandoffOutcome::Cancelled {
                break;
            }
        }
        info!(pending = self.dispatch.len(), "Hand-off worker stopped");
        Ok(())
    }

    /// Move at most one item from `handle`'s queue to the output
    pub async fn hand_off(&self, handle: &InputHandle<T>) -> Result<HandoffOutcome, CombinerError> {
        let item = if handle.is_empty() { None } else { handle.try_take() };
        let Some(item) = item else {
            handle.mark_empty_observed();
            self.stats.empty_polls.fetch_add(1, Ordering::Relaxed);
            return Ok(HandoffOutcome::Empty);
        };

        // An accepted offer is counted even if stop arrived in the same poll
        tokio::select! {
            biased;
            sent = self.output.put(item) => {
                sent?;
                handle.reset_empty_tracking();
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                Ok(HandoffOutcome::Forwarded)
            }
            _ = self.token.cancelled() => {
                debug!(id = %handle.id(), "HandoffWorker::hand_off: cancelled, abandoning item");
                Ok(HandoffOutcome::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkQueue;
    use crate::rendezvous;
    use std::time::{Duration, Instant};

    fn worker(
        output: RendezvousSender<u32>,
    ) -> (HandoffWorker<u32>, mpsc::Sender<Arc<InputHandle<u32>>>, CancellationToken) {
        let (tx, rx) = mpsc::channel(20);
        let token = CancellationToken::new();
        let worker = HandoffWorker::new(rx, output, token.clone(), Arc::new(StatsCounters::default()));
        (worker, tx, token)
    }

    #[tokio::test]
    async fn test_forward_resets_empty_tracking() {
        let (output, mut consumer) = rendezvous::channel();
        let (worker, _tx, _token) = worker(output);

        let queue: Arc<WorkQueue<u32>> = WorkQueue::shared();
        queue.push(1);
        let handle = InputHandle::new(queue.clone(), 1.0, Duration::from_secs(60));
        queue.pop();
        let start = Instant::now();
        handle.mark_empty_observed_at(start);
        handle.mark_empty_observed_at(start + Duration::from_secs(3));
        assert_eq!(handle.accumulated_empty(), Duration::from_secs(3));

        queue.push(42);
        let consume = tokio::spawn(async move { consumer.recv().await });
        let outcome = worker.hand_off(&handle).await.unwrap();

        assert_eq!(outcome, HandoffOutcome::Forwarded);
        assert_eq!(consume.await.unwrap(), Some(42));
        assert_eq!(handle.accumulated_empty(), Duration::ZERO);
        assert_eq!(worker.stats.forwarded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_extends_tracking() {
        let (output, _consumer) = rendezvous::channel();
        let (worker, _tx, _token) = worker(output);
        let queue: Arc<WorkQueue<u32>> = WorkQueue::shared();
        let handle = InputHandle::new(queue, 1.0, Duration::from_micros(1));

        tokio::time::sleep(Duration::from_millis(2)).await;
        let outcome = worker.hand_off(&handle).await.unwrap();

        assert_eq!(outcome, HandoffOutcome::Empty);
        assert!(handle.is_timed_out());
        assert_eq!(worker.stats.empty_polls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cancel_abandons_blocked_put() {
        let (output, _consumer) = rendezvous::channel();
        let (worker, tx, token) = worker(output);
        let queue: Arc<WorkQueue<u32>> = WorkQueue::shared();
        queue.push(5);
        tx.send(Arc::new(InputHandle::new(queue.clone(), 1.0, Duration::from_secs(60))))
            .await
            .unwrap();

        let running = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!running.is_finished());
        // The item left the queue and is waiting on the consumer
        assert!(queue.is_empty());

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), running).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_consumer_gone_is_error() {
        let (output, consumer) = rendezvous::channel();
        drop(consumer);
        let (worker, _tx, _token) = worker(output);
        let queue: Arc<WorkQueue<u32>> = WorkQueue::shared();
        queue.push(5);
        let handle = InputHandle::new(queue, 1.0, Duration::from_secs(60));

        let result = worker.hand_off(&handle).await;
        assert!(matches!(result, Err(CombinerError::OutputClosed)));
    }

    #[tokio::test]
    async fn test_run_ends_when_dispatch_closes() {
        let (output, _consumer) = rendezvous::channel();
        let (worker, tx, _token) = worker(output);
        drop(tx);

        let result = tokio::time::timeout(Duration::from_secs(1), worker.run()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
