//! Combiner facade and background loop supervision

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::CombinerError;
use crate::queue::{InputQueue, QueueId};
use crate::rendezvous::RendezvousSender;

use super::config::CombinerConfig;
use super::handle::InputHandle;
use super::handoff::HandoffWorker;
use super::membership::MembershipSet;
use super::status::{CombinerStats, CombinerStatus, InputSnapshot, StatsCounters};

/// Where the combiner is in its start/stop lifecycle
enum Lifecycle {
    NotStarted,
    Running,
    Stopped,
}

/// Merges registered input queues into one output rendezvous
///
/// Inputs are drained in proportion to their priority. An input whose queue
/// stays empty longer than its timeout is evicted automatically.
///
/// Registration is staged: `add_input` and `remove_input` only record intent,
/// and the accounting loop merges that intent on its next cycle. `has_input`
/// reports committed membership, so a queue added a moment ago reads as absent
/// until then.
pub struct Combiner<T: Send + 'static> {
    config: CombinerConfig,
    membership: Arc<MembershipSet<T>>,
    output: RendezvousSender<T>,
    stats: Arc<StatsCounters>,
    token: CancellationToken,
    tasks: TaskTracker,
    status: Arc<watch::Sender<CombinerStatus>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T: Send + 'static> Combiner<T> {
    /// Create a combiner with the default configuration
    pub fn new(output: RendezvousSender<T>) -> Self {
        Self::build(output, CombinerConfig::default())
    }

    /// Create a combiner with `config`
    pub fn with_config(output: RendezvousSender<T>, config: CombinerConfig) -> Result<Self, CombinerError> {
        config.validate()?;
        Ok(Self::build(output, config))
    }

    fn build(output: RendezvousSender<T>, config: CombinerConfig) -> Self {
        debug!(?config, "Combiner::new: called");
        let (status, _) = watch::channel(CombinerStatus::NotStarted);
        Self {
            config,
            membership: Arc::new(MembershipSet::new()),
            output,
            stats: Arc::new(StatsCounters::default()),
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
            status: Arc::new(status),
            lifecycle: Mutex::new(Lifecycle::NotStarted),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CombinerConfig {
        &self.config
    }

    /// Register `queue` with a priority weight and an empty timeout
    ///
    /// Registering a queue that is already registered, or already staged, is a
    /// successful no-op.
    pub fn add_input<Q>(&self, queue: Arc<Q>, priority: f64, empty_timeout: Duration) -> Result<(), CombinerError>
    where
        Q: InputQueue<T> + 'static,
    {
        debug!(id = %QueueId::of(&queue), priority, ?empty_timeout, "Combiner::add_input: called");
        if !priority.is_finite() || priority < 0.0 {
            return Err(CombinerError::InvalidPriority { priority });
        }
        if matches!(*self.lifecycle(), Lifecycle::Stopped) {
            return Err(CombinerError::Stopped);
        }
        self.membership.request_add(InputHandle::new(queue, priority, empty_timeout));
        Ok(())
    }

    /// Request removal of `queue`
    ///
    /// Takes effect on the next accounting cycle. Removing a queue that is not
    /// registered is silently ignored.
    pub fn remove_input<Q>(&self, queue: &Arc<Q>)
    where
        Q: ?Sized + Send + Sync + 'static,
    {
        debug!(id = %QueueId::of(queue), "Combiner::remove_input: called");
        self.membership.request_remove(queue);
    }

    /// True if `queue` is in the committed membership
    pub async fn has_input<Q>(&self, queue: &Arc<Q>) -> bool
    where
        Q: ?Sized,
    {
        self.membership.contains(QueueId::of(queue)).await
    }

    /// Committed inputs, highest priority first
    pub async fn inputs(&self) -> Vec<InputSnapshot> {
        self.membership.snapshot().await
    }

    /// Largest priority among committed inputs, 0 when there are none
    pub async fn max_priority(&self) -> f64 {
        self.membership.max_priority().await
    }

    pub fn stats(&self) -> CombinerStats {
        self.stats.snapshot()
    }

    pub fn status(&self) -> CombinerStatus {
        self.status.borrow().clone()
    }

    /// Watch status transitions, including background loop failures
    pub fn subscribe_status(&self) -> watch::Receiver<CombinerStatus> {
        self.status.subscribe()
    }

    /// Start the accounting loop and the hand-off worker
    ///
    /// Must be called within a tokio runtime. Starting a running combiner has
    /// no effect; starting a stopped one fails.
    pub fn start(&self) -> Result<(), CombinerError> {
        debug!("Combiner::start: called");
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Running => {
                debug!("Combiner::start: already running");
                return Ok(());
            }
            Lifecycle::Stopped => return Err(CombinerError::Stopped),
            Lifecycle::NotStarted => {}
        }

        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.config.effective_dispatch_capacity());
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let accounting = AccountingLoop {
            membership: Arc::clone(&self.membership),
            dispatch: dispatch_tx,
            token: self.token.clone(),
            stats: Arc::clone(&self.stats),
            config: self.config.clone(),
            rng,
        };
        let worker = HandoffWorker::new(
            dispatch_rx,
            self.output.clone(),
            self.token.clone(),
            Arc::clone(&self.stats),
        );

        // Set before spawning so an early failure is not overwritten
        self.status.send_replace(CombinerStatus::Running);
        self.tasks.spawn(supervise("accounting", accounting.run(), self.token.clone(), Arc::clone(&self.status)));
        self.tasks.spawn(supervise("handoff", worker.run(), self.token.clone(), Arc::clone(&self.status)));
        self.tasks.close();
        *lifecycle = Lifecycle::Running;

        info!(batch_size = self.config.batch_size, poll_interval_ms = self.config.poll_interval_ms, "Combiner started");
        Ok(())
    }

    /// Stop both background loops and wait for them to exit
    ///
    /// Once this returns no further item reaches the output, whichever caller
    /// it is. Items already taken from an input but not yet accepted by the
    /// consumer are dropped.
    pub async fn stop(&self) {
        debug!("Combiner::stop: called");
        *self.lifecycle() = Lifecycle::Stopped;
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        self.status.send_if_modified(|status| {
            if matches!(status, CombinerStatus::Failed { .. } | CombinerStatus::Stopped) {
                false
            } else {
                *status = CombinerStatus::Stopped;
                true
            }
        });
        info!("Combiner stopped");
    }
}

impl<T: Send + 'static> Drop for Combiner<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Drives maintenance cycles on a fixed cadence
struct AccountingLoop<T> {
    membership: Arc<MembershipSet<T>>,
    dispatch: mpsc::Sender<Arc<InputHandle<T>>>,
    token: CancellationToken,
    stats: Arc<StatsCounters>,
    config: CombinerConfig,
    rng: StdRng,
}

impl<T: Send + 'static> AccountingLoop<T> {
    async fn run(mut self) -> Result<(), CombinerError> {
        debug!("AccountingLoop::run: called");
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let cycle = self
                .membership
                .maintain(
                    self.config.batch_size,
                    self.config.refill_threshold(),
                    &self.dispatch,
                    &mut self.rng,
                )
                .await;
            let report = match cycle {
                Ok(report) => report,
                // The worker exits first on stop and drops the receiving end
                Err(CombinerError::DispatchClosed) if self.token.is_cancelled() => break,
                Err(e) => return Err(e),
            };
            self.stats.record_cycle(&report);
        }

        info!("Accounting loop stopped");
        Ok(())
    }
}

/// Run `work` on its own task and report how it ended
///
/// An error or panic marks the combiner failed and cancels the sibling loop.
async fn supervise<F>(
    component: &'static str,
    work: F,
    token: CancellationToken,
    status: Arc<watch::Sender<CombinerStatus>>,
) where
    F: Future<Output = Result<(), CombinerError>> + Send + 'static,
{
    let reason = match tokio::spawn(work).await {
        Ok(Ok(())) => {
            debug!(component, "supervise: exited cleanly");
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => panic_message(e.into_panic()),
        Err(e) => e.to_string(),
    };

    error!(component, %reason, "Background loop failed");
    status.send_if_modified(|current| {
        if current.is_terminal() {
            false
        } else {
            *current = CombinerStatus::Failed {
                component: component.to_string(),
                reason,
            };
            true
        }
    });
    token.cancel();
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
