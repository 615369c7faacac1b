//! Status, statistics and snapshot types

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::queue::QueueId;

/// Lifecycle of a combiner's background loops
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CombinerStatus {
    NotStarted,
    Running,
    Stopped,
    /// A background loop ended on its own; both loops are shut down
    Failed { component: String, reason: String },
}

impl CombinerStatus {
    /// True once no further items will be forwarded
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed { .. })
    }
}

impl std::fmt::Display for CombinerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed { component, reason } => write!(f, "failed ({component}): {reason}"),
        }
    }
}

/// Statistics for the combiner
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CombinerStats {
    /// Accounting cycles completed
    pub cycles: u64,
    /// Handles pushed onto the dispatch channel
    pub dispatched: u64,
    /// Items handed to the output consumer
    pub forwarded: u64,
    /// Dispatched handles whose queue turned out empty
    pub empty_polls: u64,
    /// Members removed after exceeding their empty timeout
    pub evicted: u64,
    /// Members removed for any reason, eviction included
    pub removed: u64,
    /// Largest committed membership seen
    pub peak_inputs: usize,
}

/// Shared counters behind [`CombinerStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub cycles: AtomicU64,
    pub dispatched: AtomicU64,
    pub forwarded: AtomicU64,
    pub empty_polls: AtomicU64,
    pub evicted: AtomicU64,
    pub removed: AtomicU64,
    pub peak_inputs: AtomicUsize,
}

impl StatsCounters {
    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.dispatched.fetch_add(report.dispatched as u64, Ordering::Relaxed);
        self.evicted.fetch_add(report.timed_out as u64, Ordering::Relaxed);
        self.removed.fetch_add(report.removed as u64, Ordering::Relaxed);
        self.peak_inputs.fetch_max(report.peak_members, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CombinerStats {
        CombinerStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            peak_inputs: self.peak_inputs.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one maintenance cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Staged handles merged into the committed set
    pub added: usize,
    /// Handles pushed to the hand-off worker
    pub dispatched: usize,
    /// Members found past their empty timeout
    pub timed_out: usize,
    /// Members actually removed, explicit requests included
    pub removed: usize,
    /// Committed membership after the add phase
    pub peak_members: usize,
}

/// Point-in-time view of one committed input
#[derive(Debug, Clone, PartialEq)]
pub struct InputSnapshot {
    pub id: QueueId,
    pub priority: f64,
    pub empty_timeout: Duration,
    pub accumulated_empty: Duration,
    pub timed_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!CombinerStatus::NotStarted.is_terminal());
        assert!(!CombinerStatus::Running.is_terminal());
        assert!(CombinerStatus::Stopped.is_terminal());
        assert!(
            CombinerStatus::Failed {
                component: "handoff".to_string(),
                reason: "boom".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CombinerStatus::Running.to_string(), "running");
        let failed = CombinerStatus::Failed {
            component: "accounting".to_string(),
            reason: "panicked".to_string(),
        };
        assert_eq!(failed.to_string(), "failed (accounting): panicked");
    }

    #[test]
    fn test_record_cycle_accumulates() {
        let counters = StatsCounters::default();
        counters.record_cycle(&CycleReport {
            added: 2,
            dispatched: 10,
            timed_out: 1,
            removed: 2,
            peak_members: 2,
        });
        counters.record_cycle(&CycleReport {
            dispatched: 5,
            peak_members: 1,
            ..Default::default()
        });

        let stats = counters.snapshot();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.dispatched, 15);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.peak_inputs, 2);
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&CombinerStatus::Stopped).unwrap();
        assert_eq!(json, r#"{"state":"stopped"}"#);
    }
}
