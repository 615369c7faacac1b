//! Load simulation: pre-filled inputs drained through a live combiner
//!
//! Each input queue is filled with its own index, so every item taken from the
//! output says which input it came from.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{Context, Result, eyre};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::combiner::{Combiner, CombinerConfig, CombinerStats, CombinerStatus};
use crate::config::SimulationConfig;
use crate::queue::WorkQueue;
use crate::rendezvous;

/// Longest wait for a single item before the run is declared stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome for one simulated input
#[derive(Debug, Clone, Serialize)]
pub struct InputReport {
    pub name: String,
    pub priority: f64,
    pub expected_share: f64,
    pub count: usize,
    pub observed_share: f64,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub inputs: Vec<InputReport>,
    pub requested: usize,
    pub drained: usize,
    pub elapsed_ms: u64,
    pub status: CombinerStatus,
    pub stats: CombinerStats,
}

impl SimulationReport {
    /// Largest gap between expected and observed share across inputs
    pub fn max_deviation(&self) -> f64 {
        self.inputs
            .iter()
            .map(|i| (i.expected_share - i.observed_share).abs())
            .fold(0.0, f64::max)
    }

    /// Human-readable table
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<16} {:>10} {:>10} {:>8} {:>10}",
            "INPUT", "PRIORITY", "EXPECTED", "COUNT", "OBSERVED"
        );
        for input in &self.inputs {
            let _ = writeln!(
                out,
                "{:<16} {:>10.3} {:>10.3} {:>8} {:>10.3}",
                input.name, input.priority, input.expected_share, input.count, input.observed_share
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Drained {}/{} items in {}ms (max deviation {:.3})",
            self.drained,
            self.requested,
            self.elapsed_ms,
            self.max_deviation()
        );
        let _ = writeln!(
            out,
            "Cycles: {}  Dispatched: {}  Forwarded: {}  Empty polls: {}  Evicted: {}",
            self.stats.cycles, self.stats.dispatched, self.stats.forwarded, self.stats.empty_polls, self.stats.evicted
        );
        let _ = writeln!(out, "Status: {}", self.status);
        out
    }
}

/// Run one simulation to completion
pub async fn run_simulation(
    combiner_config: &CombinerConfig,
    simulation: &SimulationConfig,
) -> Result<SimulationReport> {
    debug!(?combiner_config, ?simulation, "run_simulation: called");
    if simulation.inputs.is_empty() {
        return Err(eyre!("Simulation needs at least one input"));
    }

    let (output, mut consumer) = rendezvous::channel::<usize>();
    let combiner = Combiner::with_config(output, combiner_config.clone()).context("Failed to create combiner")?;
    let empty_timeout = Duration::from_millis(simulation.empty_timeout_ms);

    let mut queues = Vec::with_capacity(simulation.inputs.len());
    for (index, spec) in simulation.inputs.iter().enumerate() {
        let queue: Arc<WorkQueue<usize>> = WorkQueue::shared();
        queue.extend(std::iter::repeat_n(index, spec.items));
        combiner
            .add_input(Arc::clone(&queue), spec.priority, empty_timeout)
            .context(format!("Failed to register input {}", spec.name))?;
        queues.push(queue);
    }

    let available: usize = simulation.inputs.iter().map(|i| i.items).sum();
    let requested = simulation.take.min(available);
    let mut counts = vec![0usize; simulation.inputs.len()];

    combiner.start().context("Failed to start combiner")?;
    info!(inputs = queues.len(), requested, "Simulation started");
    let started = Instant::now();

    let mut drained = 0;
    while drained < requested {
        match tokio::time::timeout(STALL_TIMEOUT, consumer.recv()).await {
            Ok(Some(index)) => {
                counts[index] += 1;
                drained += 1;
            }
            Ok(None) => {
                warn!(drained, "run_simulation: output closed early");
                break;
            }
            Err(_) => {
                warn!(drained, status = %combiner.status(), "run_simulation: no item within stall timeout");
                break;
            }
        }
    }

    let elapsed = started.elapsed();
    combiner.stop().await;

    let total_priority: f64 = simulation.inputs.iter().map(|i| i.priority).sum();
    let inputs = simulation
        .inputs
        .iter()
        .zip(&counts)
        .map(|(spec, &count)| InputReport {
            name: spec.name.clone(),
            priority: spec.priority,
            expected_share: if total_priority > 0.0 {
                spec.priority / total_priority
            } else {
                1.0 / simulation.inputs.len() as f64
            },
            count,
            observed_share: if drained > 0 { count as f64 / drained as f64 } else { 0.0 },
        })
        .collect();

    let report = SimulationReport {
        inputs,
        requested,
        drained,
        elapsed_ms: elapsed.as_millis() as u64,
        status: combiner.status(),
        stats: combiner.stats(),
    };
    info!(drained, elapsed_ms = report.elapsed_ms, "Simulation finished");
    Ok(report)
}
