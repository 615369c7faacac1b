//! Stochastic Combiner - weighted merging of many input queues
//!
//! A [`Combiner`] drains a dynamic set of input queues into one output
//! rendezvous. Each input carries a priority weight and is drained in
//! proportion to it; an input that stays empty past its timeout is evicted.
//!
//! # Modules
//!
//! - [`queue`] - Input queue trait, identity and an in-memory queue
//! - [`rendezvous`] - Zero-capacity hand-off channel for the output
//! - [`combiner`] - Membership, selection and the background loops
//! - [`config`] - Configuration types and loading
//! - [`simulate`] - Load simulation driving a live combiner
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod combiner;
pub mod config;
pub mod error;
pub mod queue;
pub mod rendezvous;
pub mod simulate;

// Re-export commonly used types
pub use combiner::{Combiner, CombinerConfig, CombinerStats, CombinerStatus, InputSnapshot};
pub use config::{Config, InputSpec, SimulationConfig};
pub use error::CombinerError;
pub use queue::{InputQueue, QueueId, WorkQueue};
pub use rendezvous::{RendezvousReceiver, RendezvousSender};
pub use simulate::{SimulationReport, run_simulation};
