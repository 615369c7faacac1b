//! Weighted queue combiner
//!
//! Two background tasks cooperate through a bounded dispatch channel:
//! - **Accounting loop:** merges staged registrations, selects a weighted
//!   batch of inputs, evicts inputs idle past their timeout
//! - **Hand-off worker:** takes one item from each selected input and passes it
//!   to the output rendezvous

mod config;
mod core;
mod handle;
mod handoff;
mod membership;
mod selector;
mod status;

pub use config::CombinerConfig;
pub use core::Combiner;
pub use handle::InputHandle;
pub use membership::MembershipSet;
pub use selector::select_batch;
pub use status::{CombinerStats, CombinerStatus, CycleReport, InputSnapshot};
