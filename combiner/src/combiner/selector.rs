//! Weighted random selection by stochastic acceptance
//!
//! Draw a member uniformly, accept it with probability `priority / max`,
//! otherwise draw again. Over many draws each member is chosen in proportion to
//! its priority. This holds in expectation only: a single batch can deviate
//! arbitrarily, and the expected number of draws per pick is
//! `max / mean priority`.

use std::sync::Arc;

use rand::Rng;

use super::handle::InputHandle;

/// Pick `n` handles from `members`, weighted by priority
///
/// `max_priority` must be the largest priority in `members`. A single member
/// is returned `n` times without drawing. When every member has zero priority
/// the weights carry no information and the draw is uniform.
pub fn select_batch<T, R>(
    members: &[Arc<InputHandle<T>>],
    max_priority: f64,
    n: usize,
    rng: &mut R,
) -> Vec<Arc<InputHandle<T>>>
where
    R: Rng,
{
    match members {
        [] => Vec::new(),
        [only] => vec![Arc::clone(only); n],
        _ if max_priority <= 0.0 => (0..n)
            .map(|_| Arc::clone(&members[rng.random_range(0..members.len())]))
            .collect(),
        _ => (0..n).map(|_| Arc::clone(draw(members, max_priority, rng))).collect(),
    }
}

fn draw<'a, T, R>(members: &'a [Arc<InputHandle<T>>], max_priority: f64, rng: &mut R) -> &'a Arc<InputHandle<T>>
where
    R: Rng,
{
    loop {
        let candidate = &members[rng.random_range(0..members.len())];
        if rng.random::<f64>() < candidate.priority() / max_priority {
            return candidate;
        }
    }
}
