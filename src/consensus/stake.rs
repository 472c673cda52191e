//! Weighted leader lottery shared by the stake and delegate modes.

use rand::Rng;
use std::collections::BTreeMap;

use crate::error::ConsensusError;

/// Walks `weights` in key order and returns the first entry whose cumulative
/// weight exceeds `draw`. `draw` is expected in `[0, total)`.
pub fn select_weighted(weights: &BTreeMap<String, u64>, draw: u64) -> Option<&str> {
    let mut cumulative: u64 = 0;
    for (address, weight) in weights {
        cumulative = cumulative.saturating_add(*weight);
        if cumulative > draw {
            return Some(address);
        }
    }
    None
}

/// Draws uniformly over the total weight and selects a leader.
pub fn elect<R: Rng + ?Sized>(
    weights: &BTreeMap<String, u64>,
    rng: &mut R,
) -> Result<String, ConsensusError> {
    let total = weights
        .values()
        .try_fold(0u64, |acc, w| acc.checked_add(*w))
        .unwrap_or(u64::MAX);
    if total == 0 {
        return Err(ConsensusError::NoEligibleProducer);
    }
    let draw = rng.gen_range(0..total);
    select_weighted(weights, draw)
        .map(str::to_string)
        .ok_or(ConsensusError::NoEligibleProducer)
}
