//! Nonce search for work-based blocks.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::blockchain::Block;
use crate::error::ConsensusError;
use crate::hashing;

/// Nonces tried between checks of the cancellation epoch.
const EPOCH_CHECK_INTERVAL: u64 = 1024;

/// Increments the nonce until the hash has at least `block.difficulty`
/// leading hex zeros. Aborts with [`ConsensusError::Superseded`] once `epoch`
/// no longer equals `started_at`.
pub fn mine(block: &mut Block, epoch: &AtomicU64, started_at: u64) -> Result<(), ConsensusError> {
    loop {
        block.hash = block.compute_hash();
        if hashing::meets_difficulty(&block.hash, block.difficulty) {
            tracing::debug!(index = block.index, nonce = block.nonce, hash = %block.hash, "block sealed");
            return Ok(());
        }
        block.nonce = block.nonce.wrapping_add(1);
        if block.nonce % EPOCH_CHECK_INTERVAL == 0 && epoch.load(Ordering::Acquire) != started_at {
            tracing::info!(index = block.index, "search superseded by new tip");
            return Err(ConsensusError::Superseded);
        }
    }
}
