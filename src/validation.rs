//! Rules applied to every candidate block, locally produced or peer-supplied.

use crate::blockchain::{Block, Transaction};
use crate::error::ValidationError;
use crate::hashing::{self, EMPTY_MERKLE_ROOT};
use crate::identity::Identity;

/// Checks `candidate` as the direct successor of `previous`.
///
/// A block loaded from a record that predates Merkle roots carries the empty
/// sentinel and skips the Merkle comparison.
pub fn check_block(candidate: &Block, previous: &Block) -> Result<(), ValidationError> {
    if candidate.previous_hash != previous.hash {
        return Err(ValidationError::BrokenLink {
            index: candidate.index,
            expected: previous.hash.clone(),
            found: candidate.previous_hash.clone(),
        });
    }

    if candidate.index != previous.index + 1 {
        return Err(ValidationError::BadIndex {
            index: candidate.index,
            previous: previous.index,
        });
    }

    let computed = candidate.compute_hash();
    if candidate.hash != computed {
        return Err(ValidationError::HashMismatch {
            index: candidate.index,
            stored: candidate.hash.clone(),
            computed,
        });
    }

    if !hashing::meets_difficulty(&candidate.hash, candidate.difficulty) {
        return Err(ValidationError::InsufficientWork {
            index: candidate.index,
            difficulty: candidate.difficulty,
        });
    }

    if candidate.timestamp < previous.timestamp {
        return Err(ValidationError::TimestampRegression {
            index: candidate.index,
            timestamp: candidate.timestamp,
            parent: previous.timestamp,
        });
    }

    if candidate.merkle_root != EMPTY_MERKLE_ROOT
        && candidate.merkle_root != hashing::merkle_root(&candidate.transactions)
    {
        return Err(ValidationError::MerkleMismatch {
            index: candidate.index,
        });
    }

    Ok(())
}

/// Checks a block that reached us from a peer rather than through our own
/// mempool: it must carry some proof of work, and every transfer must pass the
/// same sender and signature checks admission control applies.
pub fn check_peer_block(block: &Block, identity: &dyn Identity) -> Result<(), ValidationError> {
    if block.difficulty == 0 {
        return Err(ValidationError::MissingWork { index: block.index });
    }
    match block.transactions.iter().find(|tx| !is_authorized(tx, identity)) {
        Some(tx) => Err(ValidationError::ForgedTransaction {
            index: block.index,
            id: tx.id(),
        }),
        None => Ok(()),
    }
}

fn is_authorized(tx: &Transaction, identity: &dyn Identity) -> bool {
    let message = Transaction::signing_message(&tx.sender, &tx.receiver, tx.amount);
    identity.derive_address(&tx.public_key) == tx.sender
        && identity.verify(&message, &tx.signature, &tx.public_key)
}

/// Boolean form of [`check_block`]; the reason is logged and discarded.
pub fn validate(candidate: &Block, previous: &Block) -> bool {
    match check_block(candidate, previous) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(index = candidate.index, error = %e, "block rejected");
            false
        }
    }
}

/// Pairwise fold of [`validate`] over a whole chain starting at genesis.
pub fn is_chain_valid(chain: &[Block]) -> bool {
    match chain.first() {
        Some(genesis) if genesis.is_genesis() => {}
        _ => return false,
    }
    chain.windows(2).all(|pair| validate(&pair[1], &pair[0]))
}
