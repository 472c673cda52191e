//! Delegate confirmation for blocks produced in delegate mode.
//!
//! A block is confirmed only when signed acknowledgements from distinct,
//! known delegates strictly exceed the configured fraction of all known
//! delegates. With no acknowledgements, or no delegates, confirmation fails.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::blockchain::Block;
use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::identity::{Identity, Keypair};

/// A delegate's signature over a candidate block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateAck {
    pub delegate: String,
    pub public_key: String,
    pub signature: String,
}

impl DelegateAck {
    pub fn message(block_hash: &str) -> Vec<u8> {
        format!("ack:{block_hash}").into_bytes()
    }

    pub fn sign(keypair: &Keypair, block_hash: &str) -> Self {
        Self {
            delegate: keypair.address().to_string(),
            public_key: keypair.public_key(),
            signature: keypair.sign(&Self::message(block_hash)),
        }
    }
}

/// Strict super-majority threshold, `acks / known > numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumPolicy {
    pub numerator: u64,
    pub denominator: u64,
}

impl QuorumPolicy {
    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self {
            numerator: config.quorum_numerator,
            denominator: config.quorum_denominator.max(1),
        }
    }

    pub fn is_met(&self, acks: usize, known: usize) -> bool {
        known > 0 && (acks as u128) * u128::from(self.denominator) > (known as u128) * u128::from(self.numerator)
    }
}

/// Source of acknowledgements for a sealed candidate.
pub trait AckSource: Send + Sync {
    fn request_acks(&self, block: &Block, delegates: &[String]) -> Vec<DelegateAck>;
}

/// Collects nothing, so delegate-mode production fails closed.
#[derive(Debug, Default)]
pub struct NoAcks;

impl AckSource for NoAcks {
    fn request_acks(&self, _block: &Block, _delegates: &[String]) -> Vec<DelegateAck> {
        Vec::new()
    }
}

/// Signs on behalf of delegate keys held by this process.
#[derive(Debug, Default)]
pub struct LocalSigners {
    keys: Vec<Keypair>,
}

impl LocalSigners {
    pub fn new(keys: Vec<Keypair>) -> Self {
        Self { keys }
    }
}

impl AckSource for LocalSigners {
    fn request_acks(&self, block: &Block, delegates: &[String]) -> Vec<DelegateAck> {
        self.keys
            .iter()
            .filter(|key| delegates.iter().any(|d| d == key.address()))
            .map(|key| DelegateAck::sign(key, &block.hash))
            .collect()
    }
}

/// Counts acknowledgements that are well-formed, signed by the claimed
/// delegate and come from a distinct known delegate.
pub fn count_valid_acks(
    block_hash: &str,
    acks: &[DelegateAck],
    delegates: &BTreeMap<String, u64>,
    identity: &dyn Identity,
) -> usize {
    let message = DelegateAck::message(block_hash);
    let mut signers = BTreeSet::new();
    for ack in acks {
        if !delegates.get(&ack.delegate).is_some_and(|stake| *stake > 0) {
            continue;
        }
        if identity.derive_address(&ack.public_key) != ack.delegate {
            continue;
        }
        if !identity.verify(&message, &ack.signature, &ack.public_key) {
            continue;
        }
        signers.insert(ack.delegate.as_str());
    }
    signers.len()
}

/// Confirms `block` against the delegate set, returning the number of valid
/// acknowledgements.
pub fn confirm(
    block: &Block,
    acks: &[DelegateAck],
    delegates: &BTreeMap<String, u64>,
    policy: QuorumPolicy,
    identity: &dyn Identity,
) -> Result<usize, ConsensusError> {
    let known = delegates.values().filter(|stake| **stake > 0).count();
    let valid = count_valid_acks(&block.hash, acks, delegates, identity);
    if policy.is_met(valid, known) {
        Ok(valid)
    } else {
        tracing::warn!(index = block.index, valid, known, "delegate quorum not reached");
        Err(ConsensusError::QuorumUnreachable { acks: valid, known })
    }
}
