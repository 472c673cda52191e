//! Authoritative ledger state: the chain plus every balance and stake table
//! derived from it.
//!
//! The caches are only ever changed through [`LedgerState::append`] and
//! [`LedgerState::apply_stake_op`], both of which compute the full effect
//! first and commit only on success. [`LedgerState::rebuild`] replays the
//! same history from scratch, and the two must always agree.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::blockchain::Block;
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, LedgerError, ValidationError};
use crate::validation;

/// Staking operation, journaled so rebuilds can replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum StakeOp {
    Stake {
        address: String,
        amount: u64,
    },
    Unstake {
        address: String,
        amount: u64,
    },
    Delegate {
        delegator: String,
        delegate: String,
        amount: u64,
    },
    Undelegate {
        delegator: String,
        delegate: String,
        amount: u64,
    },
}

/// A stake operation together with the chain length it was applied at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub height: u64,
    pub op: StakeOp,
}

/// Balance changes produced by settling one block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub balances: BTreeMap<String, u64>,
    pub fees: u64,
    pub reward: u64,
}

#[derive(Debug, Clone)]
pub struct LedgerState {
    params: ConsensusConfig,
    allocations: BTreeMap<String, u64>,
    chain: Vec<Block>,
    balances: BTreeMap<String, u64>,
    stakes: BTreeMap<String, u64>,
    delegated: BTreeMap<String, u64>,
    delegations: BTreeMap<String, BTreeMap<String, u64>>,
    journal: Vec<JournalEntry>,
    included: HashSet<String>,
    difficulty: u32,
}

impl LedgerState {
    /// Fresh ledger holding only the genesis block.
    pub fn new(params: ConsensusConfig, allocations: BTreeMap<String, u64>) -> Self {
        let genesis = Block::genesis(params.genesis_timestamp);
        Self {
            difficulty: params.initial_difficulty.max(1),
            balances: allocations.clone(),
            allocations,
            params,
            chain: vec![genesis],
            stakes: BTreeMap::new(),
            delegated: BTreeMap::new(),
            delegations: BTreeMap::new(),
            journal: Vec::new(),
            included: HashSet::new(),
        }
    }

    /// Replays genesis allocations, every block after genesis and the stake
    /// journal in the order they were originally applied.
    pub fn rebuild(
        params: ConsensusConfig,
        allocations: BTreeMap<String, u64>,
        chain: &[Block],
        journal: &[JournalEntry],
    ) -> Result<Self, ConsensusError> {
        let mut state = Self::new(params, allocations);
        if let Some(genesis) = chain.first() {
            if genesis != state.tip() {
                return Err(ValidationError::GenesisMismatch.into());
            }
        }

        let mut pending = journal.iter().peekable();
        let blocks = chain.iter().skip(1);
        for block in blocks {
            while let Some(entry) = pending.next_if(|e| e.height <= state.height()) {
                state.apply_stake_op(entry.op.clone())?;
            }
            state.append(block.clone())?;
        }
        for entry in pending {
            state.apply_stake_op(entry.op.clone())?;
        }
        Ok(state)
    }

    /// Whether the caches equal a from-scratch fold of the history.
    pub fn is_consistent(&self) -> bool {
        match Self::rebuild(
            self.params.clone(),
            self.allocations.clone(),
            &self.chain,
            &self.journal,
        ) {
            Ok(folded) => {
                folded.balances == self.balances
                    && folded.stakes == self.stakes
                    && folded.delegated == self.delegated
                    && folded.delegations == self.delegations
                    && folded.difficulty == self.difficulty
            }
            Err(_) => false,
        }
    }

    pub fn params(&self) -> &ConsensusConfig {
        &self.params
    }

    pub fn allocations(&self) -> &BTreeMap<String, u64> {
        &self.allocations
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn tip(&self) -> &Block {
        // The chain always holds at least genesis.
        &self.chain[self.chain.len() - 1]
    }

    /// Number of blocks, genesis included.
    pub fn height(&self) -> u64 {
        self.chain.len() as u64
    }

    /// Network difficulty for the next work-based block.
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &BTreeMap<String, u64> {
        &self.balances
    }

    pub fn stakes(&self) -> &BTreeMap<String, u64> {
        &self.stakes
    }

    pub fn delegated(&self) -> &BTreeMap<String, u64> {
        &self.delegated
    }

    pub fn delegations_of(&self, delegator: &str) -> Option<&BTreeMap<String, u64>> {
        self.delegations.get(delegator)
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        self.included.contains(id)
    }

    pub fn block_reward(&self, index: u64) -> u64 {
        self.params.block_reward(index)
    }

    /// Computes post-block balances without touching the ledger.
    pub fn settle(&self, block: &Block) -> Result<Settlement, LedgerError> {
        let fee = self.params.tx_fee;
        let mut touched: BTreeMap<String, u64> = BTreeMap::new();
        let mut fees: u64 = 0;

        for tx in &block.transactions {
            let debit = tx.amount.checked_add(fee).ok_or(LedgerError::Overflow)?;
            let available = *touched
                .entry(tx.sender.clone())
                .or_insert_with(|| self.balance(&tx.sender));
            let remaining =
                available
                    .checked_sub(debit)
                    .ok_or_else(|| LedgerError::InsufficientBalance {
                        address: tx.sender.clone(),
                        available,
                        required: debit,
                    })?;
            touched.insert(tx.sender.clone(), remaining);

            let receiver = touched
                .entry(tx.receiver.clone())
                .or_insert_with(|| self.balance(&tx.receiver));
            *receiver = receiver.checked_add(tx.amount).ok_or(LedgerError::Overflow)?;
            fees = fees.checked_add(fee).ok_or(LedgerError::Overflow)?;
        }

        let reward = self.block_reward(block.index);
        let producer = touched
            .entry(block.producer.clone())
            .or_insert_with(|| self.balance(&block.producer));
        *producer = producer
            .checked_add(reward)
            .and_then(|b| b.checked_add(fees))
            .ok_or(LedgerError::Overflow)?;

        Ok(Settlement {
            balances: touched,
            fees,
            reward,
        })
    }

    /// Validates `block` against the tip, settles it and appends it as one
    /// unit. On error nothing has changed.
    pub fn append(&mut self, block: Block) -> Result<Settlement, ConsensusError> {
        validation::check_block(&block, self.tip())?;
        let ids = self.fresh_ids(&block)?;
        let settlement = self.settle(&block)?;

        for (address, balance) in &settlement.balances {
            self.balances.insert(address.clone(), *balance);
        }
        self.included.extend(ids);
        self.chain.push(block);
        self.retarget();
        Ok(settlement)
    }

    /// Identifiers of `block`'s transactions, refusing any already in the
    /// chain or repeated within the block.
    fn fresh_ids(&self, block: &Block) -> Result<HashSet<String>, ValidationError> {
        let mut ids = HashSet::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let id = tx.id();
            if self.included.contains(&id) || ids.contains(&id) {
                return Err(ValidationError::DuplicateTransaction {
                    index: block.index,
                    id,
                });
            }
            ids.insert(id);
        }
        Ok(ids)
    }

    /// Moves the difficulty by one step every `retarget_interval` blocks,
    /// comparing the actual span of the last interval to its target span.
    fn retarget(&mut self) {
        let interval = self.params.retarget_interval;
        let tip_index = self.tip().index;
        if interval == 0 || tip_index < interval || tip_index % interval != 0 {
            return;
        }

        let first = &self.chain[(tip_index - interval) as usize];
        let actual = self.tip().timestamp.saturating_sub(first.timestamp);
        let expected = (interval * self.params.target_block_time_secs) as i64;

        let previous = self.difficulty;
        if actual < expected / 2 {
            self.difficulty = self.difficulty.saturating_add(1);
        } else if actual > expected.saturating_mul(2) && self.difficulty > 1 {
            self.difficulty -= 1;
        }
        if previous != self.difficulty {
            tracing::info!(
                index = tip_index,
                actual,
                expected,
                difficulty = self.difficulty,
                "difficulty retargeted"
            );
        }
    }

    /// Applies and journals a staking operation.
    pub fn apply_stake_op(&mut self, op: StakeOp) -> Result<(), LedgerError> {
        match &op {
            StakeOp::Stake { address, amount } => {
                nonzero(*amount)?;
                let balance = self.balance(address);
                let remaining = balance.checked_sub(*amount).ok_or_else(|| {
                    LedgerError::InsufficientBalance {
                        address: address.clone(),
                        available: balance,
                        required: *amount,
                    }
                })?;
                let staked = add(self.stakes.get(address), *amount)?;
                self.balances.insert(address.clone(), remaining);
                self.stakes.insert(address.clone(), staked);
            }
            StakeOp::Unstake { address, amount } => {
                nonzero(*amount)?;
                let staked = self.stakes.get(address).copied().unwrap_or(0);
                let left = staked.checked_sub(*amount).ok_or_else(|| {
                    LedgerError::InsufficientStake {
                        address: address.clone(),
                        available: staked,
                        required: *amount,
                    }
                })?;
                let balance = add(self.balances.get(address), *amount)?;
                set_or_remove(&mut self.stakes, address, left);
                self.balances.insert(address.clone(), balance);
            }
            StakeOp::Delegate {
                delegator,
                delegate,
                amount,
            } => {
                nonzero(*amount)?;
                let balance = self.balance(delegator);
                let remaining = balance.checked_sub(*amount).ok_or_else(|| {
                    LedgerError::InsufficientBalance {
                        address: delegator.clone(),
                        available: balance,
                        required: *amount,
                    }
                })?;
                let backing = add(self.delegated.get(delegate), *amount)?;
                let edge = add(
                    self.delegations
                        .get(delegator)
                        .and_then(|m| m.get(delegate)),
                    *amount,
                )?;
                self.balances.insert(delegator.clone(), remaining);
                self.delegated.insert(delegate.clone(), backing);
                self.delegations
                    .entry(delegator.clone())
                    .or_default()
                    .insert(delegate.clone(), edge);
            }
            StakeOp::Undelegate {
                delegator,
                delegate,
                amount,
            } => {
                nonzero(*amount)?;
                let edge = self
                    .delegations
                    .get(delegator)
                    .and_then(|m| m.get(delegate))
                    .copied()
                    .unwrap_or(0);
                let left = edge.checked_sub(*amount).ok_or_else(|| {
                    LedgerError::UnknownDelegation {
                        delegator: delegator.clone(),
                        delegate: delegate.clone(),
                        amount: *amount,
                    }
                })?;
                let backing = self.delegated.get(delegate).copied().unwrap_or(0);
                let balance = add(self.balances.get(delegator), *amount)?;

                set_or_remove(&mut self.delegated, delegate, backing.saturating_sub(*amount));
                if let Some(edges) = self.delegations.get_mut(delegator) {
                    set_or_remove(edges, delegate, left);
                    if edges.is_empty() {
                        self.delegations.remove(delegator);
                    }
                }
                self.balances.insert(delegator.clone(), balance);
            }
        }

        self.journal.push(JournalEntry {
            height: self.height(),
            op,
        });
        Ok(())
    }
}

fn nonzero(amount: u64) -> Result<(), LedgerError> {
    if amount == 0 {
        Err(LedgerError::ZeroAmount)
    } else {
        Ok(())
    }
}

fn add(current: Option<&u64>, amount: u64) -> Result<u64, LedgerError> {
    current
        .copied()
        .unwrap_or(0)
        .checked_add(amount)
        .ok_or(LedgerError::Overflow)
}

fn set_or_remove(map: &mut BTreeMap<String, u64>, key: &str, value: u64) {
    if value == 0 {
        map.remove(key);
    } else {
        map.insert(key.to_string(), value);
    }
}
