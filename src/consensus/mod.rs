//! Block production and acceptance over one shared ledger.
//!
//! [`Engine`] owns the ledger and mempool behind a single mutex. Production
//! snapshots what it needs under the lock, seals outside it, then re-locks to
//! commit only if the tip has not moved in the meantime.

pub mod fork;
pub mod pow;
pub mod quorum;
pub mod stake;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::blockchain::{Block, ContentRecord, Transaction};
use crate::config::{ConsensusMode, NodeConfig};
use crate::error::{AdmissionError, ConsensusError, LedgerError};
use crate::identity::Identity;
use crate::ledger::{LedgerState, StakeOp};
use crate::mempool::Mempool;
use crate::storage::ChainStore;
use crate::validation;

use self::fork::ForkDecision;
use self::quorum::{AckSource, NoAcks, QuorumPolicy};

/// What happened to a peer-supplied block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Appended,
    /// Identical to the local block at that index.
    Known,
    /// Skips past the local tip; the sender is ahead of us.
    Ahead { local_height: u64 },
    /// Conflicts with the local chain at or below the tip.
    Forked,
}

struct ChainState {
    ledger: LedgerState,
    mempool: Mempool,
}

pub struct Engine {
    state: Mutex<ChainState>,
    identity: Arc<dyn Identity>,
    mode: ConsensusMode,
    /// Bumped on every change of tip; running searches watch it.
    epoch: AtomicU64,
    acks: Box<dyn AckSource>,
    store: Option<Box<dyn ChainStore>>,
}

impl Engine {
    /// In-memory engine starting from genesis.
    pub fn new(config: &NodeConfig, identity: Arc<dyn Identity>) -> Self {
        let ledger = LedgerState::new(config.consensus.clone(), config.allocations.clone());
        Self::from_ledger(config, ledger, identity, None)
    }

    /// Engine restored from `store`, or seeded with genesis if it is empty.
    pub fn with_store(
        config: &NodeConfig,
        identity: Arc<dyn Identity>,
        store: Box<dyn ChainStore>,
    ) -> Result<Self, ConsensusError> {
        let chain = store.load()?;
        let journal = store.load_journal()?;
        let ledger = if chain.is_empty() {
            LedgerState::new(config.consensus.clone(), config.allocations.clone())
        } else {
            LedgerState::rebuild(
                config.consensus.clone(),
                config.allocations.clone(),
                &chain,
                &journal,
            )?
        };
        tracing::info!(height = ledger.height(), journal = journal.len(), "chain restored");
        let engine = Self::from_ledger(config, ledger, identity, Some(store));
        engine.persist();
        Ok(engine)
    }

    fn from_ledger(
        config: &NodeConfig,
        ledger: LedgerState,
        identity: Arc<dyn Identity>,
        store: Option<Box<dyn ChainStore>>,
    ) -> Self {
        Self {
            state: Mutex::new(ChainState {
                ledger,
                mempool: Mempool::new(&config.mempool),
            }),
            identity,
            mode: config.consensus.mode,
            epoch: AtomicU64::new(0),
            acks: Box::new(NoAcks),
            store,
        }
    }

    pub fn with_ack_source(mut self, acks: Box<dyn AckSource>) -> Self {
        self.acks = acks;
        self
    }

    pub fn mode(&self) -> ConsensusMode {
        self.mode
    }

    pub fn identity(&self) -> &dyn Identity {
        self.identity.as_ref()
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<String, AdmissionError> {
        let mut state = self.state.lock();
        let ChainState { ledger, mempool } = &mut *state;
        mempool.submit_transaction(tx, ledger, self.identity.as_ref())
    }

    pub fn submit_content(&self, record: ContentRecord) {
        self.state.lock().mempool.submit_content(record);
    }

    pub fn stake(&self, address: &str, amount: u64) -> Result<(), LedgerError> {
        self.apply_stake_op(StakeOp::Stake {
            address: address.to_string(),
            amount,
        })
    }

    pub fn unstake(&self, address: &str, amount: u64) -> Result<(), LedgerError> {
        self.apply_stake_op(StakeOp::Unstake {
            address: address.to_string(),
            amount,
        })
    }

    pub fn delegate(&self, delegator: &str, delegate: &str, amount: u64) -> Result<(), LedgerError> {
        self.apply_stake_op(StakeOp::Delegate {
            delegator: delegator.to_string(),
            delegate: delegate.to_string(),
            amount,
        })
    }

    pub fn undelegate(&self, delegator: &str, delegate: &str, amount: u64) -> Result<(), LedgerError> {
        self.apply_stake_op(StakeOp::Undelegate {
            delegator: delegator.to_string(),
            delegate: delegate.to_string(),
            amount,
        })
    }

    fn apply_stake_op(&self, op: StakeOp) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let ChainState { ledger, mempool } = &mut *state;
        ledger.apply_stake_op(op.clone())?;
        // Locked funds may leave pending transfers uncovered.
        mempool.revalidate(ledger);
        tracing::info!(?op, "stake operation applied");

        if let Some(store) = &self.store {
            if let Err(e) = store.save_journal(ledger.journal()) {
                tracing::error!(error = %e, "failed to persist stake journal");
            }
        }
        Ok(())
    }

    /// Drains the mempool into a new block under the configured mode and
    /// appends it. `miner` is credited in work mode; the stake and delegate
    /// modes credit whoever the lottery elects.
    pub fn produce_block(&self, miner: &str) -> Result<Block, ConsensusError> {
        let (mut block, delegates, policy, started_at) = {
            let state = self.state.lock();
            if state.mempool.is_empty() {
                return Err(ConsensusError::EmptyMempool);
            }
            let ledger = &state.ledger;
            let (producer, difficulty, delegates) = match self.mode {
                ConsensusMode::Work => (miner.to_string(), ledger.difficulty(), None),
                ConsensusMode::Stake => {
                    let leader = stake::elect(ledger.stakes(), &mut rand::thread_rng())?;
                    (leader, 1, None)
                }
                ConsensusMode::Delegate => {
                    let delegates = ledger.delegated().clone();
                    let leader = stake::elect(&delegates, &mut rand::thread_rng())?;
                    (leader, 1, Some(delegates))
                }
            };
            let (transactions, contents) = state.mempool.snapshot();
            let block = Block::candidate(ledger.tip(), producer, difficulty, transactions, contents);
            let policy = QuorumPolicy::from_config(ledger.params());
            (block, delegates, policy, self.epoch.load(Ordering::Acquire))
        };

        tracing::info!(
            mode = %self.mode,
            index = block.index,
            producer = %block.producer,
            difficulty = block.difficulty,
            transactions = block.transactions.len(),
            "producing block"
        );
        pow::mine(&mut block, &self.epoch, started_at)?;

        if let Some(delegates) = delegates {
            let names: Vec<String> = delegates.keys().cloned().collect();
            let acks = self.acks.request_acks(&block, &names);
            quorum::confirm(&block, &acks, &delegates, policy, self.identity.as_ref())?;
        }

        let mut state = self.state.lock();
        if self.epoch.load(Ordering::Acquire) != started_at
            || state.ledger.tip().hash != block.previous_hash
        {
            return Err(ConsensusError::StaleTip);
        }
        self.commit(&mut state, block.clone())?;
        Ok(block)
    }

    /// Validates a peer-supplied block against the local chain and appends it
    /// if it extends the tip.
    pub fn accept_block(&self, block: Block) -> Result<BlockOutcome, ConsensusError> {
        let mut state = self.state.lock();
        let height = state.ledger.height();
        if block.index < height {
            let local = &state.ledger.chain()[block.index as usize];
            return Ok(if local.hash == block.hash {
                BlockOutcome::Known
            } else {
                BlockOutcome::Forked
            });
        }
        if block.index > height {
            return Ok(BlockOutcome::Ahead {
                local_height: height,
            });
        }
        if block.previous_hash != state.ledger.tip().hash {
            return Ok(BlockOutcome::Forked);
        }

        validation::check_peer_block(&block, self.identity.as_ref())?;
        // A peer block at our next index supersedes any local search.
        self.cancel_mining();
        self.commit(&mut state, block)?;
        Ok(BlockOutcome::Appended)
    }

    fn commit(&self, state: &mut ChainState, block: Block) -> Result<(), ConsensusError> {
        let ChainState { ledger, mempool } = state;
        let settlement = ledger.append(block)?;
        let tip = ledger.tip();
        mempool.reconcile(tip, ledger);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        tracing::info!(
            index = tip.index,
            hash = %tip.hash,
            producer = %tip.producer,
            reward = settlement.reward,
            fees = settlement.fees,
            "block appended"
        );
        self.save(ledger);
        Ok(())
    }

    /// Replaces the local chain with `candidate` if fork choice prefers it.
    /// Returns whether the candidate was adopted.
    pub fn resolve_fork(&self, candidate: Vec<Block>) -> Result<bool, ConsensusError> {
        let mut state = self.state.lock();
        let ChainState { ledger, mempool } = &mut *state;
        match fork::choose(ledger.chain(), &candidate) {
            ForkDecision::KeepLocal(reason) => {
                tracing::debug!(reason, candidate = candidate.len(), "fork declined");
                Ok(false)
            }
            ForkDecision::Adopt => {
                let local = ledger.chain();
                for (index, block) in candidate.iter().enumerate().skip(1) {
                    if local.get(index).is_some_and(|ours| ours.hash == block.hash) {
                        continue;
                    }
                    validation::check_peer_block(block, self.identity.as_ref())?;
                }
                let rebuilt = LedgerState::rebuild(
                    ledger.params().clone(),
                    ledger.allocations().clone(),
                    &candidate,
                    ledger.journal(),
                )?;
                tracing::warn!(
                    from = ledger.height(),
                    to = rebuilt.height(),
                    "adopting heavier chain"
                );
                *ledger = rebuilt;
                mempool.revalidate(ledger);
                self.epoch.fetch_add(1, Ordering::AcqRel);
                self.save(ledger);
                Ok(true)
            }
        }
    }

    /// Aborts any running nonce search.
    pub fn cancel_mining(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Writes the chain and stake journal to the store. In-memory state stays
    /// authoritative whatever the outcome.
    pub fn persist(&self) -> bool {
        let state = self.state.lock();
        self.save(&state.ledger)
    }

    fn save(&self, ledger: &LedgerState) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let result = store
            .save(ledger.chain())
            .and_then(|()| store.save_journal(ledger.journal()));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, height = ledger.height(), "failed to persist chain");
                false
            }
        }
    }

    /// Chain length, genesis included.
    pub fn height(&self) -> u64 {
        self.state.lock().ledger.height()
    }

    pub fn tip(&self) -> Block {
        self.state.lock().ledger.tip().clone()
    }

    pub fn hash_at(&self, index: u64) -> Option<String> {
        let state = self.state.lock();
        let index = usize::try_from(index).ok()?;
        state.ledger.chain().get(index).map(|block| block.hash.clone())
    }

    /// Blocks from `index` to the tip.
    pub fn chain_from(&self, index: u64) -> Vec<Block> {
        let state = self.state.lock();
        let chain = state.ledger.chain();
        let start = usize::try_from(index).unwrap_or(usize::MAX).min(chain.len());
        chain[start..].to_vec()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.state.lock().ledger.balance(address)
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().mempool.transactions().to_vec()
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().mempool.is_empty()
    }

    /// Read access to the ledger under the engine lock.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        f(&self.state.lock().ledger)
    }

    pub fn is_chain_valid(&self) -> bool {
        validation::is_chain_valid(self.state.lock().ledger.chain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::COIN;
    use crate::config::ConsensusConfig;
    use crate::error::ValidationError;
    use crate::identity::{Ed25519Identity, Keypair};
    use crate::storage::SledStore;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn config(mode: ConsensusMode, funded: &[(&Keypair, u64)]) -> NodeConfig {
        NodeConfig {
            consensus: ConsensusConfig {
                mode,
                initial_difficulty: 1,
                genesis_timestamp: 0,
                ..ConsensusConfig::default()
            },
            allocations: funded
                .iter()
                .map(|(k, amount)| (k.address().to_string(), *amount))
                .collect::<BTreeMap<_, _>>(),
            ..NodeConfig::default()
        }
    }

    fn engine(config: &NodeConfig) -> Engine {
        Engine::new(config, Arc::new(Ed25519Identity))
    }

    #[test]
    fn work_mode_settles_transfer() {
        let alice = Keypair::from_label("alice");
        let bob = Keypair::from_label("bob");
        let config = config(ConsensusMode::Work, &[(&alice, 50 * COIN), (&bob, 50 * COIN)]);
        let engine = engine(&config);

        engine
            .submit_transaction(Transaction::signed(&alice, bob.address(), 10 * COIN))
            .unwrap();
        let block = engine.produce_block("miner").unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(engine.balance(alice.address()), 39 * COIN);
        assert_eq!(engine.balance(bob.address()), 60 * COIN);
        assert_eq!(engine.balance("miner"), 2 * COIN);
        assert!(!engine.has_pending());
        assert!(engine.is_chain_valid());
        assert!(engine.with_ledger(LedgerState::is_consistent));
    }

    #[test]
    fn empty_mempool_cannot_produce() {
        let engine = engine(&config(ConsensusMode::Work, &[]));
        assert!(matches!(
            engine.produce_block("miner"),
            Err(ConsensusError::EmptyMempool)
        ));
        assert_eq!(engine.height(), 1);
    }

    #[test]
    fn stake_mode_rewards_elected_staker() {
        let alice = Keypair::from_label("alice");
        let engine = engine(&config(ConsensusMode::Stake, &[(&alice, 50 * COIN)]));
        engine.stake(alice.address(), 20 * COIN).unwrap();
        engine
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();

        let block = engine.produce_block("ignored").unwrap();
        assert_eq!(block.producer, alice.address());
        assert_eq!(block.difficulty, 1);
        // 50 - 20 staked - 1 sent - 1 fee + 1 reward + 1 fee
        assert_eq!(engine.balance(alice.address()), 30 * COIN);
    }

    #[test]
    fn stake_mode_without_stake_fails() {
        let alice = Keypair::from_label("alice");
        let engine = engine(&config(ConsensusMode::Stake, &[(&alice, 50 * COIN)]));
        engine
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();
        assert!(matches!(
            engine.produce_block("miner"),
            Err(ConsensusError::NoEligibleProducer)
        ));
        assert_eq!(engine.pending_transactions().len(), 1);
    }

    #[test]
    fn delegate_mode_fails_closed_without_acks() {
        let alice = Keypair::from_label("alice");
        let engine = engine(&config(ConsensusMode::Delegate, &[(&alice, 50 * COIN)]));
        engine.delegate(alice.address(), alice.address(), 10 * COIN).unwrap();
        engine
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();
        assert!(matches!(
            engine.produce_block("miner"),
            Err(ConsensusError::QuorumUnreachable { acks: 0, known: 1 })
        ));
        assert_eq!(engine.height(), 1);
    }

    #[test]
    fn delegate_mode_appends_with_quorum() {
        let alice = Keypair::from_label("alice");
        let d1 = Keypair::from_label("d1");
        let d2 = Keypair::from_label("d2");
        let config = config(ConsensusMode::Delegate, &[(&alice, 50 * COIN)]);
        let engine = engine(&config)
            .with_ack_source(Box::new(quorum::LocalSigners::new(vec![d1.clone(), d2.clone()])));
        engine.delegate(alice.address(), d1.address(), 10 * COIN).unwrap();
        engine.delegate(alice.address(), d2.address(), 5 * COIN).unwrap();
        engine
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();

        let block = engine.produce_block("miner").unwrap();
        assert!(block.producer == d1.address() || block.producer == d2.address());
        assert_eq!(engine.height(), 2);
    }

    #[test]
    fn peer_blocks_are_classified() {
        let alice = Keypair::from_label("alice");
        let config = config(ConsensusMode::Work, &[(&alice, 50 * COIN)]);
        let producer = engine(&config);
        let follower = engine(&config);

        producer
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();
        let first = producer.produce_block("miner").unwrap();
        producer
            .submit_transaction(Transaction::signed(&alice, "carol", COIN))
            .unwrap();
        let second = producer.produce_block("miner").unwrap();

        assert_eq!(
            follower.accept_block(second.clone()).unwrap(),
            BlockOutcome::Ahead { local_height: 1 }
        );
        assert_eq!(follower.accept_block(first.clone()).unwrap(), BlockOutcome::Appended);
        assert_eq!(follower.accept_block(first).unwrap(), BlockOutcome::Known);
        assert_eq!(follower.accept_block(second).unwrap(), BlockOutcome::Appended);
        assert_eq!(follower.tip(), producer.tip());
    }

    #[test]
    fn tampered_peer_block_is_rejected() {
        let alice = Keypair::from_label("alice");
        let config = config(ConsensusMode::Work, &[(&alice, 50 * COIN)]);
        let producer = engine(&config);
        let follower = engine(&config);
        producer
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();
        let mut block = producer.produce_block("miner").unwrap();
        block.producer = "mallory".into();

        assert!(matches!(
            follower.accept_block(block),
            Err(ConsensusError::Validation(_))
        ));
        assert_eq!(follower.height(), 1);
    }

    fn sealed(mut block: Block) -> Block {
        loop {
            block.hash = block.compute_hash();
            if crate::hashing::meets_difficulty(&block.hash, block.difficulty) {
                return block;
            }
            block.nonce += 1;
        }
    }

    #[test]
    fn peer_block_replaying_included_transaction_is_rejected() {
        let alice = Keypair::from_label("alice");
        let bob = Keypair::from_label("bob");
        let config = config(ConsensusMode::Work, &[(&alice, 50 * COIN), (&bob, 10 * COIN)]);
        let producer = engine(&config);
        let follower = engine(&config);

        let tx = Transaction::signed(&alice, bob.address(), 10 * COIN);
        producer.submit_transaction(tx.clone()).unwrap();
        let first = producer.produce_block("miner").unwrap();
        assert_eq!(follower.accept_block(first.clone()).unwrap(), BlockOutcome::Appended);

        let replay = sealed(Block::candidate(&first, "mallory".into(), 1, vec![tx], vec![]));
        assert!(matches!(
            follower.accept_block(replay),
            Err(ConsensusError::Validation(ValidationError::DuplicateTransaction { index: 2, .. }))
        ));
        assert_eq!(follower.height(), 2);
        assert_eq!(follower.balance(alice.address()), 39 * COIN);
        assert_eq!(follower.balance(bob.address()), 20 * COIN);
        assert_eq!(follower.balance("mallory"), 0);
    }

    #[test]
    fn peer_block_with_forged_transfer_is_rejected() {
        let alice = Keypair::from_label("alice");
        let follower = engine(&config(ConsensusMode::Work, &[(&alice, 50 * COIN)]));
        let forged = Transaction {
            sender: alice.address().to_string(),
            receiver: "mallory".into(),
            amount: 40 * COIN,
            signature: "00".into(),
            public_key: "00".into(),
        };
        let block = sealed(Block::candidate(&follower.tip(), "mallory".into(), 1, vec![forged], vec![]));

        assert!(matches!(
            follower.accept_block(block),
            Err(ConsensusError::Validation(ValidationError::ForgedTransaction { index: 1, .. }))
        ));
        assert_eq!(follower.height(), 1);
        assert_eq!(follower.balance(alice.address()), 50 * COIN);
        assert_eq!(follower.balance("mallory"), 0);
    }

    #[test]
    fn peer_block_without_work_is_rejected() {
        let alice = Keypair::from_label("alice");
        let follower = engine(&config(ConsensusMode::Work, &[(&alice, 50 * COIN)]));
        let tx = Transaction::signed(&alice, "bob", COIN);
        let block = sealed(Block::candidate(&follower.tip(), "mallory".into(), 0, vec![tx], vec![]));
        assert!(matches!(
            follower.accept_block(block),
            Err(ConsensusError::Validation(ValidationError::MissingWork { index: 1 }))
        ));
        assert_eq!(follower.height(), 1);
    }

    #[test]
    fn heavier_fork_with_forged_transfer_is_refused() {
        let alice = Keypair::from_label("alice");
        let config = config(ConsensusMode::Work, &[(&alice, 50 * COIN)]);
        let local = engine(&config);
        local
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();
        local.produce_block("local-miner").unwrap();

        let genesis = local.chain_from(0)[0].clone();
        let forged = Transaction {
            sender: alice.address().to_string(),
            receiver: "mallory".into(),
            amount: 40 * COIN,
            signature: "00".into(),
            public_key: "00".into(),
        };
        let p1 = sealed(Block::candidate(&genesis, "mallory".into(), 1, vec![forged], vec![]));
        let p2 = sealed(Block::candidate(&p1, "mallory".into(), 1, vec![], vec![]));

        assert!(matches!(
            local.resolve_fork(vec![genesis, p1, p2]),
            Err(ConsensusError::Validation(ValidationError::ForgedTransaction { index: 1, .. }))
        ));
        assert_eq!(local.height(), 2);
        assert_eq!(local.balance("mallory"), 0);
    }

    #[test]
    fn heavier_fork_replaces_local_chain() {
        let alice = Keypair::from_label("alice");
        let config = config(ConsensusMode::Work, &[(&alice, 50 * COIN)]);
        let local = engine(&config);
        let remote = engine(&config);

        local
            .submit_transaction(Transaction::signed(&alice, "bob", COIN))
            .unwrap();
        let ours = local.produce_block("local-miner").unwrap();
        for receiver in ["carol", "dave"] {
            remote
                .submit_transaction(Transaction::signed(&alice, receiver, COIN))
                .unwrap();
            remote.produce_block("remote-miner").unwrap();
        }

        let theirs = remote.chain_from(0);
        assert_eq!(local.accept_block(theirs[1].clone()).unwrap(), BlockOutcome::Forked);
        assert!(!local.resolve_fork(vec![theirs[0].clone()]).unwrap());
        assert!(local.resolve_fork(theirs).unwrap());
        assert_eq!(local.tip(), remote.tip());
        assert_eq!(local.balance("local-miner"), 0);
        assert_eq!(local.balance("remote-miner"), 4 * COIN);
        assert_ne!(local.tip().hash, ours.hash);
    }

    #[test]
    fn restores_chain_and_journal_from_store() {
        let alice = Keypair::from_label("alice");
        let config = config(ConsensusMode::Work, &[(&alice, 50 * COIN)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let path = path.to_str().unwrap();

        {
            let store = SledStore::open(path).unwrap();
            let engine = Engine::with_store(&config, Arc::new(Ed25519Identity), Box::new(store)).unwrap();
            engine.stake(alice.address(), 5 * COIN).unwrap();
            engine
                .submit_transaction(Transaction::signed(&alice, "bob", COIN))
                .unwrap();
            engine.produce_block("miner").unwrap();
            assert!(engine.persist());
        }

        let store = SledStore::open(path).unwrap();
        let engine = Engine::with_store(&config, Arc::new(Ed25519Identity), Box::new(store)).unwrap();
        assert_eq!(engine.height(), 2);
        assert_eq!(engine.balance(alice.address()), 43 * COIN);
        assert_eq!(
            engine.with_ledger(|l| l.stakes().get(alice.address()).copied()),
            Some(5 * COIN)
        );
    }

    #[test]
    fn persist_without_store_reports_failure() {
        assert!(!engine(&config(ConsensusMode::Work, &[])).persist());
    }
}
