//! Pending transactions and content, and the admission checks that gate them.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::blockchain::{Block, ContentRecord, Transaction};
use crate::config::MempoolConfig;
use crate::error::AdmissionError;
use crate::identity::Identity;
use crate::ledger::LedgerState;

/// Recently seen transaction identifiers.
///
/// Bounded: once `capacity` identifiers are held the least recently seen is
/// forgotten. Identifiers already included in the chain are additionally
/// refused by the ledger's own index, so eviction only reopens replays of
/// transactions that never made it into a block.
pub struct ReplayGuard {
    seen: LruCache<String, ()>,
}

impl ReplayGuard {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Records `id`, returning `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.get(id).is_some() {
            return false;
        }
        self.seen.put(id.to_string(), ());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

pub struct Mempool {
    transactions: Vec<Transaction>,
    contents: Vec<ContentRecord>,
    replay: ReplayGuard,
}

impl Mempool {
    pub fn new(config: &MempoolConfig) -> Self {
        Self {
            transactions: Vec::new(),
            contents: Vec::new(),
            replay: ReplayGuard::new(config.replay_capacity),
        }
    }

    /// Admission control for a transfer.
    ///
    /// The identifier is recorded before any other check, so a rejected
    /// transaction cannot be resubmitted either.
    pub fn submit_transaction(
        &mut self,
        tx: Transaction,
        ledger: &LedgerState,
        identity: &dyn Identity,
    ) -> Result<String, AdmissionError> {
        let id = tx.id();
        if ledger.contains_transaction(&id) || !self.replay.insert(&id) {
            return Err(AdmissionError::Duplicate(id));
        }

        let expected = identity.derive_address(&tx.public_key);
        if expected != tx.sender {
            return Err(AdmissionError::AddressMismatch {
                sender: tx.sender,
                expected,
            });
        }

        let message = Transaction::signing_message(&tx.sender, &tx.receiver, tx.amount);
        if !identity.verify(&message, &tx.signature, &tx.public_key) {
            return Err(AdmissionError::InvalidSignature(tx.sender));
        }

        let fee = ledger.params().tx_fee;
        let required = tx.amount.saturating_add(fee);
        let spendable = ledger
            .balance(&tx.sender)
            .saturating_sub(self.pending_outgoing(&tx.sender, fee));
        if spendable < required {
            return Err(AdmissionError::InsufficientBalance {
                address: tx.sender,
                spendable,
                required,
            });
        }

        tracing::debug!(id = %id, sender = %tx.sender, amount = tx.amount, "transaction admitted");
        self.transactions.push(tx);
        Ok(id)
    }

    /// Content uploads carry no settlement effect and are queued as-is.
    pub fn submit_content(&mut self, record: ContentRecord) {
        tracing::debug!(filename = %record.filename, uploader = %record.uploader, "content queued");
        self.contents.push(record);
    }

    /// Amount plus fees already committed by `address` in pending transfers.
    pub fn pending_outgoing(&self, address: &str, fee: u64) -> u64 {
        self.transactions
            .iter()
            .filter(|tx| tx.sender == address)
            .fold(0u64, |acc, tx| {
                acc.saturating_add(tx.amount).saturating_add(fee)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.contents.is_empty()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn contents(&self) -> &[ContentRecord] {
        &self.contents
    }

    /// Copy of everything pending, in arrival order.
    pub fn snapshot(&self) -> (Vec<Transaction>, Vec<ContentRecord>) {
        (self.transactions.clone(), self.contents.clone())
    }

    /// Drops what `block` included and any transfer the ledger can no longer
    /// cover. Called only after `block` has been appended.
    pub fn reconcile(&mut self, block: &Block, ledger: &LedgerState) {
        self.transactions.retain(|tx| !block.transactions.contains(tx));
        self.contents.retain(|c| !block.contents.contains(c));
        self.revalidate(ledger);
    }

    /// Re-checks pending transfers against `ledger` after balances moved for
    /// a reason other than a single append (stake locks, adopted forks).
    pub fn revalidate(&mut self, ledger: &LedgerState) {
        let fee = ledger.params().tx_fee;
        let mut committed: HashMap<String, u64> = HashMap::new();
        self.transactions.retain(|tx| {
            if ledger.contains_transaction(&tx.id()) {
                return false;
            }
            let spent = committed.entry(tx.sender.clone()).or_insert(0);
            let after = spent.saturating_add(tx.amount).saturating_add(fee);
            if after > ledger.balance(&tx.sender) {
                tracing::warn!(id = %tx.id(), sender = %tx.sender, "dropping unaffordable pending transaction");
                return false;
            }
            *spent = after;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::COIN;
    use crate::config::ConsensusConfig;
    use crate::identity::{Ed25519Identity, Keypair};
    use std::collections::BTreeMap;

    fn ledger_with(address: &str, balance: u64) -> LedgerState {
        LedgerState::new(
            ConsensusConfig::default(),
            BTreeMap::from([(address.to_string(), balance)]),
        )
    }

    fn mempool() -> Mempool {
        Mempool::new(&MempoolConfig::default())
    }

    #[test]
    fn admits_valid_transfer() {
        let alice = Keypair::from_label("alice");
        let ledger = ledger_with(alice.address(), 50 * COIN);
        let mut pool = mempool();
        let tx = Transaction::signed(&alice, "bob", 10 * COIN);
        let id = pool.submit_transaction(tx.clone(), &ledger, &Ed25519Identity).unwrap();
        assert_eq!(id, tx.id());
        assert_eq!(pool.transactions(), &[tx]);
    }

    #[test]
    fn replay_is_rejected_by_identifier() {
        let alice = Keypair::from_label("alice");
        let ledger = ledger_with(alice.address(), 50 * COIN);
        let mut pool = mempool();
        let tx = Transaction::signed(&alice, "bob", 10 * COIN);
        pool.submit_transaction(tx.clone(), &ledger, &Ed25519Identity).unwrap();
        assert_eq!(
            pool.submit_transaction(tx.clone(), &ledger, &Ed25519Identity),
            Err(AdmissionError::Duplicate(tx.id()))
        );
        assert_eq!(pool.transactions().len(), 1);
    }

    #[test]
    fn rejected_transaction_still_burns_identifier() {
        let alice = Keypair::from_label("alice");
        let ledger = ledger_with(alice.address(), 5 * COIN);
        let mut pool = mempool();
        let tx = Transaction::signed(&alice, "bob", 10 * COIN);
        assert!(matches!(
            pool.submit_transaction(tx.clone(), &ledger, &Ed25519Identity),
            Err(AdmissionError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            pool.submit_transaction(tx, &ledger, &Ed25519Identity),
            Err(AdmissionError::Duplicate(_))
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn sender_must_match_public_key() {
        let alice = Keypair::from_label("alice");
        let mallory = Keypair::from_label("mallory");
        let ledger = ledger_with(alice.address(), 50 * COIN);
        let mut pool = mempool();
        let mut tx = Transaction::signed(&alice, "bob", COIN);
        tx.public_key = mallory.public_key();
        assert!(matches!(
            pool.submit_transaction(tx, &ledger, &Ed25519Identity),
            Err(AdmissionError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn forged_signature_is_rejected() {
        let alice = Keypair::from_label("alice");
        let ledger = ledger_with(alice.address(), 50 * COIN);
        let mut pool = mempool();
        let mut tx = Transaction::signed(&alice, "bob", COIN);
        tx.amount = 2 * COIN;
        assert_eq!(
            pool.submit_transaction(tx, &ledger, &Ed25519Identity),
            Err(AdmissionError::InvalidSignature(alice.address().to_string()))
        );
    }

    #[test]
    fn pending_spends_count_against_balance() {
        let alice = Keypair::from_label("alice");
        let ledger = ledger_with(alice.address(), 25 * COIN);
        let mut pool = mempool();
        pool.submit_transaction(Transaction::signed(&alice, "bob", 10 * COIN), &ledger, &Ed25519Identity)
            .unwrap();
        pool.submit_transaction(Transaction::signed(&alice, "carol", 10 * COIN), &ledger, &Ed25519Identity)
            .unwrap();
        assert!(matches!(
            pool.submit_transaction(Transaction::signed(&alice, "dave", 3 * COIN), &ledger, &Ed25519Identity),
            Err(AdmissionError::InsufficientBalance { spendable, .. }) if spendable == 3 * COIN
        ));
        assert_eq!(pool.pending_outgoing(alice.address(), COIN), 22 * COIN);
    }

    #[test]
    fn content_is_queued_unconditionally() {
        let mut pool = mempool();
        assert!(pool.is_empty());
        pool.submit_content(ContentRecord {
            category: "meme".into(),
            filename: "cat.png".into(),
            uploader: "alice".into(),
            content_hash: "abc".into(),
            timestamp: 1,
            public_key: String::new(),
        });
        assert!(!pool.is_empty());
        assert!(pool.transactions().is_empty());
        assert_eq!(pool.contents().len(), 1);
    }

    #[test]
    fn revalidate_drops_transfers_no_longer_covered() {
        let alice = Keypair::from_label("alice");
        let mut ledger = ledger_with(alice.address(), 30 * COIN);
        let mut pool = mempool();
        pool.submit_transaction(Transaction::signed(&alice, "bob", 10 * COIN), &ledger, &Ed25519Identity)
            .unwrap();
        pool.submit_transaction(Transaction::signed(&alice, "carol", 10 * COIN), &ledger, &Ed25519Identity)
            .unwrap();

        ledger
            .apply_stake_op(crate::ledger::StakeOp::Stake {
                address: alice.address().to_string(),
                amount: 15 * COIN,
            })
            .unwrap();
        pool.revalidate(&ledger);

        assert_eq!(pool.transactions().len(), 1);
        assert_eq!(pool.transactions()[0].receiver, "bob");
    }

    #[test]
    fn replay_guard_is_bounded() {
        let mut guard = ReplayGuard::new(2);
        assert!(guard.insert("a"));
        assert!(guard.insert("b"));
        assert!(!guard.insert("a"));
        assert!(guard.insert("c"));
        assert_eq!(guard.len(), 2);
        // "b" was least recently seen and has been evicted.
        assert!(guard.insert("b"));
    }
}
