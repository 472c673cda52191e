use serde::{Deserialize, Serialize};

use crate::hashing::{self, EMPTY_MERKLE_ROOT};
use crate::identity::Keypair;

/// Base units per coin.
pub const COIN: u64 = 100_000_000;

/// Previous-hash sentinel carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Producer identity reserved for the genesis block.
pub const GENESIS_PRODUCER: &str = "genesis";

// --- Transaction, ContentRecord, Block ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
    pub signature: String,
    pub public_key: String,
}

impl Transaction {
    /// Bytes covered by the sender's signature.
    pub fn signing_message(sender: &str, receiver: &str, amount: u64) -> Vec<u8> {
        format!("{sender}{receiver}{amount}").into_bytes()
    }

    /// Builds a transfer from `keypair`'s address, signed by it.
    pub fn signed(keypair: &Keypair, receiver: impl Into<String>, amount: u64) -> Self {
        let sender = keypair.address().to_string();
        let receiver = receiver.into();
        let signature = keypair.sign(&Self::signing_message(&sender, &receiver, amount));
        Transaction {
            sender,
            receiver,
            amount,
            signature,
            public_key: keypair.public_key(),
        }
    }

    pub fn id(&self) -> String {
        hashing::transaction_id(self)
    }
}

/// Attestation that a piece of content was uploaded. Carries no value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentRecord {
    /// image, meme, video, memory, ...
    pub category: String,
    pub filename: String,
    pub uploader: String,
    pub content_hash: String,
    pub timestamp: i64,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub hash: String,
    pub merkle_root: String,
    pub timestamp: i64,
    pub producer: String,
    pub nonce: u64,
    pub difficulty: u32,
    pub transactions: Vec<Transaction>,
    pub contents: Vec<ContentRecord>,
}

impl Block {
    /// The unique index-0 block. Every instance configured with the same
    /// timestamp derives the same genesis hash.
    pub fn genesis(timestamp: i64) -> Self {
        let mut genesis = Block {
            index: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            hash: String::new(),
            merkle_root: EMPTY_MERKLE_ROOT.to_string(),
            timestamp,
            producer: GENESIS_PRODUCER.to_string(),
            nonce: 0,
            difficulty: 0,
            transactions: vec![],
            contents: vec![],
        };
        genesis.hash = genesis.compute_hash();
        genesis
    }

    /// Unsealed successor of `parent`; `hash` stays empty until sealed.
    pub fn candidate(
        parent: &Block,
        producer: String,
        difficulty: u32,
        transactions: Vec<Transaction>,
        contents: Vec<ContentRecord>,
    ) -> Self {
        Block {
            index: parent.index + 1,
            previous_hash: parent.hash.clone(),
            hash: String::new(),
            merkle_root: hashing::merkle_root(&transactions),
            timestamp: current_timestamp().max(parent.timestamp),
            producer,
            nonce: 0,
            difficulty,
            transactions,
            contents,
        }
    }

    pub fn compute_hash(&self) -> String {
        hashing::hash_block(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// --- Tests ---
