//! Chain persistence.
//!
//! Blocks are stored one record per key in a sled tree, keyed by big-endian
//! index so iteration returns them in chain order. Records are versioned;
//! version 0 marks records written before Merkle roots were stored.

use serde::{Deserialize, Serialize};

use crate::blockchain::{Block, ContentRecord, Transaction};
use crate::error::StoreError;
use crate::hashing::EMPTY_MERKLE_ROOT;
use crate::ledger::JournalEntry;

pub const BLOCK_RECORD_VERSION: u32 = 1;

const BLOCKS_TREE: &str = "blocks";
const JOURNAL_KEY: &[u8] = b"stake_journal";

/// Load/save collaborator for the chain and the stake journal.
pub trait ChainStore: Send + Sync {
    fn save(&self, chain: &[Block]) -> Result<(), StoreError>;
    fn load(&self) -> Result<Vec<Block>, StoreError>;
    fn save_journal(&self, journal: &[JournalEntry]) -> Result<(), StoreError>;
    fn load_journal(&self) -> Result<Vec<JournalEntry>, StoreError>;
}

/// Field-tagged persisted form of a [`Block`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    #[serde(default)]
    pub version: u32,
    pub index: u64,
    pub prev_hash: String,
    pub hash: String,
    #[serde(default)]
    pub merkle_root: Option<String>,
    pub timestamp: i64,
    pub producer: String,
    pub nonce: u64,
    pub difficulty: u32,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub contents: Vec<ContentRecord>,
}

impl From<&Block> for BlockRecord {
    fn from(block: &Block) -> Self {
        Self {
            version: BLOCK_RECORD_VERSION,
            index: block.index,
            prev_hash: block.previous_hash.clone(),
            hash: block.hash.clone(),
            merkle_root: Some(block.merkle_root.clone()),
            timestamp: block.timestamp,
            producer: block.producer.clone(),
            nonce: block.nonce,
            difficulty: block.difficulty,
            transactions: block.transactions.clone(),
            contents: block.contents.clone(),
        }
    }
}

impl TryFrom<BlockRecord> for Block {
    type Error = StoreError;

    fn try_from(record: BlockRecord) -> Result<Self, Self::Error> {
        if record.version > BLOCK_RECORD_VERSION {
            return Err(StoreError::UnsupportedVersion(record.version));
        }
        Ok(Block {
            index: record.index,
            previous_hash: record.prev_hash,
            hash: record.hash,
            merkle_root: record
                .merkle_root
                .unwrap_or_else(|| EMPTY_MERKLE_ROOT.to_string()),
            timestamp: record.timestamp,
            producer: record.producer,
            nonce: record.nonce,
            difficulty: record.difficulty,
            transactions: record.transactions,
            contents: record.contents,
        })
    }
}

pub struct SledStore {
    db: sled::Db,
    blocks: sled::Tree,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// Store removed when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let blocks = db.open_tree(BLOCKS_TREE)?;
        Ok(Self { db, blocks })
    }

    /// Raw record insert, bypassing [`ChainStore::save`].
    pub fn put_record(&self, record: &BlockRecord) -> Result<(), StoreError> {
        self.blocks
            .insert(record.index.to_be_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }
}

impl ChainStore for SledStore {
    fn save(&self, chain: &[Block]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for block in chain {
            let record = BlockRecord::from(block);
            batch.insert(block.index.to_be_bytes().to_vec(), serde_json::to_vec(&record)?);
        }
        // Drop records past the new tip left over from a replaced branch.
        for key in self.blocks.range((chain.len() as u64).to_be_bytes()..) {
            let (key, _) = key?;
            batch.remove(key);
        }
        self.blocks.apply_batch(batch)?;
        self.blocks.flush()?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<Block>, StoreError> {
        self.blocks
            .iter()
            .values()
            .map(|value| {
                let record: BlockRecord = serde_json::from_slice(&value?)?;
                Block::try_from(record)
            })
            .collect()
    }

    fn save_journal(&self, journal: &[JournalEntry]) -> Result<(), StoreError> {
        self.db.insert(JOURNAL_KEY, serde_json::to_vec(journal)?)?;
        self.db.flush()?;
        Ok(())
    }

    fn load_journal(&self) -> Result<Vec<JournalEntry>, StoreError> {
        match self.db.get(JOURNAL_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}
