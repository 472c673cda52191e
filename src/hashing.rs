//! Block hashing, transaction identifiers and Merkle roots.
//!
//! Every digest is SHA-256 rendered as lowercase hex. Inputs are encoded
//! canonically: integers as fixed-width big-endian, strings as a big-endian
//! `u64` length followed by their UTF-8 bytes, so the encoding is identical on
//! every platform and no two field sequences collide.

use sha2::{Digest, Sha256};

use crate::blockchain::{Block, ContentRecord, Transaction};

/// Merkle root of a block without transactions.
pub const EMPTY_MERKLE_ROOT: &str = "";

/// Incremental canonical encoder feeding a SHA-256 state.
#[derive(Default)]
struct Canonical {
    hasher: Sha256,
}

impl Canonical {
    fn str(&mut self, value: &str) -> &mut Self {
        self.hasher.update((value.len() as u64).to_be_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    fn i64(&mut self, value: i64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash of every block field except the hash itself and the Merkle root.
pub fn hash_block(block: &Block) -> String {
    let mut c = Canonical::default();
    c.u64(block.index)
        .str(&block.previous_hash)
        .i64(block.timestamp)
        .str(&block.producer)
        .u64(block.nonce)
        .u64(u64::from(block.difficulty));

    c.u64(block.transactions.len() as u64);
    for tx in &block.transactions {
        c.str(&tx.sender)
            .str(&tx.receiver)
            .u64(tx.amount)
            .str(&tx.signature);
    }

    c.u64(block.contents.len() as u64);
    for content in &block.contents {
        content_fields(&mut c, content);
    }
    c.finish()
}

fn content_fields(c: &mut Canonical, content: &ContentRecord) {
    c.str(&content.category)
        .str(&content.filename)
        .str(&content.uploader)
        .str(&content.content_hash)
        .i64(content.timestamp);
}

/// Replay identifier and Merkle leaf of a transaction.
pub fn transaction_id(tx: &Transaction) -> String {
    let mut c = Canonical::default();
    c.str(&tx.sender)
        .str(&tx.receiver)
        .u64(tx.amount)
        .str(&tx.signature)
        .str(&tx.public_key);
    c.finish()
}

/// Pairwise Merkle root over transaction leaves.
///
/// An odd trailing node is promoted to the next level unchanged rather than
/// paired with itself.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return EMPTY_MERKLE_ROOT.to_string();
    }

    let mut level: Vec<String> = transactions.iter().map(transaction_id).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => {
                    let mut joined = String::with_capacity(left.len() + right.len());
                    joined.push_str(left);
                    joined.push_str(right);
                    next.push(sha256_hex(joined.as_bytes()));
                }
                [single] => next.push(single.clone()),
                _ => unreachable!("chunks(2) yields one or two items"),
            }
        }
        level = next;
    }
    level.swap_remove(0)
}

/// Number of leading `'0'` hex digits in a digest.
pub fn leading_hex_zeros(hash: &str) -> u32 {
    hash.bytes().take_while(|b| *b == b'0').count() as u32
}

pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    leading_hex_zeros(hash) >= difficulty
}
