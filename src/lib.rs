//! # Ahmiyat
//!
//! An append-only ledger of transfers and content attestations, finalized
//! under work, stake or delegate consensus and kept in sync across nodes by
//! a small gossip protocol.

pub mod blockchain;
pub mod config;
pub mod consensus;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod ledger;
pub mod mempool;
pub mod p2p;
pub mod storage;
pub mod validation;

pub use blockchain::{Block, ContentRecord, Transaction, COIN};
pub use config::{ConsensusMode, NodeConfig};
pub use consensus::Engine;
pub use identity::{Ed25519Identity, Identity, Keypair};
