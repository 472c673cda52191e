//! Error types for the ledger, consensus and networking layers.

use thiserror::Error;

/// Why a transaction was refused by admission control.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("transaction {0} already seen")]
    Duplicate(String),

    #[error("sender {sender} does not match public key (expected {expected})")]
    AddressMismatch { sender: String, expected: String },

    #[error("invalid signature from {0}")]
    InvalidSignature(String),

    #[error("insufficient balance for {address}: spendable {spendable}, required {required}")]
    InsufficientBalance {
        address: String,
        spendable: u64,
        required: u64,
    },
}

/// The rule a candidate block broke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("block {index} links to {found}, expected {expected}")]
    BrokenLink {
        index: u64,
        expected: String,
        found: String,
    },

    #[error("block {index} index does not follow {previous}")]
    BadIndex { index: u64, previous: u64 },

    #[error("block {index} hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch {
        index: u64,
        stored: String,
        computed: String,
    },

    #[error("block {index} hash does not meet difficulty {difficulty}")]
    InsufficientWork { index: u64, difficulty: u32 },

    #[error("block {index} timestamp {timestamp} precedes parent {parent}")]
    TimestampRegression {
        index: u64,
        timestamp: i64,
        parent: i64,
    },

    #[error("block {index} merkle root mismatch")]
    MerkleMismatch { index: u64 },

    #[error("genesis block does not match local genesis")]
    GenesisMismatch,

    #[error("block {index} repeats transaction {id}")]
    DuplicateTransaction { index: u64, id: String },

    #[error("block {index} carries transaction {id} that fails verification")]
    ForgedTransaction { index: u64, id: String },

    #[error("block {index} declares no proof of work")]
    MissingWork { index: u64 },
}

/// Failures while mutating balances or stake tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient balance for {address}: have {available}, need {required}")]
    InsufficientBalance {
        address: String,
        available: u64,
        required: u64,
    },

    #[error("insufficient stake for {address}: have {available}, need {required}")]
    InsufficientStake {
        address: String,
        available: u64,
        required: u64,
    },

    #[error("no delegation from {delegator} to {delegate} covers {amount}")]
    UnknownDelegation {
        delegator: String,
        delegate: String,
        amount: u64,
    },

    #[error("amount overflow")]
    Overflow,

    #[error("amount must be greater than zero")]
    ZeroAmount,
}

/// Why block production or acceptance failed.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("nothing to include: mempool and pending content are empty")]
    EmptyMempool,

    #[error("no eligible producer (total weight is zero)")]
    NoEligibleProducer,

    #[error("delegate quorum unreachable: {acks} of {known} acknowledgements")]
    QuorumUnreachable { acks: usize, known: usize },

    #[error("search superseded by a newer tip")]
    Superseded,

    #[error("chain tip moved during production")]
    StaleTip,

    #[error("settlement failed: {0}")]
    Settlement(#[from] LedgerError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not restore chain: {0}")]
    Store(#[from] StoreError),
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("unsupported block record version {0}")]
    UnsupportedVersion(u32),
}

/// Peer directory refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("peer {0} is blocked")]
    Blocked(String),

    #[error("refusing to add own address {0}")]
    SelfAddress(String),

    #[error("peer {0} exceeded the request rate limit")]
    RateLimited(String),

    #[error("invalid peer endpoint {0}")]
    InvalidEndpoint(String),
}

/// Transport failures talking to a single peer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out talking to {0}")]
    Timeout(String),

    #[error("frame of {size} bytes exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
}
