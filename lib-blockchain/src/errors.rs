//! Chain-core error taxonomy.

use thiserror::Error;

use lib_types::{Address, Timestamp};

use crate::storage::StoreError;
use crate::validation::ValidationError;

/// Errors raised while verifying or processing blocks.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {block_id} was already received")]
    DuplicateBlock { block_id: String },

    #[error("block height {actual} does not follow {expected}")]
    HeightMismatch { expected: u64, actual: u64 },

    #[error("block timestamp {timestamp} is not aligned to the forging interval")]
    TimestampMisaligned { timestamp: Timestamp },

    #[error("block timestamp {timestamp} does not advance past {previous}")]
    TimestampNotAdvanced {
        timestamp: Timestamp,
        previous: Timestamp,
    },

    #[error("block forger {actual} is not the slot-assigned delegate {expected}")]
    WrongForger { expected: Address, actual: Address },

    #[error("forging public key does not match the delegate account key state")]
    ForgingKeyMismatch,

    #[error("block {block_id} does not link to the last block {expected}")]
    BrokenChainLink { block_id: String, expected: String },

    #[error("invalid forger signature on block {block_id}")]
    InvalidForgerSignature { block_id: String },

    #[error("block carries {count} transactions, max {max}")]
    TooManyTransactions { count: usize, max: usize },

    #[error("transaction {transaction_id} already belongs to block {block_id}")]
    TransactionAlreadyProcessed {
        transaction_id: String,
        block_id: String,
    },

    #[error("block signature does not reference the active block")]
    SignatureBlockMismatch,

    #[error("block signer {address} is the block forger")]
    SignerIsForger { address: Address },

    #[error("block signer {address} is not a top active delegate")]
    SignerNotActiveDelegate { address: Address },

    #[error("invalid block signature from {address}")]
    InvalidBlockSignature { address: Address },

    #[error("{provided} distinct block signatures, {required} required")]
    NotEnoughBlockSignatures { provided: usize, required: usize },

    #[error("transaction {transaction_id} failed in-block authorization: {source}")]
    TransactionRejected {
        transaction_id: String,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("crypto backend failure: {0}")]
    Crypto(String),
}

pub type ChainResult<T> = Result<T, ChainError>;
