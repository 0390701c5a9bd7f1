//! Consensus-layer errors.

use thiserror::Error;

use lib_blockchain::storage::StoreError;
use lib_blockchain::{ChainError, MempoolError};
use lib_crypto::CryptoError;

use crate::network::NetworkError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("no active delegates; the chain cannot assign forging slots")]
    NoActiveDelegates,

    #[error("block {block_id} does not meet the minimum-transactions policy")]
    BelowMinimumTransactions { block_id: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
