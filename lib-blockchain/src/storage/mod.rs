//! Chain storage layer.
//!
//! This module defines the persistence contract for the chain core. All
//! persisted reads and writes go through the [`ChainStore`] trait; consensus
//! code never knows which backend is in use.
//!
//! # Data model invariants
//!
//! 1. Blocks are append-only. After genesis initialization the only valid
//!    block write is `upsert_block` at the next height.
//! 2. Accounts and delegates are written exclusively by block processing,
//!    at an `update_height` equal to the processed block's height.
//! 3. State is fully derivable from the genesis state plus the block
//!    sequence; replaying a block against a store that already absorbed it
//!    must be a no-op (the `update_height` guard).

pub mod memory_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lib_types::{Account, Address, Block, Delegate, Timestamp, Transaction, Vote};

pub use memory_store::MemoryStore;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {address} did not exist")]
    AccountDidNotExist { address: Address },

    #[error("block {block_id} did not exist")]
    BlockDidNotExist { block_id: String },

    #[error("no block at height {height}")]
    BlockHeightDidNotExist { height: u64 },

    #[error("transaction {transaction_id} did not exist")]
    TransactionDidNotExist { transaction_id: String },

    #[error("voter account {address} did not exist")]
    VoterAccountDidNotExist { address: Address },

    #[error("delegate {address} did not exist")]
    DelegateDidNotExist { address: Address },

    #[error("invalid store action: {reason}")]
    InvalidAction { reason: String },

    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result ordering for offset/limit listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A transaction as persisted: the simplified record plus the block that
/// contains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub block_id: String,
    pub index_in_block: usize,
}

/// One seeded account in the genesis state.
///
/// Accounts carrying a forging key are registered as delegates; their
/// initial vote weight is the sum of the balances of the genesis accounts
/// voting for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    #[serde(flatten)]
    pub account: Account,
    #[serde(default)]
    pub votes: Vec<Address>,
}

/// The genesis state of a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub network_symbol: String,
    pub accounts: Vec<GenesisAccount>,
}

/// Persistence contract for the chain core.
///
/// Implementations must be safe for concurrent use; the core fans out
/// reads but serializes all writes through block processing.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Initialize storage from the genesis state. Idempotent; fatal on
    /// failure.
    async fn init(&self, genesis: &Genesis) -> StoreResult<()>;

    /// Tear down any resources the store holds.
    async fn destroy(&self) -> StoreResult<()>;

    // --- accounts ---

    async fn get_account(&self, address: &Address) -> StoreResult<Account>;
    async fn upsert_account(&self, account: &Account) -> StoreResult<()>;
    async fn get_accounts_by_balance(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<Account>>;

    // --- multisig wallets ---

    async fn get_multisig_wallet_members(&self, address: &Address) -> StoreResult<Vec<Address>>;
    async fn register_multisig_wallet(
        &self,
        address: &Address,
        members: &[Address],
        required_signature_count: u32,
    ) -> StoreResult<()>;

    // --- delegates and votes ---

    async fn get_delegate(&self, address: &Address) -> StoreResult<Delegate>;
    async fn has_delegate(&self, address: &Address) -> StoreResult<bool>;
    async fn upsert_delegate(&self, delegate: &Delegate) -> StoreResult<()>;
    /// Delegates ordered by vote weight; equal weights order by address
    /// ascending so rotation is deterministic across nodes.
    async fn get_delegates_by_vote_weight(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<Delegate>>;
    async fn get_account_votes(&self, address: &Address) -> StoreResult<Vec<Address>>;
    async fn has_vote_for_delegate(
        &self,
        voter_address: &Address,
        delegate_address: &Address,
    ) -> StoreResult<bool>;
    async fn vote(&self, vote: &Vote) -> StoreResult<()>;
    async fn unvote(&self, vote: &Vote) -> StoreResult<()>;

    // --- transactions ---

    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<StoredTransaction>;
    async fn has_transaction(&self, transaction_id: &str) -> StoreResult<bool>;
    async fn get_transactions_by_timestamp(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<StoredTransaction>>;
    async fn get_inbound_transactions(
        &self,
        address: &Address,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<StoredTransaction>>;
    async fn get_outbound_transactions(
        &self,
        address: &Address,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<StoredTransaction>>;
    async fn get_transactions_from_block(
        &self,
        block_id: &str,
    ) -> StoreResult<Vec<StoredTransaction>>;

    // --- blocks ---

    async fn get_block(&self, block_id: &str) -> StoreResult<Block>;
    async fn has_block(&self, block_id: &str) -> StoreResult<bool>;
    async fn get_block_at_height(&self, height: u64) -> StoreResult<Block>;
    /// Co-signature-stripped blocks from `height` inclusive, ascending.
    async fn get_blocks_from_height(&self, height: u64, limit: usize) -> StoreResult<Vec<Block>>;
    /// Blocks with their stored co-signatures from `height` inclusive.
    async fn get_signed_blocks_from_height(
        &self,
        height: u64,
        limit: usize,
    ) -> StoreResult<Vec<Block>>;
    async fn get_signed_block_at_height(&self, height: u64) -> StoreResult<Block>;
    /// Blocks with height in `(from_height, to_height]`, ascending.
    async fn get_blocks_between_heights(
        &self,
        from_height: u64,
        to_height: u64,
        limit: usize,
    ) -> StoreResult<Vec<Block>>;
    async fn get_blocks_by_timestamp(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<Block>>;
    /// The latest block whose timestamp does not exceed `timestamp`.
    async fn get_last_block_at_timestamp(&self, timestamp: Timestamp) -> StoreResult<Block>;
    async fn get_max_block_height(&self) -> StoreResult<u64>;
    /// Persist a block and its transactions. `synched` marks blocks
    /// replayed during catch-up rather than processed live.
    async fn upsert_block(&self, block: &Block, synched: bool) -> StoreResult<()>;
}
