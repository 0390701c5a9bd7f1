//! Chain core package.
//!
//! Storage contract, transaction authentication, the per-sender serial
//! mempool, forged-block verification, deterministic block processing, and
//! block forging. Slot scheduling, gossip, and catch-up live in
//! lib-consensus; this crate owns everything that touches chain state.

pub mod config;
pub mod errors;
pub mod events;
pub mod forger;
pub mod mempool;
pub mod processor;
pub mod storage;
pub mod validation;
pub mod verifier;

pub use config::ChainParams;
pub use errors::{ChainError, ChainResult};
pub use events::{ChainEvent, ChainEventBus};
pub use forger::{sort_pending_transactions, Forger, SenderGroup};
pub use mempool::{Mempool, MempoolError, MempoolResult};
pub use processor::{BlockProcessor, ProcessOutcome};
pub use storage::{
    ChainStore, Genesis, GenesisAccount, MemoryStore, SortOrder, StoreError, StoreResult,
    StoredTransaction,
};
pub use validation::{
    authenticate_transaction, validate_transaction_schema, MultisigContext, ValidationError,
    ValidationResult, VerificationMode,
};
pub use verifier::{
    verify_block_co_signature, verify_enclosed_signatures, verify_forged_block,
    BlockVerificationOutcome,
};
