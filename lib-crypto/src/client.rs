//! The crypto client boundary.
//!
//! A crypto client owns a wallet's key-evolving signature chains and performs
//! every signing and verification operation the chain core needs. The trait
//! keeps the core independent of the concrete scheme; production deployments
//! plug in an external signer, tests and development use [`crate::DevCryptoClient`].

use async_trait::async_trait;
use thiserror::Error;

use lib_types::{Account, Address, Block, BlockSignature, KeyIndex, SignaturePacket, Transaction};

/// Which of a wallet's three key-evolving chains an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Forging,
    Sig,
    Multisig,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Forging => "forging",
            KeyType::Sig => "sig",
            KeyType::Multisig => "multisig",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors surfaced by crypto client implementations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("crypto client is not connected to a wallet")]
    NotConnected,

    #[error("block {block_id} cannot be signed: {reason}")]
    SigningRefused { block_id: String, reason: String },

    #[error("crypto backend failure: {0}")]
    Backend(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Signing and verification operations for one wallet.
///
/// Verification methods are pure with respect to the client's own keys;
/// they judge the supplied object against the keys it carries. Signing
/// methods consume the client's current key index for the relevant chain.
#[async_trait]
pub trait CryptoClient: Send + Sync {
    /// Address of the wallet this client is connected to.
    fn wallet_address(&self) -> &Address;

    /// Current index into the wallet's forging key chain.
    fn forging_key_index(&self) -> KeyIndex;

    /// Complete an unsigned block: populate the forging key triple for the
    /// current index, derive the block id, and attach the forger signature.
    async fn prepare_block(&self, block: Block) -> CryptoResult<Block>;

    /// Produce this delegate's co-signature over an actively forged block.
    async fn sign_block(&self, block: &Block) -> CryptoResult<BlockSignature>;

    /// Verify a block's id derivation and forger signature.
    async fn verify_block(&self, block: &Block) -> CryptoResult<bool>;

    /// Verify a delegate co-signature against the block it claims to sign.
    async fn verify_block_signature(
        &self,
        block: &Block,
        signature: &BlockSignature,
    ) -> CryptoResult<bool>;

    /// Verify a sig-sent transaction's sender signature (full mode).
    async fn verify_transaction(&self, transaction: &Transaction) -> CryptoResult<bool>;

    /// Verify that a transaction's id is the canonical hash of its fields
    /// (id-only mode, used for simplified in-block transactions).
    async fn verify_transaction_id(&self, transaction: &Transaction) -> CryptoResult<bool>;

    /// Verify one member's signature packet on a multisig-sent transaction.
    async fn verify_multisig_transaction_signature(
        &self,
        transaction: &Transaction,
        packet: &SignaturePacket,
    ) -> CryptoResult<bool>;

    /// Advance the local key index for `key_type` to match the on-chain
    /// account state when the chain is ahead. Returns whether it advanced.
    async fn sync_key_index(&self, key_type: KeyType, account: &Account) -> CryptoResult<bool>;
}
