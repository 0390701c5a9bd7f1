//! Block records and delegate co-signatures.

use serde::{Deserialize, Serialize};

use crate::primitives::{Address, BlockHeight, KeyIndex, Timestamp};
use crate::transaction::Transaction;

/// A delegate's co-signature over an actively forged block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub signer_address: Address,
    pub forging_public_key: String,
    pub next_forging_public_key: String,
    pub next_forging_key_index: KeyIndex,
    pub block_id: String,
    pub signature: String,
}

/// A chain block.
///
/// Transactions are stored in simplified form. `forger_signature` is absent
/// only on the genesis tip; every forged block carries one. The `signatures`
/// list holds delegate co-signatures, subsampled at persistence time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub height: BlockHeight,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block_id: Option<String>,
    pub forger_address: Address,
    pub forging_public_key: String,
    pub next_forging_public_key: String,
    pub next_forging_key_index: KeyIndex,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forger_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<BlockSignature>,
}

impl Block {
    /// Event-payload form: co-signatures dropped, transactions kept
    /// simplified, signature count preserved for observability.
    pub fn simplified(&self) -> SimplifiedBlock {
        SimplifiedBlock {
            id: self.id.clone(),
            height: self.height,
            timestamp: self.timestamp,
            previous_block_id: self.previous_block_id.clone(),
            forger_address: self.forger_address.clone(),
            number_of_transactions: self.transactions.len(),
            number_of_signatures: self.signatures.len(),
            transactions: self.transactions.iter().map(Transaction::simplified).collect(),
        }
    }
}

/// The externally published view of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedBlock {
    pub id: String,
    pub height: BlockHeight,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block_id: Option<String>,
    pub forger_address: Address,
    pub number_of_transactions: usize,
    pub number_of_signatures: usize,
    pub transactions: Vec<Transaction>,
}
