//! Account state as persisted by the store.

use serde::{Deserialize, Serialize};

use crate::primitives::{Address, Amount, BlockHeight, KeyIndex};

/// Authentication regime of an account.
///
/// A `Sig` account authenticates with its own key-evolving sig chain; a
/// `Multisig` account authenticates through the multisig chains of its
/// registered member wallets. The two regimes use disjoint key fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Sig,
    Multisig,
}

impl Default for AccountType {
    fn default() -> Self {
        AccountType::Sig
    }
}

/// On-chain account record.
///
/// Accounts are created lazily on first reference and are only ever mutated
/// by block processing, at `update_height` equal to the processed block's
/// height. `update_height == None` marks an account that exists solely as an
/// in-memory default and has never been written by a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    #[serde(rename = "type", default)]
    pub account_type: AccountType,
    pub balance: Amount,
    #[serde(default)]
    pub update_height: Option<BlockHeight>,

    // Sig chain (sender authentication)
    #[serde(default)]
    pub sig_public_key: Option<String>,
    #[serde(default)]
    pub next_sig_public_key: Option<String>,
    #[serde(default)]
    pub next_sig_key_index: KeyIndex,

    // Multisig chain (membership in multisig wallets)
    #[serde(default)]
    pub multisig_public_key: Option<String>,
    #[serde(default)]
    pub next_multisig_public_key: Option<String>,
    #[serde(default)]
    pub next_multisig_key_index: KeyIndex,

    // Forging chain (delegates only)
    #[serde(default)]
    pub forging_public_key: Option<String>,
    #[serde(default)]
    pub next_forging_public_key: Option<String>,
    #[serde(default)]
    pub next_forging_key_index: KeyIndex,

    /// Multisig wallets only: signatures required to spend.
    #[serde(default)]
    pub required_signature_count: Option<u32>,
}

impl Account {
    /// Default account for an address that has never been written.
    pub fn default_for(address: Address) -> Self {
        Self {
            address,
            account_type: AccountType::Sig,
            balance: Amount::zero(),
            update_height: None,
            sig_public_key: None,
            next_sig_public_key: None,
            next_sig_key_index: 0,
            multisig_public_key: None,
            next_multisig_public_key: None,
            next_multisig_key_index: 0,
            forging_public_key: None,
            next_forging_public_key: None,
            next_forging_key_index: 0,
            required_signature_count: None,
        }
    }

    pub fn is_multisig(&self) -> bool {
        self.account_type == AccountType::Multisig
    }
}
