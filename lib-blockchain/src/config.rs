//! Protocol parameters consumed by the chain core.
//!
//! These are the consensus-critical knobs shared by validation, the mempool,
//! the verifier, the processor, and the forger. The node crate aggregates
//! them from its own configuration surface.

use std::collections::HashMap;

use lib_types::{Amount, TransactionType};

/// Consensus-critical protocol parameters.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Address prefix every wallet on this network carries.
    pub network_symbol: String,
    /// Upper bound on the optional transaction message, in characters.
    pub max_transaction_message_length: usize,
    /// Upper bound on decimal digits of any amount or fee.
    pub max_spendable_digits: usize,
    /// Minimum fee per transaction type.
    pub min_transaction_fees: HashMap<TransactionType, Amount>,
    /// Added to the registerMultisigWallet minimum per proposed member.
    pub min_multisig_registration_fee_per_member: Amount,
    /// Added to the minimum of every multisig-sent transaction per member.
    pub min_multisig_transaction_fee_per_member: Amount,
    pub min_multisig_members: usize,
    pub max_multisig_members: usize,
    pub max_votes_per_account: usize,
    pub min_transactions_per_block: usize,
    pub max_transactions_per_block: usize,
    /// Cap on delegate co-signatures kept on a persisted block.
    pub block_signatures_to_provide: usize,
    pub max_pending_transactions_per_account: usize,
    pub max_transaction_backpressure_per_account: usize,
    /// Pending transactions older than this (ms) are evicted.
    pub pending_transaction_expiry: u64,
}

impl ChainParams {
    /// Minimum fee for `transaction_type`, zero when unconfigured.
    pub fn min_fee(&self, transaction_type: TransactionType) -> Amount {
        self.min_transaction_fees
            .get(&transaction_type)
            .cloned()
            .unwrap_or_else(Amount::zero)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        let min_transaction_fees = TransactionType::ALL
            .iter()
            .map(|transaction_type| (*transaction_type, Amount::from_u64(10_000_000)))
            .collect();
        Self {
            network_symbol: "ldpos".to_string(),
            max_transaction_message_length: 256,
            max_spendable_digits: 25,
            min_transaction_fees,
            min_multisig_registration_fee_per_member: Amount::from_dec_str("100000000")
                .expect("literal amount"),
            min_multisig_transaction_fee_per_member: Amount::from_dec_str("500000")
                .expect("literal amount"),
            min_multisig_members: 1,
            max_multisig_members: 100,
            max_votes_per_account: 5,
            min_transactions_per_block: 1,
            max_transactions_per_block: 300,
            block_signatures_to_provide: 12,
            max_pending_transactions_per_account: 64,
            max_transaction_backpressure_per_account: 32,
            pending_transaction_expiry: 24 * 60 * 60 * 1000,
        }
    }
}
