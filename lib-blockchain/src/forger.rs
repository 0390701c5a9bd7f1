//! Block forging.
//!
//! Collects the pending transactions of every sender stream, re-verifies
//! them against fresh store snapshots, orders them so stateful key usage
//! stays monotonic and high-fee senders come first, and hands the packaged
//! block to the crypto client for signing.

use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigInt;
use tracing::debug;

use lib_crypto::CryptoClient;
use lib_types::{Account, Address, Amount, Block, Timestamp, Transaction};

use crate::config::ChainParams;
use crate::errors::ChainResult;
use crate::mempool::Mempool;
use crate::storage::{ChainStore, StoreError};
use crate::validation::{
    authenticate_transaction, spend_of, MultisigContext, VerificationMode,
};
use crate::verifier::load_multisig_context;

/// One sender's re-verified pending transactions, in stream order.
pub struct SenderGroup {
    pub transactions: Vec<Transaction>,
}

/// Packages pending transactions into signed blocks.
pub struct Forger {
    params: Arc<ChainParams>,
    store: Arc<dyn ChainStore>,
}

impl Forger {
    pub fn new(params: Arc<ChainParams>, store: Arc<dyn ChainStore>) -> Self {
        Self { params, store }
    }

    /// Assemble and sign the block for the given slot.
    pub async fn forge_block(
        &self,
        crypto: &dyn CryptoClient,
        mempool: &Mempool,
        height: u64,
        timestamp: Timestamp,
        previous_block_id: String,
        now: Timestamp,
    ) -> ChainResult<Block> {
        let snapshot = mempool.forging_snapshot().await;

        let mut groups: Vec<SenderGroup> = Vec::new();
        for (sender_address, transactions) in snapshot {
            let group = self
                .reverify_sender(crypto, &sender_address, transactions, now)
                .await?;
            if !group.transactions.is_empty() {
                groups.push(group);
            }
        }

        let mut ordered = sort_pending_transactions(groups);
        ordered.truncate(self.params.max_transactions_per_block);

        let unsigned = Block {
            id: String::new(),
            height,
            timestamp,
            previous_block_id: Some(previous_block_id),
            forger_address: crypto.wallet_address().clone(),
            forging_public_key: String::new(),
            next_forging_public_key: String::new(),
            next_forging_key_index: 0,
            transactions: ordered.iter().map(Transaction::simplified).collect(),
            forger_signature: None,
            signatures: Vec::new(),
        };
        let block = crypto
            .prepare_block(unsigned)
            .await
            .map_err(|err| crate::errors::ChainError::Crypto(err.to_string()))?;
        Ok(block)
    }

    /// Authorize a sender's pending set against its current on-store
    /// snapshot, dropping transactions the chain has since invalidated.
    async fn reverify_sender(
        &self,
        crypto: &dyn CryptoClient,
        sender_address: &Address,
        transactions: Vec<Transaction>,
        now: Timestamp,
    ) -> ChainResult<SenderGroup> {
        let mut snapshot = match self.store.get_account(sender_address).await {
            Ok(account) => account,
            Err(StoreError::AccountDidNotExist { .. }) => {
                Account::default_for(sender_address.clone())
            }
            Err(err) => return Err(err.into()),
        };
        let multisig: Option<MultisigContext> = if snapshot.is_multisig() {
            Some(load_multisig_context(self.store.as_ref(), &snapshot).await?)
        } else {
            None
        };

        let mut kept = Vec::new();
        for transaction in transactions {
            let outcome = authenticate_transaction(
                crypto,
                &self.params,
                &snapshot,
                multisig.as_ref(),
                &transaction,
                VerificationMode::Full,
                now,
            )
            .await;
            match outcome {
                Ok(()) => {
                    snapshot.balance = snapshot
                        .balance
                        .checked_sub(&spend_of(&transaction))
                        .unwrap_or_else(Amount::zero);
                    kept.push(transaction);
                }
                Err(err) => {
                    debug!(
                        sender = %sender_address,
                        transaction_id = %transaction.id,
                        %err,
                        "dropped pending transaction during forging pass"
                    );
                }
            }
        }
        Ok(SenderGroup { transactions: kept })
    }
}

/// Order sender groups for block inclusion.
///
/// Within a sig sender's group transactions order by ascending
/// `next_sig_key_index`; within a multisig group by the mean per-member
/// key-index offset. Groups themselves order by descending average fee, so
/// the block fills with the best-paying senders first.
pub fn sort_pending_transactions(mut groups: Vec<SenderGroup>) -> Vec<Transaction> {
    for group in &mut groups {
        if group
            .transactions
            .first()
            .map(|transaction| transaction.is_multisig_sent())
            .unwrap_or(false)
        {
            let mut member_minimums: HashMap<Address, u64> = HashMap::new();
            for transaction in &group.transactions {
                for packet in &transaction.signatures {
                    member_minimums
                        .entry(packet.signer_address.clone())
                        .and_modify(|minimum| {
                            *minimum = (*minimum).min(packet.next_multisig_key_index)
                        })
                        .or_insert(packet.next_multisig_key_index);
                }
            }
            // Mean offset scaled by 1000 to stay in integers.
            group.transactions.sort_by_key(|transaction| {
                let packet_count = transaction.signatures.len().max(1) as u128;
                let offset_sum: u128 = transaction
                    .signatures
                    .iter()
                    .map(|packet| {
                        let minimum = member_minimums
                            .get(&packet.signer_address)
                            .copied()
                            .unwrap_or(0);
                        (packet.next_multisig_key_index - minimum) as u128
                    })
                    .sum();
                offset_sum * 1000 / packet_count
            });
        } else {
            group
                .transactions
                .sort_by_key(|transaction| transaction.next_sig_key_index.unwrap_or(0));
        }
    }

    groups.sort_by(|a, b| average_fee(b).cmp(&average_fee(a)));
    groups
        .into_iter()
        .flat_map(|group| group.transactions)
        .collect()
}

fn average_fee(group: &SenderGroup) -> BigInt {
    let count = group.transactions.len().max(1) as u64;
    let mut total = Amount::zero();
    for transaction in &group.transactions {
        total += &transaction.fee;
    }
    total.to_bigint() / BigInt::from(count)
}
