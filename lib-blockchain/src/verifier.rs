//! Forged-block and block-signature verification.
//!
//! A candidate block is judged against the last accepted block: chain
//! position, slot alignment, forger assignment, key state, the forger
//! signature, and every contained transaction against per-sender account
//! snapshots. Verification never mutates the store.

use std::collections::HashMap;

use lib_crypto::CryptoClient;
use lib_types::{
    Account, Address, Block, BlockSignature, Delegate, Timestamp, Transaction,
};

use crate::config::ChainParams;
use crate::errors::{ChainError, ChainResult};
use crate::storage::{ChainStore, StoreError};
use crate::validation::{
    authenticate_transaction, spend_of, MultisigContext, VerificationMode,
};

/// What block verification hands to the processor.
#[derive(Debug, Default)]
pub struct BlockVerificationOutcome {
    /// Sender account snapshots with in-block spends already discounted.
    pub sender_snapshots: HashMap<Address, Account>,
    /// Whether the forger's forging key advanced with this block. Feeds the
    /// minimum-transactions policy: key rotations must land on chain even
    /// in otherwise empty slots.
    pub delegate_changed_keys: bool,
}

/// Verify a forged block against the chain tip.
pub async fn verify_forged_block(
    store: &dyn ChainStore,
    crypto: &dyn CryptoClient,
    params: &ChainParams,
    forging_interval: u64,
    expected_forger: &Address,
    block: &Block,
    last_block: &Block,
    now: Timestamp,
) -> ChainResult<BlockVerificationOutcome> {
    if block.id == last_block.id {
        return Err(ChainError::DuplicateBlock {
            block_id: block.id.clone(),
        });
    }
    if block.height != last_block.height + 1 {
        return Err(ChainError::HeightMismatch {
            expected: last_block.height + 1,
            actual: block.height,
        });
    }
    if forging_interval == 0 || block.timestamp % forging_interval != 0 {
        return Err(ChainError::TimestampMisaligned {
            timestamp: block.timestamp,
        });
    }
    if block.timestamp < last_block.timestamp + forging_interval {
        return Err(ChainError::TimestampNotAdvanced {
            timestamp: block.timestamp,
            previous: last_block.timestamp,
        });
    }
    if &block.forger_address != expected_forger {
        return Err(ChainError::WrongForger {
            expected: expected_forger.clone(),
            actual: block.forger_address.clone(),
        });
    }

    let forger_account = store.get_account(&block.forger_address).await?;
    let uses_current = forger_account.forging_public_key.as_deref()
        == Some(block.forging_public_key.as_str());
    let uses_next = forger_account.next_forging_public_key.as_deref()
        == Some(block.forging_public_key.as_str());
    if !uses_current && !uses_next {
        return Err(ChainError::ForgingKeyMismatch);
    }
    let delegate_changed_keys = uses_next && !uses_current;

    if block.previous_block_id.as_deref() != Some(last_block.id.as_str()) {
        return Err(ChainError::BrokenChainLink {
            block_id: block.id.clone(),
            expected: last_block.id.clone(),
        });
    }
    let signature_ok = crypto
        .verify_block(block)
        .await
        .map_err(|err| ChainError::Crypto(err.to_string()))?;
    if !signature_ok {
        return Err(ChainError::InvalidForgerSignature {
            block_id: block.id.clone(),
        });
    }

    if block.transactions.len() > params.max_transactions_per_block {
        return Err(ChainError::TooManyTransactions {
            count: block.transactions.len(),
            max: params.max_transactions_per_block,
        });
    }
    for transaction in &block.transactions {
        crate::validation::validate_transaction_schema(params, transaction)?;
        match store.get_transaction(&transaction.id).await {
            Ok(stored) if stored.block_id != block.id => {
                return Err(ChainError::TransactionAlreadyProcessed {
                    transaction_id: transaction.id.clone(),
                    block_id: stored.block_id,
                });
            }
            Ok(_) => {}
            Err(StoreError::TransactionDidNotExist { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }

    // Authorize per sender against one snapshot, serially within a sender
    // so each accepted spend discounts the next check.
    let mut grouped: Vec<(Address, Vec<&Transaction>)> = Vec::new();
    for transaction in &block.transactions {
        match grouped
            .iter_mut()
            .find(|(address, _)| address == &transaction.sender_address)
        {
            Some((_, list)) => list.push(transaction),
            None => grouped.push((transaction.sender_address.clone(), vec![transaction])),
        }
    }

    let mut sender_snapshots = HashMap::new();
    for (sender_address, transactions) in grouped {
        let mut snapshot = match store.get_account(&sender_address).await {
            Ok(account) => account,
            Err(StoreError::AccountDidNotExist { .. }) => {
                Account::default_for(sender_address.clone())
            }
            Err(err) => return Err(err.into()),
        };
        let multisig = if snapshot.is_multisig() {
            Some(load_multisig_context(store, &snapshot).await?)
        } else {
            None
        };
        for transaction in transactions {
            authenticate_transaction(
                crypto,
                params,
                &snapshot,
                multisig.as_ref(),
                transaction,
                VerificationMode::IdOnly,
                now,
            )
            .await
            .map_err(|source| ChainError::TransactionRejected {
                transaction_id: transaction.id.clone(),
                source,
            })?;
            snapshot.balance = snapshot
                .balance
                .checked_sub(&spend_of(transaction))
                .unwrap_or_else(lib_types::Amount::zero);
        }
        sender_snapshots.insert(sender_address, snapshot);
    }

    Ok(BlockVerificationOutcome {
        sender_snapshots,
        delegate_changed_keys,
    })
}

/// Verify one peer-broadcast co-signature against the active block.
pub async fn verify_block_co_signature(
    store: &dyn ChainStore,
    crypto: &dyn CryptoClient,
    active_delegates: &[Delegate],
    block: &Block,
    signature: &BlockSignature,
) -> ChainResult<()> {
    if signature.block_id != block.id {
        return Err(ChainError::SignatureBlockMismatch);
    }
    if signature.signer_address == block.forger_address {
        return Err(ChainError::SignerIsForger {
            address: signature.signer_address.clone(),
        });
    }
    if !active_delegates
        .iter()
        .any(|delegate| delegate.address == signature.signer_address)
    {
        return Err(ChainError::SignerNotActiveDelegate {
            address: signature.signer_address.clone(),
        });
    }
    let signer_account = store.get_account(&signature.signer_address).await?;
    let key_known = signer_account.forging_public_key.as_deref()
        == Some(signature.forging_public_key.as_str())
        || signer_account.next_forging_public_key.as_deref()
            == Some(signature.forging_public_key.as_str());
    if !key_known {
        return Err(ChainError::ForgingKeyMismatch);
    }
    let verified = crypto
        .verify_block_signature(block, signature)
        .await
        .map_err(|err| ChainError::Crypto(err.to_string()))?;
    if !verified {
        return Err(ChainError::InvalidBlockSignature {
            address: signature.signer_address.clone(),
        });
    }
    Ok(())
}

/// Verify the co-signatures a fetched block carries and require a quorum of
/// distinct signers. Used while replaying peer blocks during catch-up.
pub async fn verify_enclosed_signatures(
    store: &dyn ChainStore,
    crypto: &dyn CryptoClient,
    active_delegates: &[Delegate],
    block: &Block,
    required: usize,
) -> ChainResult<()> {
    let mut distinct: Vec<&Address> = Vec::new();
    for signature in &block.signatures {
        if distinct.contains(&&signature.signer_address) {
            continue;
        }
        verify_block_co_signature(store, crypto, active_delegates, block, signature).await?;
        distinct.push(&signature.signer_address);
    }
    if distinct.len() < required {
        return Err(ChainError::NotEnoughBlockSignatures {
            provided: distinct.len(),
            required,
        });
    }
    Ok(())
}

pub(crate) async fn load_multisig_context(
    store: &dyn ChainStore,
    wallet: &Account,
) -> ChainResult<MultisigContext> {
    let member_addresses = store.get_multisig_wallet_members(&wallet.address).await?;
    let mut members = HashMap::new();
    for address in member_addresses {
        let account = store.get_account(&address).await?;
        members.insert(address, account);
    }
    Ok(MultisigContext {
        members,
        required_signature_count: wallet.required_signature_count.unwrap_or(0),
    })
}
