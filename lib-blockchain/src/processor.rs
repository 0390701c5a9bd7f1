//! Deterministic block application.
//!
//! Applies a verified block to the store: balances, key advancement, vote
//! and wallet registrations, and the forger fee payout. Every account and
//! delegate write is guarded by `update_height < block.height`, which makes
//! re-processing an already absorbed block a no-op and lets catch-up replay
//! blocks safely.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::Zero;
use rand::seq::SliceRandom;
use tracing::debug;

use lib_types::{
    Account, AccountType, Address, Amount, Block, Delegate, Transaction, TransactionType, Vote,
};

use crate::config::ChainParams;
use crate::errors::{ChainError, ChainResult};
use crate::storage::{ChainStore, StoreError};

/// What block application reports back to the slot loop.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Every account as written (or as it stood, when the replay guard
    /// skipped the write). Feeds the mempool purge.
    pub updated_accounts: HashMap<Address, Account>,
    /// Sum of all transaction fees, credited to the forger.
    pub total_fees: Amount,
}

/// Applies verified blocks to the store.
pub struct BlockProcessor {
    params: Arc<ChainParams>,
    store: Arc<dyn ChainStore>,
}

/// Working view over the vote set while a block applies, so same-block
/// vote/unvote sequences resolve deterministically.
#[derive(Default)]
struct VoteLedger {
    adds: Vec<Vote>,
    removes: Vec<Vote>,
}

impl VoteLedger {
    fn queued_add(&self, vote: &Vote) -> bool {
        self.adds.contains(vote)
    }

    fn queued_remove(&self, vote: &Vote) -> bool {
        self.removes.contains(vote)
    }

    fn add_count(&self, voter: &Address) -> usize {
        self.adds
            .iter()
            .filter(|vote| &vote.voter_address == voter)
            .count()
    }
}

impl BlockProcessor {
    pub fn new(params: Arc<ChainParams>, store: Arc<dyn ChainStore>) -> Self {
        Self { params, store }
    }

    /// Apply `block` at its height. `synched` marks catch-up replay.
    pub async fn process_block(&self, block: &Block, synched: bool) -> ChainResult<ProcessOutcome> {
        let height = block.height;

        // Step 1: the union of every account the block touches.
        let mut accounts: HashMap<Address, Account> = HashMap::new();
        let mut order: Vec<Address> = Vec::new();
        let mut load = |address: Address| {
            if !order.contains(&address) {
                order.push(address);
            }
        };
        load(block.forger_address.clone());
        for signature in &block.signatures {
            load(signature.signer_address.clone());
        }
        for transaction in &block.transactions {
            load(transaction.sender_address.clone());
            if let Some(recipient) = &transaction.recipient_address {
                load(recipient.clone());
            }
            for packet in &transaction.signatures {
                load(packet.signer_address.clone());
            }
        }
        for address in &order {
            let account = match self.store.get_account(address).await {
                Ok(account) => account,
                Err(StoreError::AccountDidNotExist { .. }) => {
                    Account::default_for(address.clone())
                }
                Err(err) => return Err(err.into()),
            };
            accounts.insert(address.clone(), account);
        }
        let old_balances: HashMap<Address, Amount> = accounts
            .iter()
            .map(|(address, account)| (address.clone(), account.balance.clone()))
            .collect();

        // Step 2: forging-key advancement for the forger and every block
        // signer.
        advance_forging_keys(
            accounts
                .get_mut(&block.forger_address)
                .expect("forger account loaded"),
            &block.forging_public_key,
            &block.next_forging_public_key,
            block.next_forging_key_index,
        );
        for signature in &block.signatures {
            advance_forging_keys(
                accounts
                    .get_mut(&signature.signer_address)
                    .expect("signer account loaded"),
                &signature.forging_public_key,
                &signature.next_forging_public_key,
                signature.next_forging_key_index,
            );
        }

        // Step 3: transactions in block order.
        let mut total_fees = Amount::zero();
        let mut ledger = VoteLedger::default();
        let mut new_delegates: Vec<Address> = Vec::new();
        let mut wallet_registrations: Vec<(Address, Vec<Address>, u32)> = Vec::new();
        for transaction in &block.transactions {
            total_fees += &transaction.fee;
            self.apply_transaction(
                transaction,
                &mut accounts,
                &mut ledger,
                &mut new_delegates,
                &mut wallet_registrations,
            )
            .await?;
        }

        // Step 4: fees accrue to the forger.
        if let Some(forger) = accounts.get_mut(&block.forger_address) {
            forger.balance += &total_fees;
        }

        // Step 5: guarded account writes. Accounts the guard skips were
        // already written by an earlier processing of this block; surface
        // their stored state instead of the re-derived working copy.
        for address in &order {
            let account = accounts.get_mut(address).expect("account loaded");
            match account.update_height {
                Some(existing) if existing >= height => {
                    debug!(%address, existing, height, "replay guard skipped account write");
                    if let Ok(stored) = self.store.get_account(address).await {
                        *account = stored;
                    }
                    continue;
                }
                _ => {
                    account.update_height = Some(height);
                    self.store.upsert_account(account).await?;
                }
            }
        }
        for (wallet, members, required) in &wallet_registrations {
            self.store
                .register_multisig_wallet(wallet, members, *required)
                .await?;
        }

        // Step 6: votes and vote-weight maintenance.
        self.apply_votes(height, &accounts, &old_balances, &ledger, &new_delegates)
            .await?;

        // Step 7: persist the block, subsampling stored co-signatures.
        let mut persisted = block.clone();
        if persisted.signatures.len() > self.params.block_signatures_to_provide {
            let mut rng = rand::thread_rng();
            persisted.signatures = persisted
                .signatures
                .choose_multiple(&mut rng, self.params.block_signatures_to_provide)
                .cloned()
                .collect();
        }
        self.store.upsert_block(&persisted, synched).await?;

        Ok(ProcessOutcome {
            updated_accounts: accounts,
            total_fees,
        })
    }

    async fn apply_transaction(
        &self,
        transaction: &Transaction,
        accounts: &mut HashMap<Address, Account>,
        ledger: &mut VoteLedger,
        new_delegates: &mut Vec<Address>,
        wallet_registrations: &mut Vec<(Address, Vec<Address>, u32)>,
    ) -> ChainResult<()> {
        let sender_address = transaction.sender_address.clone();

        {
            let sender = accounts
                .get_mut(&sender_address)
                .expect("sender account loaded");
            sender.balance = sender
                .balance
                .checked_sub(&transaction.fee)
                .unwrap_or_else(Amount::zero);

            // Key advancement committed by the transaction itself.
            if transaction.is_multisig_sent() {
                // handled per packet below
            } else if let (Some(used), Some(next), Some(index)) = (
                &transaction.sig_public_key,
                &transaction.next_sig_public_key,
                transaction.next_sig_key_index,
            ) {
                sender.sig_public_key = Some(used.clone());
                sender.next_sig_public_key = Some(next.clone());
                sender.next_sig_key_index = index;
            }
        }
        for packet in &transaction.signatures {
            if let Some(member) = accounts.get_mut(&packet.signer_address) {
                member.multisig_public_key = Some(packet.multisig_public_key.clone());
                member.next_multisig_public_key = Some(packet.next_multisig_public_key.clone());
                member.next_multisig_key_index = packet.next_multisig_key_index;
            }
        }

        match transaction.transaction_type {
            TransactionType::Transfer => {
                let amount = transaction.amount_or_zero();
                {
                    let sender = accounts
                        .get_mut(&sender_address)
                        .expect("sender account loaded");
                    sender.balance = sender
                        .balance
                        .checked_sub(&amount)
                        .unwrap_or_else(Amount::zero);
                }
                if let Some(recipient_address) = &transaction.recipient_address {
                    let recipient = accounts
                        .get_mut(recipient_address)
                        .expect("recipient account loaded");
                    recipient.balance += &amount;
                }
            }
            TransactionType::Vote => {
                let Some(delegate_address) = transaction.delegate_address.clone() else {
                    return Ok(());
                };
                let vote = Vote {
                    voter_address: sender_address.clone(),
                    delegate_address,
                };
                // Invalid votes no-op; the fee already charged keeps them
                // from being free spam.
                if self.vote_is_applicable(&vote, ledger, new_delegates).await? {
                    ledger.adds.push(vote);
                } else {
                    debug!(transaction_id = %transaction.id, "vote not applicable, fee charged");
                }
            }
            TransactionType::Unvote => {
                let Some(delegate_address) = transaction.delegate_address.clone() else {
                    return Ok(());
                };
                let vote = Vote {
                    voter_address: sender_address.clone(),
                    delegate_address,
                };
                let standing = self
                    .store
                    .has_vote_for_delegate(&vote.voter_address, &vote.delegate_address)
                    .await?;
                let effective = (standing || ledger.queued_add(&vote)) && !ledger.queued_remove(&vote);
                if effective {
                    ledger.removes.push(vote);
                } else {
                    debug!(transaction_id = %transaction.id, "unvote not applicable, fee charged");
                }
            }
            TransactionType::RegisterSigDetails => {
                let sender = accounts
                    .get_mut(&sender_address)
                    .expect("sender account loaded");
                if let (Some(key), Some(next), Some(index)) = (
                    &transaction.new_sig_public_key,
                    &transaction.new_next_sig_public_key,
                    transaction.new_next_sig_key_index,
                ) {
                    sender.sig_public_key = Some(key.clone());
                    sender.next_sig_public_key = Some(next.clone());
                    sender.next_sig_key_index = index;
                }
            }
            TransactionType::RegisterMultisigDetails => {
                let sender = accounts
                    .get_mut(&sender_address)
                    .expect("sender account loaded");
                if let (Some(key), Some(next), Some(index)) = (
                    &transaction.new_multisig_public_key,
                    &transaction.new_next_multisig_public_key,
                    transaction.new_next_multisig_key_index,
                ) {
                    sender.multisig_public_key = Some(key.clone());
                    sender.next_multisig_public_key = Some(next.clone());
                    sender.next_multisig_key_index = index;
                }
            }
            TransactionType::RegisterForgingDetails => {
                let sender = accounts
                    .get_mut(&sender_address)
                    .expect("sender account loaded");
                if let (Some(key), Some(next), Some(index)) = (
                    &transaction.new_forging_public_key,
                    &transaction.new_next_forging_public_key,
                    transaction.new_next_forging_key_index,
                ) {
                    sender.forging_public_key = Some(key.clone());
                    sender.next_forging_public_key = Some(next.clone());
                    sender.next_forging_key_index = index;
                    if !new_delegates.contains(&sender_address) {
                        new_delegates.push(sender_address.clone());
                    }
                }
            }
            TransactionType::RegisterMultisigWallet => {
                let (Some(members), Some(required)) = (
                    transaction.member_addresses.clone(),
                    transaction.required_signature_count,
                ) else {
                    return Ok(());
                };
                if self.members_registrable(&members, accounts).await? {
                    let sender = accounts
                        .get_mut(&sender_address)
                        .expect("sender account loaded");
                    sender.account_type = AccountType::Multisig;
                    sender.required_signature_count = Some(required);
                    wallet_registrations.push((sender_address.clone(), members, required));
                } else {
                    debug!(
                        transaction_id = %transaction.id,
                        "wallet registration not applicable, fee charged"
                    );
                }
            }
        }
        Ok(())
    }

    /// A vote applies when the delegate exists (or registers in this very
    /// block), the voter does not already hold it, and the voter stays
    /// within the vote cap.
    async fn vote_is_applicable(
        &self,
        vote: &Vote,
        ledger: &VoteLedger,
        new_delegates: &[Address],
    ) -> ChainResult<bool> {
        if ledger.queued_add(vote) {
            return Ok(false);
        }
        let delegate_exists = self.store.has_delegate(&vote.delegate_address).await?
            || new_delegates.contains(&vote.delegate_address);
        if !delegate_exists {
            return Ok(false);
        }
        let standing = self
            .store
            .has_vote_for_delegate(&vote.voter_address, &vote.delegate_address)
            .await?;
        if standing && !ledger.queued_remove(vote) {
            return Ok(false);
        }
        let current = match self.store.get_account_votes(&vote.voter_address).await {
            Ok(votes) => votes.len(),
            Err(StoreError::VoterAccountDidNotExist { .. }) => 0,
            Err(err) => return Err(err.into()),
        };
        let effective = current + ledger.add_count(&vote.voter_address);
        Ok(effective < self.params.max_votes_per_account)
    }

    /// Every proposed wallet member must already carry a multisig key and
    /// must not itself be a multisig wallet.
    async fn members_registrable(
        &self,
        members: &[Address],
        accounts: &HashMap<Address, Account>,
    ) -> ChainResult<bool> {
        for address in members {
            let member = match accounts.get(address) {
                Some(account) => account.clone(),
                None => match self.store.get_account(address).await {
                    Ok(account) => account,
                    Err(StoreError::AccountDidNotExist { .. }) => return Ok(false),
                    Err(err) => return Err(err.into()),
                },
            };
            if member.multisig_public_key.is_none() || member.is_multisig() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Apply queued votes and fold balance deltas into delegate weights.
    async fn apply_votes(
        &self,
        height: u64,
        accounts: &HashMap<Address, Account>,
        old_balances: &HashMap<Address, Amount>,
        ledger: &VoteLedger,
        new_delegates: &[Address],
    ) -> ChainResult<()> {
        let mut weight_deltas: HashMap<Address, BigInt> = HashMap::new();

        // Balance movements of standing voters shift the weights of the
        // delegates they currently vote for.
        for (address, account) in accounts {
            let old = old_balances
                .get(address)
                .cloned()
                .unwrap_or_else(Amount::zero);
            let delta = account.balance.to_bigint() - old.to_bigint();
            if delta.is_zero() {
                continue;
            }
            let voted = match self.store.get_account_votes(address).await {
                Ok(votes) => votes,
                Err(StoreError::VoterAccountDidNotExist { .. }) => Vec::new(),
                Err(err) => return Err(err.into()),
            };
            for delegate_address in voted {
                *weight_deltas.entry(delegate_address).or_default() += &delta;
            }
        }

        // Delegates first registered by this block. `fresh` only holds the
        // ones actually inserted now, so replays keep the guard below.
        let mut fresh: HashSet<&Address> = HashSet::new();
        for address in new_delegates {
            if !self.store.has_delegate(address).await? {
                self.store
                    .upsert_delegate(&Delegate {
                        address: address.clone(),
                        vote_weight: Amount::zero(),
                        update_height: height,
                    })
                    .await?;
                fresh.insert(address);
            }
        }

        // A vote queued both ways in one block nets out to its initial
        // state; such pairs cancel before anything is applied.
        let adds: Vec<&Vote> = ledger
            .adds
            .iter()
            .filter(|vote| !ledger.queued_remove(vote))
            .collect();
        let removes: Vec<&Vote> = ledger
            .removes
            .iter()
            .filter(|vote| !ledger.queued_add(vote))
            .collect();

        // Explicit vote/unvote moves the voter's post-block balance on top
        // of the delta flow. Re-checking standing state keeps replay inert.
        for vote in adds {
            if self
                .store
                .has_vote_for_delegate(&vote.voter_address, &vote.delegate_address)
                .await?
            {
                continue;
            }
            self.store.vote(vote).await?;
            let balance = accounts
                .get(&vote.voter_address)
                .map(|account| account.balance.clone())
                .unwrap_or_else(Amount::zero);
            *weight_deltas
                .entry(vote.delegate_address.clone())
                .or_default() += balance.to_bigint();
        }
        for vote in removes {
            if !self
                .store
                .has_vote_for_delegate(&vote.voter_address, &vote.delegate_address)
                .await?
            {
                continue;
            }
            self.store.unvote(vote).await?;
            let balance = accounts
                .get(&vote.voter_address)
                .map(|account| account.balance.clone())
                .unwrap_or_else(Amount::zero);
            *weight_deltas
                .entry(vote.delegate_address.clone())
                .or_default() -= balance.to_bigint();
        }

        for (delegate_address, delta) in weight_deltas {
            if delta.is_zero() {
                continue;
            }
            let delegate = match self.store.get_delegate(&delegate_address).await {
                Ok(delegate) => delegate,
                Err(StoreError::DelegateDidNotExist { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            // Delegates first registered by this very block carry this
            // height already and still take their first weight update.
            if delegate.update_height >= height && !fresh.contains(&delegate_address) {
                debug!(address = %delegate_address, height, "replay guard skipped delegate write");
                continue;
            }
            let weight = delegate.vote_weight.to_bigint() + delta;
            self.store
                .upsert_delegate(&Delegate {
                    address: delegate_address,
                    vote_weight: Amount::from_bigint_clamped(&weight),
                    update_height: height,
                })
                .await?;
        }
        Ok(())
    }
}

fn advance_forging_keys(account: &mut Account, used: &str, next: &str, next_index: u64) {
    if account.forging_public_key.as_deref() == Some(used) {
        return;
    }
    account.forging_public_key = Some(used.to_string());
    account.next_forging_public_key = Some(next.to_string());
    account.next_forging_key_index = next_index;
}
