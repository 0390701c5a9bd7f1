//! Per-sender serial mempool.
//!
//! Pending transactions are verified strictly in arrival order per sender
//! while different senders verify concurrently. Each sender's stream keeps
//! an in-memory account snapshot whose balance discounts every already
//! accepted pending spend, plus the key-index windows that protect the
//! stateful signature scheme from ordering inversions.

pub mod stream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use lib_crypto::CryptoClient;
use lib_types::{Account, Address, Block, Timestamp, Transaction, TransactionType};

use crate::config::ChainParams;
use crate::storage::{ChainStore, StoreError};
use crate::validation::{
    authenticate_transaction, spend_of, MultisigContext, ValidationError, VerificationMode,
};
use stream::{PendingRecord, SenderStreamState};

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {transaction_id} is already pending")]
    DuplicatePending { transaction_id: String },

    #[error("transaction {transaction_id} is already processed")]
    AlreadyProcessed { transaction_id: String },

    #[error("sender {address} has too many unverified transactions in flight")]
    BackpressureExceeded { address: Address },

    #[error("sender {address} has reached the pending transaction cap")]
    PendingCapReached { address: Address },

    #[error("key index {index} conflicts with pending bound {bound}")]
    OrderingWindow { index: u64, bound: u64 },

    #[error("registerSigDetails requires an empty pending stream")]
    SigDetailsNotAlone,

    #[error("registerMultisigWallet requires an empty pending stream")]
    MultisigWalletNotAlone,

    #[error("sender is a signer on pending multisig transactions")]
    MemberDetailsWhileSigning,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type MempoolResult<T> = Result<T, MempoolError>;

struct SenderStream {
    address: Address,
    /// Submissions admitted past the backpressure gate but not yet verified.
    inflight: AtomicUsize,
    state: tokio::sync::Mutex<Option<SenderStreamState>>,
}

#[derive(Default)]
struct MempoolIndex {
    streams: HashMap<Address, Arc<SenderStream>>,
    /// Global pending map: transaction id to full signed transaction.
    pending: HashMap<String, PendingRecord>,
    /// How many pending multisig transactions each wallet member signs.
    multisig_signers: HashMap<Address, usize>,
}

/// The node's pool of not-yet-processed transactions.
pub struct Mempool {
    params: Arc<ChainParams>,
    store: Arc<dyn ChainStore>,
    crypto: Arc<dyn CryptoClient>,
    index: Mutex<MempoolIndex>,
}

impl Mempool {
    pub fn new(
        params: Arc<ChainParams>,
        store: Arc<dyn ChainStore>,
        crypto: Arc<dyn CryptoClient>,
    ) -> Self {
        Self {
            params,
            store,
            crypto,
            index: Mutex::new(MempoolIndex::default()),
        }
    }

    /// Admit, authenticate, and enqueue a freshly submitted transaction.
    pub async fn submit(&self, transaction: Transaction, now: Timestamp) -> MempoolResult<()> {
        if self.store.has_transaction(&transaction.id).await? {
            return Err(MempoolError::AlreadyProcessed {
                transaction_id: transaction.id.clone(),
            });
        }

        let sender = transaction.sender_address.clone();
        let stream = {
            let mut index = self.index.lock().expect("mempool index poisoned");
            if index.pending.contains_key(&transaction.id) {
                return Err(MempoolError::DuplicatePending {
                    transaction_id: transaction.id.clone(),
                });
            }
            if transaction.transaction_type == TransactionType::RegisterMultisigDetails
                && index.multisig_signers.get(&sender).copied().unwrap_or(0) > 0
            {
                return Err(MempoolError::MemberDetailsWhileSigning);
            }
            let stream = index
                .streams
                .entry(sender.clone())
                .or_insert_with(|| {
                    Arc::new(SenderStream {
                        address: sender.clone(),
                        inflight: AtomicUsize::new(0),
                        state: tokio::sync::Mutex::new(None),
                    })
                })
                .clone();
            if stream.inflight.load(Ordering::SeqCst)
                >= self.params.max_transaction_backpressure_per_account
            {
                return Err(MempoolError::BackpressureExceeded { address: sender });
            }
            stream.inflight.fetch_add(1, Ordering::SeqCst);
            stream
        };

        let outcome = self.verify_and_enqueue(&stream, transaction, now).await;
        stream.inflight.fetch_sub(1, Ordering::SeqCst);
        if outcome.is_err() {
            self.retire_if_idle(&stream).await;
        }
        outcome
    }

    /// Runs under the sender's serial lock: snapshot bookkeeping, ordering
    /// windows, and full authentication.
    async fn verify_and_enqueue(
        &self,
        stream: &SenderStream,
        transaction: Transaction,
        now: Timestamp,
    ) -> MempoolResult<()> {
        let mut guard = stream.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.fresh_state(&stream.address).await?);
        }
        let state = guard.as_mut().expect("state populated above");

        if state.pending.len() >= self.params.max_pending_transactions_per_account {
            return Err(MempoolError::PendingCapReached {
                address: stream.address.clone(),
            });
        }
        // Authentication-regime rewrites may not interleave with other
        // pending transactions from the same sender.
        match transaction.transaction_type {
            TransactionType::RegisterSigDetails if !state.pending.is_empty() => {
                return Err(MempoolError::SigDetailsNotAlone);
            }
            TransactionType::RegisterMultisigWallet if !state.pending.is_empty() => {
                return Err(MempoolError::MultisigWalletNotAlone);
            }
            _ => {}
        }

        authenticate_transaction(
            self.crypto.as_ref(),
            &self.params,
            &state.snapshot,
            state.multisig.as_ref(),
            &transaction,
            VerificationMode::Full,
            now,
        )
        .await?;

        state
            .admit_into_windows(&transaction)
            .map_err(|violation| MempoolError::OrderingWindow {
                index: violation.index,
                bound: violation.bound,
            })?;

        let spend = spend_of(&transaction);
        state.snapshot.balance = state
            .snapshot
            .balance
            .checked_sub(&spend)
            .unwrap_or_else(lib_types::Amount::zero);

        let record = PendingRecord {
            transaction,
            received_at: now,
        };
        state.pending.push(record.clone());

        let mut index = self.index.lock().expect("mempool index poisoned");
        for packet in &record.transaction.signatures {
            *index
                .multisig_signers
                .entry(packet.signer_address.clone())
                .or_insert(0) += 1;
        }
        index
            .pending
            .insert(record.transaction.id.clone(), record);
        Ok(())
    }

    async fn fresh_state(&self, address: &Address) -> MempoolResult<SenderStreamState> {
        let snapshot = match self.store.get_account(address).await {
            Ok(account) => account,
            Err(StoreError::AccountDidNotExist { .. }) => Account::default_for(address.clone()),
            Err(err) => return Err(err.into()),
        };
        let multisig = if snapshot.is_multisig() {
            Some(self.multisig_context(&snapshot).await?)
        } else {
            None
        };
        Ok(SenderStreamState::new(snapshot, multisig))
    }

    async fn multisig_context(&self, wallet: &Account) -> MempoolResult<MultisigContext> {
        let member_addresses = self
            .store
            .get_multisig_wallet_members(&wallet.address)
            .await?;
        let mut members = HashMap::new();
        for address in member_addresses {
            let account = self.store.get_account(&address).await?;
            members.insert(address, account);
        }
        Ok(MultisigContext {
            members,
            required_signature_count: wallet.required_signature_count.unwrap_or(0),
        })
    }

    async fn retire_if_idle(&self, stream: &Arc<SenderStream>) {
        let empty = {
            let guard = stream.state.lock().await;
            guard
                .as_ref()
                .map(|state| state.pending.is_empty())
                .unwrap_or(true)
        };
        if empty && stream.inflight.load(Ordering::SeqCst) == 0 {
            let mut index = self.index.lock().expect("mempool index poisoned");
            let still_idle = index
                .streams
                .get(&stream.address)
                .map(|existing| {
                    Arc::ptr_eq(existing, stream)
                        && existing.inflight.load(Ordering::SeqCst) == 0
                })
                .unwrap_or(false);
            if still_idle {
                index.streams.remove(&stream.address);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.index
            .lock()
            .expect("mempool index poisoned")
            .pending
            .len()
    }

    pub fn has_pending(&self, transaction_id: &str) -> bool {
        self.index
            .lock()
            .expect("mempool index poisoned")
            .pending
            .contains_key(transaction_id)
    }

    /// The full signed form of a pending transaction.
    pub fn get_signed_pending(&self, transaction_id: &str) -> Option<Transaction> {
        self.index
            .lock()
            .expect("mempool index poisoned")
            .pending
            .get(transaction_id)
            .map(|record| record.transaction.clone())
    }

    /// Pending transactions sent by `address`, oldest first.
    pub fn outbound_pending(&self, address: &Address) -> Vec<Transaction> {
        let index = self.index.lock().expect("mempool index poisoned");
        let mut records: Vec<&PendingRecord> = index
            .pending
            .values()
            .filter(|record| &record.transaction.sender_address == address)
            .collect();
        records.sort_by_key(|record| record.received_at);
        records
            .iter()
            .map(|record| record.transaction.clone())
            .collect()
    }

    /// Consistent per-sender snapshot for a forging pass, arrival order
    /// preserved within each sender.
    pub async fn forging_snapshot(&self) -> Vec<(Address, Vec<Transaction>)> {
        let streams: Vec<Arc<SenderStream>> = {
            let index = self.index.lock().expect("mempool index poisoned");
            index.streams.values().cloned().collect()
        };
        let mut snapshot = Vec::new();
        for stream in streams {
            let guard = stream.state.lock().await;
            if let Some(state) = guard.as_ref() {
                if !state.pending.is_empty() {
                    snapshot.push((
                        stream.address.clone(),
                        state
                            .pending
                            .iter()
                            .map(|record| record.transaction.clone())
                            .collect(),
                    ));
                }
            }
        }
        snapshot.sort_by(|(a, _), (b, _)| a.cmp(b));
        snapshot
    }

    /// Drop transactions included in `block` and any leftover pending
    /// transaction that the block's key mutations made unverifiable, then
    /// refresh sender snapshots against the updated accounts.
    pub async fn purge_for_block(&self, block: &Block, updated: &HashMap<Address, Account>) {
        let included: Vec<&Transaction> = block.transactions.iter().collect();
        {
            let mut index = self.index.lock().expect("mempool index poisoned");
            for transaction in &included {
                if let Some(record) = index.pending.remove(&transaction.id) {
                    release_signers(&mut index.multisig_signers, &record.transaction);
                }
            }
        }

        let streams: Vec<Arc<SenderStream>> = {
            let index = self.index.lock().expect("mempool index poisoned");
            index.streams.values().cloned().collect()
        };
        for stream in streams {
            let mut guard = stream.state.lock().await;
            let Some(state) = guard.as_mut() else { continue };

            state
                .pending
                .retain(|record| included.iter().all(|tx| tx.id != record.transaction.id));

            // A processed key rotation invalidates pending transactions
            // that still reference the superseded keys.
            let mut dropped: Vec<Transaction> = Vec::new();
            if let Some(account) = updated.get(&stream.address) {
                state.snapshot = account.clone();
                if let Some(context) = state.multisig.as_mut() {
                    for (address, member) in context.members.iter_mut() {
                        if let Some(fresh) = updated.get(address) {
                            *member = fresh.clone();
                        }
                    }
                    context.required_signature_count =
                        account.required_signature_count.unwrap_or(0);
                }
                let multisig = state.multisig.clone();
                let snapshot = state.snapshot.clone();
                state.pending.retain(|record| {
                    let keep = keys_still_match(&snapshot, multisig.as_ref(), &record.transaction);
                    if !keep {
                        dropped.push(record.transaction.clone());
                    }
                    keep
                });
                // Re-discount remaining pending spends from the fresh
                // balance.
                let mut balance = state.snapshot.balance.clone();
                for record in &state.pending {
                    balance = balance
                        .checked_sub(&spend_of(&record.transaction))
                        .unwrap_or_else(lib_types::Amount::zero);
                }
                state.snapshot.balance = balance;
            }
            state.rebuild_windows();

            if !dropped.is_empty() {
                debug!(
                    sender = %stream.address,
                    count = dropped.len(),
                    "evicted pending transactions invalidated by key rotation"
                );
            }

            let mut index = self.index.lock().expect("mempool index poisoned");
            for transaction in dropped {
                if let Some(record) = index.pending.remove(&transaction.id) {
                    release_signers(&mut index.multisig_signers, &record.transaction);
                }
            }
            let retire = state.pending.is_empty() && stream.inflight.load(Ordering::SeqCst) == 0;
            if retire {
                index.streams.remove(&stream.address);
            }
        }
    }

    /// Evict pending transactions older than the configured expiry.
    /// Returns how many were evicted.
    pub async fn expire(&self, now: Timestamp) -> usize {
        let horizon = now.saturating_sub(self.params.pending_transaction_expiry);
        let streams: Vec<Arc<SenderStream>> = {
            let index = self.index.lock().expect("mempool index poisoned");
            index.streams.values().cloned().collect()
        };
        let mut evicted = 0;
        for stream in streams {
            let mut guard = stream.state.lock().await;
            let Some(state) = guard.as_mut() else { continue };
            let mut expired: Vec<Transaction> = Vec::new();
            state.pending.retain(|record| {
                if record.received_at <= horizon {
                    expired.push(record.transaction.clone());
                    false
                } else {
                    true
                }
            });
            if expired.is_empty() {
                continue;
            }
            evicted += expired.len();
            // Expired spends return to the snapshot balance.
            for transaction in &expired {
                state.snapshot.balance += &spend_of(transaction);
            }
            state.rebuild_windows();

            let mut index = self.index.lock().expect("mempool index poisoned");
            for transaction in expired {
                if let Some(record) = index.pending.remove(&transaction.id) {
                    release_signers(&mut index.multisig_signers, &record.transaction);
                }
            }
            if state.pending.is_empty() && stream.inflight.load(Ordering::SeqCst) == 0 {
                index.streams.remove(&stream.address);
            }
        }
        evicted
    }
}

fn release_signers(signers: &mut HashMap<Address, usize>, transaction: &Transaction) {
    for packet in &transaction.signatures {
        if let Some(count) = signers.get_mut(&packet.signer_address) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                signers.remove(&packet.signer_address);
            }
        }
    }
}

/// Whether a pending transaction's keys still correspond to the account
/// state after a block updated it.
fn keys_still_match(
    sender: &Account,
    multisig: Option<&MultisigContext>,
    transaction: &Transaction,
) -> bool {
    if transaction.is_multisig_sent() {
        transaction.signatures.iter().all(|packet| {
            multisig
                .and_then(|context| context.members.get(&packet.signer_address))
                .map(|member| {
                    member.multisig_public_key.as_deref()
                        == Some(packet.multisig_public_key.as_str())
                        || member.next_multisig_public_key.as_deref()
                            == Some(packet.multisig_public_key.as_str())
                })
                .unwrap_or(false)
        })
    } else {
        match (&sender.sig_public_key, &transaction.sig_public_key) {
            (Some(current), Some(used)) => {
                used == current || sender.next_sig_public_key.as_deref() == Some(used.as_str())
            }
            // Account still keyless: the address-derived rule keeps holding.
            (None, Some(_)) => true,
            _ => false,
        }
    }
}
