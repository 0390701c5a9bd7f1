//! In-memory store backend.
//!
//! Backs development networks and the test suites. Layout mirrors what a
//! persistent backend would index: accounts and delegates by address,
//! blocks by id with a height index, transactions by id with their
//! containing block.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use lib_crypto::sha256_hex;
use lib_types::{Account, Address, Block, Delegate, Timestamp, Vote};

use super::{
    ChainStore, Genesis, SortOrder, StoreError, StoreResult, StoredTransaction,
};

#[derive(Default)]
struct MemoryStoreInner {
    initialized: bool,
    accounts: HashMap<Address, Account>,
    multisig_wallets: HashMap<Address, (Vec<Address>, u32)>,
    delegates: HashMap<Address, Delegate>,
    votes: HashMap<Address, HashSet<Address>>,
    blocks: HashMap<String, Block>,
    heights: BTreeMap<u64, String>,
    transactions: HashMap<String, StoredTransaction>,
}

/// BTreeMap/HashMap-backed [`ChainStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stripped(block: &Block) -> Block {
    let mut copy = block.clone();
    copy.signatures = Vec::new();
    copy
}

fn page<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn init(&self, genesis: &Genesis) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.initialized {
            return Ok(());
        }

        for entry in &genesis.accounts {
            let mut account = entry.account.clone();
            account.update_height = Some(0);
            inner.accounts.insert(account.address.clone(), account);
        }

        // Delegates are the genesis accounts that committed a forging key;
        // their starting weight accumulates from the seeded votes below.
        for entry in &genesis.accounts {
            if entry.account.forging_public_key.is_some() {
                inner.delegates.insert(
                    entry.account.address.clone(),
                    Delegate {
                        address: entry.account.address.clone(),
                        vote_weight: lib_types::Amount::zero(),
                        update_height: 0,
                    },
                );
            }
        }
        for entry in &genesis.accounts {
            for delegate_address in &entry.votes {
                let Some(delegate) = inner.delegates.get(delegate_address).cloned() else {
                    return Err(StoreError::InvalidAction {
                        reason: format!(
                            "genesis vote for unregistered delegate {delegate_address}"
                        ),
                    });
                };
                let mut delegate = delegate;
                delegate.vote_weight += &entry.account.balance;
                inner.delegates.insert(delegate_address.clone(), delegate);
                inner
                    .votes
                    .entry(entry.account.address.clone())
                    .or_default()
                    .insert(delegate_address.clone());
            }
        }

        // Synthetic tip every later block links back to.
        let genesis_id = sha256_hex(
            serde_json::to_string(genesis)
                .map_err(|err| StoreError::Backend(err.to_string()))?
                .as_bytes(),
        );
        let tip = Block {
            id: genesis_id.clone(),
            height: 0,
            timestamp: 0,
            previous_block_id: None,
            forger_address: Address::default(),
            forging_public_key: String::new(),
            next_forging_public_key: String::new(),
            next_forging_key_index: 0,
            transactions: Vec::new(),
            forger_signature: None,
            signatures: Vec::new(),
        };
        inner.heights.insert(0, genesis_id.clone());
        inner.blocks.insert(genesis_id, tip);
        inner.initialized = true;
        Ok(())
    }

    async fn destroy(&self) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        *inner = MemoryStoreInner::default();
        Ok(())
    }

    async fn get_account(&self, address: &Address) -> StoreResult<Account> {
        let inner = self.inner.read().await;
        inner
            .accounts
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::AccountDidNotExist {
                address: address.clone(),
            })
    }

    async fn upsert_account(&self, account: &Account) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .accounts
            .insert(account.address.clone(), account.clone());
        Ok(())
    }

    async fn get_accounts_by_balance(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<Account>> {
        let inner = self.inner.read().await;
        let mut accounts: Vec<Account> = inner.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| match order {
            SortOrder::Desc => b
                .balance
                .cmp(&a.balance)
                .then_with(|| a.address.cmp(&b.address)),
            SortOrder::Asc => a
                .balance
                .cmp(&b.balance)
                .then_with(|| a.address.cmp(&b.address)),
        });
        Ok(page(accounts, offset, limit))
    }

    async fn get_multisig_wallet_members(&self, address: &Address) -> StoreResult<Vec<Address>> {
        let inner = self.inner.read().await;
        inner
            .multisig_wallets
            .get(address)
            .map(|(members, _)| members.clone())
            .ok_or_else(|| StoreError::InvalidAction {
                reason: format!("account {address} is not a multisig wallet"),
            })
    }

    async fn register_multisig_wallet(
        &self,
        address: &Address,
        members: &[Address],
        required_signature_count: u32,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .multisig_wallets
            .insert(address.clone(), (members.to_vec(), required_signature_count));
        Ok(())
    }

    async fn get_delegate(&self, address: &Address) -> StoreResult<Delegate> {
        let inner = self.inner.read().await;
        inner
            .delegates
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::DelegateDidNotExist {
                address: address.clone(),
            })
    }

    async fn has_delegate(&self, address: &Address) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.delegates.contains_key(address))
    }

    async fn upsert_delegate(&self, delegate: &Delegate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .delegates
            .insert(delegate.address.clone(), delegate.clone());
        Ok(())
    }

    async fn get_delegates_by_vote_weight(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<Delegate>> {
        let inner = self.inner.read().await;
        let mut delegates: Vec<Delegate> = inner.delegates.values().cloned().collect();
        delegates.sort_by(|a, b| match order {
            SortOrder::Desc => b
                .vote_weight
                .cmp(&a.vote_weight)
                .then_with(|| a.address.cmp(&b.address)),
            SortOrder::Asc => a
                .vote_weight
                .cmp(&b.vote_weight)
                .then_with(|| a.address.cmp(&b.address)),
        });
        Ok(page(delegates, offset, limit))
    }

    async fn get_account_votes(&self, address: &Address) -> StoreResult<Vec<Address>> {
        let inner = self.inner.read().await;
        if !inner.accounts.contains_key(address) {
            return Err(StoreError::VoterAccountDidNotExist {
                address: address.clone(),
            });
        }
        let mut votes: Vec<Address> = inner
            .votes
            .get(address)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        votes.sort();
        Ok(votes)
    }

    async fn has_vote_for_delegate(
        &self,
        voter_address: &Address,
        delegate_address: &Address,
    ) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .votes
            .get(voter_address)
            .map(|set| set.contains(delegate_address))
            .unwrap_or(false))
    }

    async fn vote(&self, vote: &Vote) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let inserted = inner
            .votes
            .entry(vote.voter_address.clone())
            .or_default()
            .insert(vote.delegate_address.clone());
        if !inserted {
            return Err(StoreError::InvalidAction {
                reason: format!(
                    "{} already votes for {}",
                    vote.voter_address, vote.delegate_address
                ),
            });
        }
        Ok(())
    }

    async fn unvote(&self, vote: &Vote) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .votes
            .get_mut(&vote.voter_address)
            .map(|set| set.remove(&vote.delegate_address))
            .unwrap_or(false);
        if !removed {
            return Err(StoreError::InvalidAction {
                reason: format!(
                    "{} does not vote for {}",
                    vote.voter_address, vote.delegate_address
                ),
            });
        }
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<StoredTransaction> {
        let inner = self.inner.read().await;
        inner.transactions.get(transaction_id).cloned().ok_or_else(|| {
            StoreError::TransactionDidNotExist {
                transaction_id: transaction_id.to_string(),
            }
        })
    }

    async fn has_transaction(&self, transaction_id: &str) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.transactions.contains_key(transaction_id))
    }

    async fn get_transactions_by_timestamp(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<StoredTransaction>> {
        let inner = self.inner.read().await;
        let mut transactions: Vec<StoredTransaction> =
            inner.transactions.values().cloned().collect();
        transactions.sort_by(|a, b| match order {
            SortOrder::Asc => a
                .transaction
                .timestamp
                .cmp(&b.transaction.timestamp)
                .then_with(|| a.transaction.id.cmp(&b.transaction.id)),
            SortOrder::Desc => b
                .transaction
                .timestamp
                .cmp(&a.transaction.timestamp)
                .then_with(|| a.transaction.id.cmp(&b.transaction.id)),
        });
        Ok(page(transactions, offset, limit))
    }

    async fn get_inbound_transactions(
        &self,
        address: &Address,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<StoredTransaction>> {
        let all = self
            .get_transactions_by_timestamp(0, usize::MAX, order)
            .await?;
        Ok(page(
            all.into_iter()
                .filter(|stored| stored.transaction.recipient_address.as_ref() == Some(address))
                .collect(),
            offset,
            limit,
        ))
    }

    async fn get_outbound_transactions(
        &self,
        address: &Address,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<StoredTransaction>> {
        let all = self
            .get_transactions_by_timestamp(0, usize::MAX, order)
            .await?;
        Ok(page(
            all.into_iter()
                .filter(|stored| &stored.transaction.sender_address == address)
                .collect(),
            offset,
            limit,
        ))
    }

    async fn get_transactions_from_block(
        &self,
        block_id: &str,
    ) -> StoreResult<Vec<StoredTransaction>> {
        let inner = self.inner.read().await;
        let mut transactions: Vec<StoredTransaction> = inner
            .transactions
            .values()
            .filter(|stored| stored.block_id == block_id)
            .cloned()
            .collect();
        transactions.sort_by_key(|stored| stored.index_in_block);
        Ok(transactions)
    }

    async fn get_block(&self, block_id: &str) -> StoreResult<Block> {
        let inner = self.inner.read().await;
        inner
            .blocks
            .get(block_id)
            .cloned()
            .ok_or_else(|| StoreError::BlockDidNotExist {
                block_id: block_id.to_string(),
            })
    }

    async fn has_block(&self, block_id: &str) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.blocks.contains_key(block_id))
    }

    async fn get_block_at_height(&self, height: u64) -> StoreResult<Block> {
        let inner = self.inner.read().await;
        inner
            .heights
            .get(&height)
            .and_then(|id| inner.blocks.get(id))
            .map(stripped)
            .ok_or(StoreError::BlockHeightDidNotExist { height })
    }

    async fn get_blocks_from_height(&self, height: u64, limit: usize) -> StoreResult<Vec<Block>> {
        let inner = self.inner.read().await;
        Ok(inner
            .heights
            .range(height..)
            .take(limit)
            .filter_map(|(_, id)| inner.blocks.get(id))
            .map(stripped)
            .collect())
    }

    async fn get_signed_blocks_from_height(
        &self,
        height: u64,
        limit: usize,
    ) -> StoreResult<Vec<Block>> {
        let inner = self.inner.read().await;
        Ok(inner
            .heights
            .range(height..)
            .take(limit)
            .filter_map(|(_, id)| inner.blocks.get(id))
            .cloned()
            .collect())
    }

    async fn get_signed_block_at_height(&self, height: u64) -> StoreResult<Block> {
        let inner = self.inner.read().await;
        inner
            .heights
            .get(&height)
            .and_then(|id| inner.blocks.get(id))
            .cloned()
            .ok_or(StoreError::BlockHeightDidNotExist { height })
    }

    async fn get_blocks_between_heights(
        &self,
        from_height: u64,
        to_height: u64,
        limit: usize,
    ) -> StoreResult<Vec<Block>> {
        let inner = self.inner.read().await;
        Ok(inner
            .heights
            .range(from_height.saturating_add(1)..=to_height)
            .take(limit)
            .filter_map(|(_, id)| inner.blocks.get(id))
            .map(stripped)
            .collect())
    }

    async fn get_blocks_by_timestamp(
        &self,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> StoreResult<Vec<Block>> {
        let inner = self.inner.read().await;
        let mut blocks: Vec<Block> = inner.blocks.values().map(stripped).collect();
        blocks.sort_by(|a, b| match order {
            SortOrder::Asc => a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)),
            SortOrder::Desc => b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)),
        });
        Ok(page(blocks, offset, limit))
    }

    async fn get_last_block_at_timestamp(&self, timestamp: Timestamp) -> StoreResult<Block> {
        let inner = self.inner.read().await;
        inner
            .blocks
            .values()
            .filter(|block| block.timestamp <= timestamp)
            .max_by_key(|block| block.height)
            .map(stripped)
            .ok_or_else(|| StoreError::InvalidAction {
                reason: format!("no block at or before timestamp {timestamp}"),
            })
    }

    async fn get_max_block_height(&self) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.heights.keys().next_back().copied().unwrap_or(0))
    }

    async fn upsert_block(&self, block: &Block, _synched: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.heights.insert(block.height, block.id.clone());
        for (index, transaction) in block.transactions.iter().enumerate() {
            inner.transactions.insert(
                transaction.id.clone(),
                StoredTransaction {
                    transaction: transaction.clone(),
                    block_id: block.id.clone(),
                    index_in_block: index,
                },
            );
        }
        inner.blocks.insert(block.id.clone(), block.clone());
        Ok(())
    }
}
