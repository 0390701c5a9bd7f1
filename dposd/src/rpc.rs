//! Public RPC surface.
//!
//! Read-only queries over the store and mempool plus transaction
//! submission. Every listing query sanitizes its offset/limit against the
//! configured API caps before touching the store. Failures surface as
//! named invalid-action errors.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use lib_blockchain::storage::{ChainStore, SortOrder, StoreError};
use lib_blockchain::{ChainEvent, ChainEventBus, ChainParams, Mempool};
use lib_consensus::{now_ms, ActiveDelegateCache, NetworkChannel, EVENT_TRANSACTION};
use lib_types::{Address, Timestamp, Transaction, TransactionType};

use crate::config::NodeConfig;

/// RPC failure with a stable, client-visible error name.
#[derive(Debug, Error)]
#[error("{name}: {message}")]
pub struct RpcError {
    pub name: &'static str,
    pub message: String,
}

impl RpcError {
    fn new(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
        }
    }

    fn invalid_query(message: impl Into<String>) -> Self {
        Self::new("InvalidQueryError", message)
    }
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        let name = match &err {
            StoreError::AccountDidNotExist { .. } => "AccountDidNotExistError",
            StoreError::BlockDidNotExist { .. } | StoreError::BlockHeightDidNotExist { .. } => {
                "BlockDidNotExistError"
            }
            StoreError::TransactionDidNotExist { .. } => "TransactionDidNotExistError",
            StoreError::VoterAccountDidNotExist { .. } => "VoterAccountDidNotExistError",
            StoreError::DelegateDidNotExist { .. } => "DelegateDidNotExistError",
            _ => "InvalidActionError",
        };
        RpcError::new(name, err.to_string())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Whether a caller is rate-capped as public or private.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiScope {
    Public,
    Private,
}

pub struct RpcApi {
    config: NodeConfig,
    params: Arc<ChainParams>,
    store: Arc<dyn ChainStore>,
    mempool: Arc<Mempool>,
    delegates: Arc<ActiveDelegateCache>,
    channel: Arc<dyn NetworkChannel>,
    events: ChainEventBus,
}

impl RpcApi {
    pub fn new(
        config: NodeConfig,
        params: Arc<ChainParams>,
        store: Arc<dyn ChainStore>,
        mempool: Arc<Mempool>,
        delegates: Arc<ActiveDelegateCache>,
        channel: Arc<dyn NetworkChannel>,
        events: ChainEventBus,
    ) -> Self {
        Self {
            config,
            params,
            store,
            mempool,
            delegates,
            channel,
            events,
        }
    }

    /// Clamp paging arguments to the caps for the caller's scope.
    fn sanitize_paging(
        &self,
        offset: Option<usize>,
        limit: Option<usize>,
        scope: ApiScope,
    ) -> RpcResult<(usize, usize)> {
        let (max_limit, max_offset) = match scope {
            ApiScope::Public => (self.config.max_public_api_limit, self.config.max_public_api_offset),
            ApiScope::Private => (
                self.config.max_private_api_limit,
                self.config.max_private_api_offset,
            ),
        };
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(self.config.api_limit);
        if limit == 0 || limit > max_limit {
            return Err(RpcError::invalid_query(format!(
                "limit must be between 1 and {max_limit}"
            )));
        }
        if offset > max_offset {
            return Err(RpcError::invalid_query(format!(
                "offset must not exceed {max_offset}"
            )));
        }
        Ok((offset, limit))
    }

    pub fn get_network_symbol(&self) -> &str {
        &self.config.network_symbol
    }

    // --- accounts ---

    pub async fn get_account(&self, address: &Address) -> RpcResult<Value> {
        let account = self.store.get_account(address).await?;
        Ok(serde_json::to_value(account).unwrap_or(Value::Null))
    }

    pub async fn get_accounts_by_balance(
        &self,
        offset: Option<usize>,
        limit: Option<usize>,
        order: SortOrder,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (offset, limit) = self.sanitize_paging(offset, limit, scope)?;
        let accounts = self
            .store
            .get_accounts_by_balance(offset, limit, order)
            .await?;
        Ok(serde_json::to_value(accounts).unwrap_or(Value::Null))
    }

    pub async fn get_multisig_wallet_members(&self, address: &Address) -> RpcResult<Value> {
        let members = self
            .store
            .get_multisig_wallet_members(address)
            .await
            .map_err(|err| match err {
                StoreError::InvalidAction { .. } => RpcError::new(
                    "AccountWasNotMultisigError",
                    format!("account {address} is not a multisig wallet"),
                ),
                other => other.into(),
            })?;
        Ok(serde_json::to_value(members).unwrap_or(Value::Null))
    }

    pub async fn get_min_multisig_required_signatures(
        &self,
        address: &Address,
    ) -> RpcResult<Value> {
        let account = self.store.get_account(address).await?;
        match account.required_signature_count {
            Some(count) if account.is_multisig() => Ok(json!(count)),
            _ => Err(RpcError::new(
                "AccountWasNotMultisigError",
                format!("account {address} is not a multisig wallet"),
            )),
        }
    }

    // --- pending transactions ---

    pub fn get_signed_pending_transaction(&self, transaction_id: &str) -> RpcResult<Value> {
        match self.mempool.get_signed_pending(transaction_id) {
            Some(transaction) => Ok(serde_json::to_value(transaction).unwrap_or(Value::Null)),
            None => Err(RpcError::new(
                "PendingTransactionDidNotExistError",
                format!("transaction {transaction_id} is not pending"),
            )),
        }
    }

    pub fn get_outbound_pending_transactions(
        &self,
        address: &Address,
        offset: Option<usize>,
        limit: Option<usize>,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (offset, limit) = self.sanitize_paging(offset, limit, scope)?;
        let pending: Vec<Transaction> = self
            .mempool
            .outbound_pending(address)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect();
        Ok(serde_json::to_value(pending).unwrap_or(Value::Null))
    }

    pub fn get_pending_transaction_count(&self) -> usize {
        self.mempool.pending_count()
    }

    /// Submit a freshly signed transaction on behalf of a client.
    pub async fn post_transaction(&self, transaction: Transaction) -> RpcResult<()> {
        self.mempool
            .submit(transaction.clone(), now_ms())
            .await
            .map_err(|err| {
                debug!(%err, "posted transaction rejected");
                RpcError::new("InvalidTransactionError", err.to_string())
            })?;
        self.events.publish(ChainEvent::Transaction {
            transaction: transaction.clone(),
        });
        let payload = serde_json::to_value(&transaction).unwrap_or(Value::Null);
        if let Err(err) = self.channel.emit(EVENT_TRANSACTION, payload, None).await {
            debug!(%err, "posted transaction broadcast failed");
        }
        Ok(())
    }

    // --- processed transactions ---

    pub async fn get_transaction(&self, transaction_id: &str) -> RpcResult<Value> {
        let stored = self.store.get_transaction(transaction_id).await?;
        Ok(serde_json::to_value(stored).unwrap_or(Value::Null))
    }

    pub async fn get_transactions_by_timestamp(
        &self,
        offset: Option<usize>,
        limit: Option<usize>,
        order: SortOrder,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (offset, limit) = self.sanitize_paging(offset, limit, scope)?;
        let transactions = self
            .store
            .get_transactions_by_timestamp(offset, limit, order)
            .await?;
        Ok(serde_json::to_value(transactions).unwrap_or(Value::Null))
    }

    pub async fn get_inbound_transactions(
        &self,
        address: &Address,
        offset: Option<usize>,
        limit: Option<usize>,
        order: SortOrder,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (offset, limit) = self.sanitize_paging(offset, limit, scope)?;
        let transactions = self
            .store
            .get_inbound_transactions(address, offset, limit, order)
            .await?;
        Ok(serde_json::to_value(transactions).unwrap_or(Value::Null))
    }

    pub async fn get_outbound_transactions(
        &self,
        address: &Address,
        offset: Option<usize>,
        limit: Option<usize>,
        order: SortOrder,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (offset, limit) = self.sanitize_paging(offset, limit, scope)?;
        let transactions = self
            .store
            .get_outbound_transactions(address, offset, limit, order)
            .await?;
        Ok(serde_json::to_value(transactions).unwrap_or(Value::Null))
    }

    pub async fn get_transactions_from_block(&self, block_id: &str) -> RpcResult<Value> {
        let transactions = self.store.get_transactions_from_block(block_id).await?;
        Ok(serde_json::to_value(transactions).unwrap_or(Value::Null))
    }

    pub async fn get_inbound_transactions_from_block(
        &self,
        address: &Address,
        block_id: &str,
    ) -> RpcResult<Value> {
        let transactions = self.store.get_transactions_from_block(block_id).await?;
        let inbound: Vec<_> = transactions
            .into_iter()
            .filter(|stored| stored.transaction.recipient_address.as_ref() == Some(address))
            .collect();
        Ok(serde_json::to_value(inbound).unwrap_or(Value::Null))
    }

    pub async fn get_outbound_transactions_from_block(
        &self,
        address: &Address,
        block_id: &str,
    ) -> RpcResult<Value> {
        let transactions = self.store.get_transactions_from_block(block_id).await?;
        let outbound: Vec<_> = transactions
            .into_iter()
            .filter(|stored| &stored.transaction.sender_address == address)
            .collect();
        Ok(serde_json::to_value(outbound).unwrap_or(Value::Null))
    }

    // --- blocks ---

    pub async fn get_last_block_at_timestamp(&self, timestamp: Timestamp) -> RpcResult<Value> {
        let block = self.store.get_last_block_at_timestamp(timestamp).await?;
        Ok(serde_json::to_value(block).unwrap_or(Value::Null))
    }

    pub async fn get_max_block_height(&self) -> RpcResult<u64> {
        Ok(self.store.get_max_block_height().await?)
    }

    pub async fn get_blocks_from_height(
        &self,
        height: u64,
        limit: Option<usize>,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (_, limit) = self.sanitize_paging(None, limit, scope)?;
        let blocks = self.store.get_blocks_from_height(height, limit).await?;
        Ok(serde_json::to_value(blocks).unwrap_or(Value::Null))
    }

    pub async fn get_signed_blocks_from_height(
        &self,
        height: u64,
        limit: Option<usize>,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (_, limit) = self.sanitize_paging(None, limit, scope)?;
        let blocks = self
            .store
            .get_signed_blocks_from_height(height, limit)
            .await?;
        Ok(serde_json::to_value(blocks).unwrap_or(Value::Null))
    }

    pub async fn get_blocks_between_heights(
        &self,
        from_height: u64,
        to_height: u64,
        limit: Option<usize>,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (_, limit) = self.sanitize_paging(None, limit, scope)?;
        let blocks = self
            .store
            .get_blocks_between_heights(from_height, to_height, limit)
            .await?;
        Ok(serde_json::to_value(blocks).unwrap_or(Value::Null))
    }

    pub async fn get_block_at_height(&self, height: u64) -> RpcResult<Value> {
        let block = self.store.get_block_at_height(height).await?;
        Ok(serde_json::to_value(block).unwrap_or(Value::Null))
    }

    pub async fn get_block(&self, block_id: &str) -> RpcResult<Value> {
        let block = self.store.get_block(block_id).await?;
        Ok(serde_json::to_value(block).unwrap_or(Value::Null))
    }

    pub async fn has_block(&self, block_id: &str) -> RpcResult<bool> {
        Ok(self.store.has_block(block_id).await?)
    }

    pub async fn get_blocks_by_timestamp(
        &self,
        offset: Option<usize>,
        limit: Option<usize>,
        order: SortOrder,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (offset, limit) = self.sanitize_paging(offset, limit, scope)?;
        let blocks = self
            .store
            .get_blocks_by_timestamp(offset, limit, order)
            .await?;
        Ok(serde_json::to_value(blocks).unwrap_or(Value::Null))
    }

    // --- delegates ---

    pub async fn get_delegate(&self, address: &Address) -> RpcResult<Value> {
        let delegate = self.store.get_delegate(address).await?;
        Ok(serde_json::to_value(delegate).unwrap_or(Value::Null))
    }

    pub async fn get_delegates_by_vote_weight(
        &self,
        offset: Option<usize>,
        limit: Option<usize>,
        order: SortOrder,
        scope: ApiScope,
    ) -> RpcResult<Value> {
        let (offset, limit) = self.sanitize_paging(offset, limit, scope)?;
        let delegates = self
            .store
            .get_delegates_by_vote_weight(offset, limit, order)
            .await?;
        Ok(serde_json::to_value(delegates).unwrap_or(Value::Null))
    }

    /// The currently cached top active delegate set.
    pub fn get_forging_delegates(&self) -> RpcResult<Value> {
        Ok(serde_json::to_value(self.delegates.active()).unwrap_or(Value::Null))
    }

    pub async fn get_account_votes(&self, address: &Address) -> RpcResult<Value> {
        let votes = self.store.get_account_votes(address).await?;
        Ok(serde_json::to_value(votes).unwrap_or(Value::Null))
    }

    // --- introspection ---

    pub fn get_min_fees(&self) -> Value {
        let per_type: serde_json::Map<String, Value> = TransactionType::ALL
            .iter()
            .map(|transaction_type| {
                (
                    transaction_type.as_str().to_string(),
                    json!(self.params.min_fee(*transaction_type).to_string()),
                )
            })
            .collect();
        json!({
            "min_transaction_fees": per_type,
            "min_multisig_registration_fee_per_member":
                self.params.min_multisig_registration_fee_per_member.to_string(),
            "min_multisig_transaction_fee_per_member":
                self.params.min_multisig_transaction_fee_per_member.to_string(),
        })
    }

    /// The effective module options, for operators and client tooling.
    pub fn get_module_options(&self) -> Value {
        json!({
            "network_symbol": self.config.network_symbol,
            "forging_interval": self.config.forging_interval,
            "forger_count": self.config.forger_count,
            "min_forger_block_signature_ratio": self.config.min_forger_block_signature_ratio,
            "block_signatures_to_provide": self.config.block_signatures_to_provide,
            "block_signatures_to_fetch": self.config.block_signatures_to_fetch,
            "min_transactions_per_block": self.config.min_transactions_per_block,
            "max_transactions_per_block": self.config.max_transactions_per_block,
            "max_votes_per_account": self.config.max_votes_per_account,
            "max_pending_transactions_per_account": self.config.max_pending_transactions_per_account,
            "pending_transaction_expiry": self.config.pending_transaction_expiry,
        })
    }
}
