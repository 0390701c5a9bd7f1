//! The per-slot forging loop.
//!
//! One iteration per slot: catch up with the network, wait for the slot
//! boundary, forge or receive the slot's block, collect delegate
//! co-signatures up to the quorum, then process. Liveness failures (missing
//! forger, signature shortfall) skip the slot and the loop moves on; only
//! deactivation stops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use lib_blockchain::{
    verify_block_co_signature, verify_forged_block, BlockProcessor, ChainEvent, ChainEventBus,
    ChainParams, Forger, Mempool,
};
use lib_blockchain::storage::ChainStore;
use lib_crypto::{CryptoClient, KeyType};
use lib_types::{Block, BlockSignature};

use crate::catch_up::CatchUpEngine;
use crate::clock::{now_ms, SlotClock};
use crate::config::{ConsensusParams, PropagationMode};
use crate::delegates::ActiveDelegateCache;
use crate::errors::{ConsensusError, ConsensusResult};
use crate::network::{NetworkChannel, EVENT_BLOCK, EVENT_BLOCK_SIGNATURE};
use crate::state::EngineState;
use crate::streams::SlotStream;

pub struct ForgingLoop {
    pub chain_params: Arc<ChainParams>,
    pub params: Arc<ConsensusParams>,
    pub clock: SlotClock,
    pub store: Arc<dyn ChainStore>,
    pub crypto: Arc<dyn CryptoClient>,
    /// Connected clients for every forging delegate this node hosts.
    pub forging_clients: Vec<Arc<dyn CryptoClient>>,
    pub mempool: Arc<Mempool>,
    pub forger: Arc<Forger>,
    pub processor: Arc<BlockProcessor>,
    pub delegates: Arc<ActiveDelegateCache>,
    pub channel: Arc<dyn NetworkChannel>,
    pub events: ChainEventBus,
    pub state: Arc<EngineState>,
    pub block_stream: Arc<SlotStream<Block>>,
    pub signature_stream: Arc<SlotStream<BlockSignature>>,
    pub catch_up: Arc<CatchUpEngine>,
    pub is_active: Arc<AtomicBool>,
}

impl ForgingLoop {
    /// Drive slot iterations until the node deactivates. Iteration errors
    /// are logged; the loop always advances to the next slot.
    pub async fn run(&self) {
        while self.is_active.load(Ordering::SeqCst) {
            if let Err(err) = self.iteration().await {
                warn!(%err, "slot iteration failed");
            }
        }
    }

    async fn iteration(&self) -> ConsensusResult<()> {
        // CATCH_UP
        let caught_up = self
            .catch_up
            .catch_up(&self.is_active, &self.state)
            .await?;
        if caught_up.added_blocks > 0 {
            debug!(
                height = caught_up.last_height,
                added = caught_up.added_blocks,
                "synchronised before slot"
            );
        }
        if self.params.auto_sync_forging_key_index {
            self.sync_forging_key_indexes().await;
        }

        // WAIT_SLOT
        let Some(slot_timestamp) = self
            .clock
            .wait_until_next_block_time_slot(&self.is_active)
            .await
        else {
            return Ok(());
        };

        self.delegates.refresh().await?;
        let active = self.delegates.active();
        if active.is_empty() {
            return Err(ConsensusError::NoActiveDelegates);
        }
        self.state.begin_slot();
        self.block_stream.drain().await;
        self.signature_stream.drain().await;

        let tip = self.state.last_processed_block();
        if slot_timestamp <= tip.timestamp {
            return Ok(());
        }
        let forger_address = self
            .delegates
            .forger_for_timestamp(self.params.forging_interval, slot_timestamp)
            .ok_or(ConsensusError::NoActiveDelegates)?;

        // FORGE_OR_RECEIVE
        let local_forger = self
            .forging_clients
            .iter()
            .find(|client| client.wallet_address() == &forger_address)
            .cloned();
        let active_block = if let Some(client) = local_forger {
            tokio::time::sleep(Duration::from_millis(
                self.params.forging_block_broadcast_delay,
            ))
            .await;
            let block = self
                .forger
                .forge_block(
                    client.as_ref(),
                    &self.mempool,
                    tip.height + 1,
                    slot_timestamp,
                    tip.id.clone(),
                    now_ms(),
                )
                .await?;
            info!(
                height = block.height,
                transactions = block.transactions.len(),
                "forged block for this slot"
            );
            self.state.set_active_block(Some(block.clone()));
            self.broadcast(EVENT_BLOCK, serde_json::to_value(&block).unwrap_or(Value::Null))
                .await;
            block
        } else {
            let window = Duration::from_millis(
                self.params.forging_block_broadcast_delay + self.params.propagation_timeout,
            );
            match self.block_stream.next_within(window).await {
                Some(block) => block,
                None => {
                    debug!(slot_timestamp, "no block arrived for this slot");
                    self.events.publish(ChainEvent::SkipBlock {
                        timestamp: slot_timestamp,
                    });
                    return Ok(());
                }
            }
        };

        // COLLECT_SIGS
        let required = self.params.signature_quorum(active.len());
        self.sign_as_local_delegates(&active_block, &forger_address)
            .await;
        let mut collected: Vec<BlockSignature> = Vec::new();
        let deadline = Instant::now()
            + Duration::from_millis(
                self.params.forging_signature_broadcast_delay + self.params.propagation_timeout,
            );
        while collected.len() < required {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.signature_stream.next_within(remaining).await {
                Some(signature) if signature.block_id == active_block.id => {
                    collected.push(signature);
                }
                Some(_) => {}
                None => break,
            }
        }
        if collected.len() < required {
            warn!(
                block_id = %active_block.id,
                collected = collected.len(),
                required,
                "signature quorum not reached, skipping slot"
            );
            self.events.publish(ChainEvent::SkipBlock {
                timestamp: slot_timestamp,
            });
            return Ok(());
        }
        let mut block = active_block;
        block.signatures = collected;
        self.state.set_last_fully_signed_block(block.clone());

        // PROCESS
        let outcome = verify_forged_block(
            self.store.as_ref(),
            self.crypto.as_ref(),
            &self.chain_params,
            self.params.forging_interval,
            &forger_address,
            &block,
            &tip,
            now_ms(),
        )
        .await?;
        if block.transactions.len() >= self.chain_params.min_transactions_per_block
            || outcome.delegate_changed_keys
        {
            let processed = self.processor.process_block(&block, false).await?;
            self.mempool
                .purge_for_block(&block, &processed.updated_accounts)
                .await;
            self.delegates.refresh().await?;
            self.state.set_last_processed_block(block.clone());
            info!(height = block.height, block_id = %block.id, "processed block");
            self.events.publish(ChainEvent::AddBlock {
                block: block.simplified(),
            });
        } else {
            self.events.publish(ChainEvent::SkipBlock {
                timestamp: slot_timestamp,
            });
        }
        Ok(())
    }

    /// Every hosted forging delegate that is an active non-forger signs the
    /// block, verifies its own signature, feeds the collection stream, and
    /// broadcasts after the signature delay.
    async fn sign_as_local_delegates(&self, block: &Block, forger_address: &lib_types::Address) {
        // A latched double-forge poisons the slot: never co-sign either
        // sibling.
        if self.state.last_double_forged_timestamp() == Some(block.timestamp) {
            warn!(
                timestamp = block.timestamp,
                "refusing to sign a block for a double-forged slot"
            );
            return;
        }
        let active = self.delegates.active();
        for client in &self.forging_clients {
            let signer = client.wallet_address().clone();
            if &signer == forger_address || !self.delegates.is_active_delegate(&signer) {
                continue;
            }
            let signature = match client.sign_block(block).await {
                Ok(signature) => signature,
                Err(err) => {
                    warn!(%signer, %err, "local block signing failed");
                    continue;
                }
            };
            let verdict = verify_block_co_signature(
                self.store.as_ref(),
                self.crypto.as_ref(),
                &active,
                block,
                &signature,
            )
            .await;
            if let Err(err) = verdict {
                warn!(%signer, %err, "own block signature failed verification");
                continue;
            }
            if !self.state.record_signer(signer.clone()) {
                continue;
            }
            self.signature_stream.write(signature.clone());
            let payload = serde_json::to_value(&signature).unwrap_or(Value::Null);
            let delay = self.params.forging_signature_broadcast_delay;
            let channel = Arc::clone(&self.channel);
            let propagate = self.params.propagation_mode != PropagationMode::None;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if propagate {
                    if let Err(err) = channel.emit(EVENT_BLOCK_SIGNATURE, payload, None).await {
                        debug!(%err, "block signature broadcast failed");
                    }
                }
            });
        }
    }

    /// Advance every hosted delegate's forging key index to the chain
    /// state.
    async fn sync_forging_key_indexes(&self) {
        for client in &self.forging_clients {
            let address = client.wallet_address().clone();
            let account = match self.store.get_account(&address).await {
                Ok(account) => account,
                Err(_) => continue,
            };
            match client.sync_key_index(KeyType::Forging, &account).await {
                Ok(true) => {
                    debug!(%address, index = client.forging_key_index(), "forging key index advanced");
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(%address, %err, "forging key index sync failed");
                }
            }
        }
    }

    async fn broadcast(&self, event: &str, payload: Value) {
        if self.params.propagation_mode == PropagationMode::None {
            return;
        }
        if let Err(err) = self.channel.emit(event, payload, None).await {
            warn!(event, %err, "broadcast failed");
        }
    }
}
