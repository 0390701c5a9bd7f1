//! Gossip ingestion.
//!
//! Handlers for the three peer-broadcast object kinds: transactions,
//! forged blocks, and block co-signatures. Handlers authenticate, update
//! shared slot state, feed the loop's wait streams, and re-broadcast with
//! a randomised delay. Failures are logged and swallowed so a malformed
//! peer message can never stall the node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lib_blockchain::{
    verify_block_co_signature, verify_forged_block, ChainEvent, ChainEventBus, ChainParams,
    Mempool,
};
use lib_blockchain::storage::ChainStore;
use lib_crypto::CryptoClient;
use lib_types::{signature_hash, Block, BlockSignature, Transaction};

use crate::clock::now_ms;
use crate::config::{ConsensusParams, PropagationMode};
use crate::delegates::ActiveDelegateCache;
use crate::network::{
    NetworkChannel, EVENT_BLOCK, EVENT_BLOCK_SIGNATURE, EVENT_TRANSACTION,
    PROC_GET_SIGNED_PENDING_TRANSACTION,
};
use crate::state::EngineState;
use crate::streams::SlotStream;

pub struct GossipHandlers {
    pub chain_params: Arc<ChainParams>,
    pub params: Arc<ConsensusParams>,
    pub store: Arc<dyn ChainStore>,
    pub crypto: Arc<dyn CryptoClient>,
    pub mempool: Arc<Mempool>,
    pub delegates: Arc<ActiveDelegateCache>,
    pub channel: Arc<dyn NetworkChannel>,
    pub events: ChainEventBus,
    pub state: Arc<EngineState>,
    pub block_stream: Arc<SlotStream<Block>>,
    pub signature_stream: Arc<SlotStream<BlockSignature>>,
}

impl GossipHandlers {
    /// Subscribe to the three gossip events and dispatch until the node
    /// deactivates.
    pub fn spawn(self: &Arc<Self>, is_active: Arc<AtomicBool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for event in [EVENT_TRANSACTION, EVENT_BLOCK, EVENT_BLOCK_SIGNATURE] {
            let handlers = Arc::clone(self);
            let is_active = Arc::clone(&is_active);
            handles.push(tokio::spawn(async move {
                let mut receiver = handlers.channel.subscribe(event).await;
                while is_active.load(Ordering::SeqCst) {
                    match receiver.recv().await {
                        Some(payload) => handlers.dispatch(event, payload).await,
                        None => break,
                    }
                }
            }));
        }
        handles
    }

    async fn dispatch(&self, event: &str, payload: Value) {
        match event {
            EVENT_TRANSACTION => self.handle_transaction(payload).await,
            EVENT_BLOCK => self.handle_block(payload).await,
            EVENT_BLOCK_SIGNATURE => self.handle_block_signature(payload).await,
            _ => {}
        }
    }

    /// Peer-broadcast transaction: parse, authenticate into the mempool,
    /// then relay.
    pub async fn handle_transaction(&self, payload: Value) {
        let transaction: Transaction = match serde_json::from_value(payload.clone()) {
            Ok(transaction) => transaction,
            Err(err) => {
                debug!(%err, "discarded malformed peer transaction");
                return;
            }
        };
        match self.mempool.submit(transaction.clone(), now_ms()).await {
            Ok(()) => {
                self.events.publish(ChainEvent::Transaction { transaction });
                self.propagate(EVENT_TRANSACTION, payload);
            }
            Err(err) => {
                debug!(%err, "rejected peer transaction");
            }
        }
    }

    /// Peer-broadcast block: verify against the tip, anchor its simplified
    /// transactions to known pending signatures, then hand it to the slot
    /// loop.
    pub async fn handle_block(&self, payload: Value) {
        let block: Block = match serde_json::from_value(payload.clone()) {
            Ok(block) => block,
            Err(err) => {
                debug!(%err, "discarded malformed peer block");
                return;
            }
        };

        // Double-forge defence: keep the first block of the slot, relay the
        // sibling exactly once so peers can detect too, never ingest it.
        if let Some(active) = self.state.active_block() {
            if block.timestamp == active.timestamp && block.id != active.id {
                if self.state.latch_double_forge(block.timestamp) {
                    warn!(
                        timestamp = block.timestamp,
                        first = %active.id,
                        second = %block.id,
                        "double-forged block observed"
                    );
                    self.propagate(EVENT_BLOCK, payload);
                }
                return;
            }
            if block.id == active.id {
                return;
            }
        }

        let tip = self.state.last_processed_block();
        let Some(expected_forger) = self
            .delegates
            .forger_for_timestamp(self.params.forging_interval, block.timestamp)
        else {
            return;
        };
        let outcome = verify_forged_block(
            self.store.as_ref(),
            self.crypto.as_ref(),
            &self.chain_params,
            self.params.forging_interval,
            &expected_forger,
            &block,
            &tip,
            now_ms(),
        )
        .await;
        if let Err(err) = outcome {
            debug!(block_id = %block.id, %err, "rejected peer block");
            return;
        }

        if !self.anchor_block_transactions(&block).await {
            return;
        }

        self.state.set_active_block(Some(block.clone()));
        self.block_stream.write(block);
        self.propagate(EVENT_BLOCK, payload);
    }

    /// Peer-broadcast co-signature for the active block.
    pub async fn handle_block_signature(&self, payload: Value) {
        let signature: BlockSignature = match serde_json::from_value(payload.clone()) {
            Ok(signature) => signature,
            Err(err) => {
                debug!(%err, "discarded malformed peer block signature");
                return;
            }
        };
        let Some(active) = self.state.active_block() else {
            return;
        };
        let verdict = verify_block_co_signature(
            self.store.as_ref(),
            self.crypto.as_ref(),
            &self.delegates.active(),
            &active,
            &signature,
        )
        .await;
        if let Err(err) = verdict {
            debug!(signer = %signature.signer_address, %err, "rejected peer block signature");
            return;
        }
        if !self.state.record_signer(signature.signer_address.clone()) {
            return;
        }
        self.signature_stream.write(signature);
        self.propagate(EVENT_BLOCK_SIGNATURE, payload);
    }

    /// Make sure every simplified transaction in `block` is anchored to a
    /// known full signature: fetch missing pending transactions from peers,
    /// then cross-check the carried signature hashes.
    async fn anchor_block_transactions(&self, block: &Block) -> bool {
        for transaction in &block.transactions {
            if self.mempool.has_pending(&transaction.id) {
                continue;
            }
            if self
                .store
                .has_transaction(&transaction.id)
                .await
                .unwrap_or(false)
            {
                continue;
            }
            if !self.fetch_pending_transaction(&transaction.id).await {
                warn!(
                    block_id = %block.id,
                    transaction_id = %transaction.id,
                    "could not obtain the signed form of an in-block transaction"
                );
                return false;
            }
        }

        for transaction in &block.transactions {
            if self
                .store
                .has_transaction(&transaction.id)
                .await
                .unwrap_or(false)
            {
                continue;
            }
            let Some(pending) = self.mempool.get_signed_pending(&transaction.id) else {
                return false;
            };
            if !signature_hashes_match(transaction, &pending) {
                warn!(
                    block_id = %block.id,
                    transaction_id = %transaction.id,
                    "in-block signature hash does not match the pending signature"
                );
                return false;
            }
        }
        true
    }

    async fn fetch_pending_transaction(&self, transaction_id: &str) -> bool {
        for attempt in 1..=self.params.max_consecutive_transaction_fetch_failures {
            let response = self
                .channel
                .request(
                    PROC_GET_SIGNED_PENDING_TRANSACTION,
                    serde_json::json!({ "transaction_id": transaction_id }),
                    None,
                )
                .await;
            match response {
                Ok(value) => match serde_json::from_value::<Transaction>(value) {
                    Ok(transaction) if transaction.id == transaction_id => {
                        match self.mempool.submit(transaction, now_ms()).await {
                            Ok(()) => return true,
                            Err(err) => {
                                debug!(transaction_id, %err, "fetched pending transaction rejected");
                                return false;
                            }
                        }
                    }
                    Ok(_) => {
                        debug!(transaction_id, attempt, "peer returned a different transaction");
                    }
                    Err(err) => {
                        debug!(transaction_id, attempt, %err, "malformed pending transaction");
                    }
                },
                Err(err) => {
                    debug!(transaction_id, attempt, %err, "pending transaction fetch failed");
                }
            }
        }
        false
    }

    /// Relay to peers after a randomised delay, so re-broadcasts across the
    /// mesh desynchronise.
    fn propagate(&self, event: &'static str, payload: Value) {
        if self.params.propagation_mode == PropagationMode::None {
            return;
        }
        let delay = if self.params.propagation_randomness > 0 {
            rand::thread_rng().gen_range(0..self.params.propagation_randomness)
        } else {
            0
        };
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if let Err(err) = channel.emit(event, payload, None).await {
                debug!(event, %err, "gossip relay failed");
            }
        });
    }
}

/// Compare the signature hashes a simplified transaction carries with the
/// signatures of its full pending form.
fn signature_hashes_match(simplified: &Transaction, pending: &Transaction) -> bool {
    if pending.is_multisig_sent() {
        simplified.signatures.iter().all(|packet| {
            pending
                .signatures
                .iter()
                .find(|full| full.signer_address == packet.signer_address)
                .and_then(|full| full.signature.as_deref())
                .map(|signature| {
                    packet.signature_hash.as_deref() == Some(signature_hash(signature).as_str())
                })
                .unwrap_or(false)
        })
    } else {
        match (
            &simplified.sender_signature_hash,
            &pending.sender_signature,
        ) {
            (Some(hash), Some(signature)) => hash == &signature_hash(signature),
            _ => false,
        }
    }
}
