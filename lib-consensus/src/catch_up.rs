//! Peer catch-up.
//!
//! Replays batched signed blocks fetched from peers until the local tip
//! stops lagging. Every batch must link onto the tip and survive a sampled
//! peer-consensus check before any block in it is verified and processed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};

use lib_blockchain::{
    verify_enclosed_signatures, verify_forged_block, BlockProcessor, ChainEvent, ChainEventBus,
    ChainParams, Mempool,
};
use lib_blockchain::storage::ChainStore;
use lib_crypto::CryptoClient;
use lib_types::Block;

use crate::clock::now_ms;
use crate::config::ConsensusParams;
use crate::delegates::ActiveDelegateCache;
use crate::errors::ConsensusResult;
use crate::network::{NetworkChannel, PROC_GET_SIGNED_BLOCKS_FROM_HEIGHT, PROC_HAS_BLOCK};
use crate::state::EngineState;

/// Where a catch-up run ended.
#[derive(Debug)]
pub struct CatchUpOutcome {
    pub last_height: u64,
    pub added_blocks: usize,
}

pub struct CatchUpEngine {
    pub chain_params: Arc<ChainParams>,
    pub params: Arc<ConsensusParams>,
    pub store: Arc<dyn ChainStore>,
    pub crypto: Arc<dyn CryptoClient>,
    pub delegates: Arc<ActiveDelegateCache>,
    pub channel: Arc<dyn NetworkChannel>,
    pub processor: Arc<BlockProcessor>,
    pub mempool: Arc<Mempool>,
    pub events: ChainEventBus,
}

impl CatchUpEngine {
    /// Fetch and replay peer blocks until caught up, aborted, or
    /// deactivated.
    pub async fn catch_up(
        &self,
        is_active: &AtomicBool,
        state: &EngineState,
    ) -> ConsensusResult<CatchUpOutcome> {
        let capability = self.params.signature_capability_flag();
        let mut added_blocks = 0usize;
        let mut fetch_failures = 0usize;
        let mut empty_confirmations = 0usize;

        loop {
            if !is_active.load(Ordering::SeqCst) {
                break;
            }
            let tip = state.last_processed_block();
            let response = self
                .channel
                .request(
                    PROC_GET_SIGNED_BLOCKS_FROM_HEIGHT,
                    json!({
                        "height": tip.height + 1,
                        "limit": self.params.fetch_block_limit,
                    }),
                    Some(&capability),
                )
                .await;

            let batch: Vec<Block> = match response
                .and_then(|value| {
                    serde_json::from_value(value).map_err(|err| {
                        crate::network::NetworkError::BadPayload(err.to_string())
                    })
                }) {
                Ok(batch) => batch,
                Err(err) => {
                    fetch_failures += 1;
                    debug!(%err, fetch_failures, "block fetch failed");
                    if fetch_failures > self.params.max_consecutive_block_fetch_failures {
                        warn!("too many consecutive block fetch failures, aborting catch-up");
                        break;
                    }
                    self.pause().await;
                    continue;
                }
            };

            if batch.is_empty() {
                empty_confirmations += 1;
                if empty_confirmations >= self.params.fetch_block_end_confirmations {
                    break;
                }
                self.pause().await;
                continue;
            }
            empty_confirmations = 0;

            if batch.len() > self.params.fetch_block_limit || !links_onto(&batch, &tip) {
                fetch_failures += 1;
                debug!(fetch_failures, "discarded a non-linking or oversized batch");
                if fetch_failures > self.params.max_consecutive_block_fetch_failures {
                    warn!("too many consecutive block fetch failures, aborting catch-up");
                    break;
                }
                self.pause().await;
                continue;
            }
            fetch_failures = 0;

            let last_in_batch = batch.last().expect("batch is non-empty");
            if !self.batch_confirmed_by_peers(&last_in_batch.id).await {
                warn!(
                    block_id = %last_in_batch.id,
                    "sampled peers did not confirm the batch tip, stopping catch-up"
                );
                break;
            }

            for block in batch {
                if !is_active.load(Ordering::SeqCst) {
                    break;
                }
                match self.replay_block(state, &block).await {
                    Ok(()) => {
                        added_blocks += 1;
                    }
                    Err(err) => {
                        warn!(block_id = %block.id, %err, "block replay failed, aborting catch-up");
                        return Ok(CatchUpOutcome {
                            last_height: state.last_processed_block().height,
                            added_blocks,
                        });
                    }
                }
            }
            self.pause().await;
        }

        let outcome = CatchUpOutcome {
            last_height: state.last_processed_block().height,
            added_blocks,
        };
        if outcome.added_blocks > 0 {
            info!(
                height = outcome.last_height,
                added = outcome.added_blocks,
                "caught up with the network"
            );
        }
        Ok(outcome)
    }

    /// Sample peers for `has_block` on the batch tip and require the
    /// configured confirmation ratio.
    async fn batch_confirmed_by_peers(&self, block_id: &str) -> bool {
        if self.params.catch_up_consensus_poll_count == 0 {
            return true;
        }
        let polls = (0..self.params.catch_up_consensus_poll_count).map(|_| {
            self.channel
                .request(PROC_HAS_BLOCK, json!({ "block_id": block_id }), None)
        });
        let confirmations = join_all(polls)
            .await
            .into_iter()
            .filter(|response| {
                matches!(response, Ok(value) if value.as_bool().unwrap_or(false))
            })
            .count();
        let required = (self.params.catch_up_consensus_poll_count as f64
            * self.params.catch_up_consensus_min_ratio)
            .ceil() as usize;
        confirmations >= required
    }

    /// Full verification and processing of one fetched block.
    async fn replay_block(&self, state: &EngineState, block: &Block) -> ConsensusResult<()> {
        self.delegates.refresh().await?;
        let active = self.delegates.active();
        let tip = state.last_processed_block();
        let expected_forger = self
            .delegates
            .forger_for_timestamp(self.params.forging_interval, block.timestamp)
            .ok_or(crate::errors::ConsensusError::NoActiveDelegates)?;

        let outcome = verify_forged_block(
            self.store.as_ref(),
            self.crypto.as_ref(),
            &self.chain_params,
            self.params.forging_interval,
            &expected_forger,
            block,
            &tip,
            now_ms(),
        )
        .await?;

        let quorum = self
            .params
            .signature_quorum(active.len())
            .min(self.params.block_signatures_to_fetch);
        verify_enclosed_signatures(
            self.store.as_ref(),
            self.crypto.as_ref(),
            &active,
            block,
            quorum,
        )
        .await?;

        if block.transactions.len() < self.chain_params.min_transactions_per_block
            && !outcome.delegate_changed_keys
        {
            return Err(crate::errors::ConsensusError::BelowMinimumTransactions {
                block_id: block.id.clone(),
            });
        }

        let processed = self.processor.process_block(block, true).await?;
        self.mempool
            .purge_for_block(block, &processed.updated_accounts)
            .await;
        self.delegates.refresh().await?;
        state.set_last_processed_block(block.clone());
        self.events.publish(ChainEvent::AddBlock {
            block: block.simplified(),
        });
        Ok(())
    }

    async fn pause(&self) {
        tokio::time::sleep(Duration::from_millis(self.params.fetch_block_pause)).await;
    }
}

fn links_onto(batch: &[Block], tip: &Block) -> bool {
    let mut previous_id = tip.id.as_str();
    let mut previous_height = tip.height;
    for block in batch {
        if block.previous_block_id.as_deref() != Some(previous_id)
            || block.height != previous_height + 1
        {
            return false;
        }
        previous_id = &block.id;
        previous_height = block.height;
    }
    true
}
