//! Chain module lifecycle.
//!
//! `ChainModule::load` wires the store, crypto clients, mempool, gossip,
//! and the forging loop together, advertises the node's capability flags,
//! and starts the background tasks. `unload` deactivates every poll loop,
//! waits for the slot loop to settle, and destroys the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lib_blockchain::storage::{ChainStore, Genesis};
use lib_blockchain::{
    BlockProcessor, ChainEvent, ChainEventBus, ChainParams, Forger, Mempool,
};
use lib_consensus::{
    ActiveDelegateCache, CatchUpEngine, ConsensusParams, EngineState, ForgingLoop, GossipHandlers,
    NetworkChannel, SlotClock, SlotStream,
};
use lib_crypto::{CryptoClient, DevConnectOptions, DevCryptoClient};
use lib_types::Address;

use crate::config::NodeConfig;
use crate::passphrase::{
    decrypt_passphrase, forging_key_index_from_env, password_from_env,
};
use crate::rpc::RpcApi;

pub struct ChainModule {
    pub config: NodeConfig,
    pub chain_params: Arc<ChainParams>,
    pub consensus_params: Arc<ConsensusParams>,
    pub store: Arc<dyn ChainStore>,
    pub channel: Arc<dyn NetworkChannel>,
    pub mempool: Arc<Mempool>,
    pub delegates: Arc<ActiveDelegateCache>,
    pub events: ChainEventBus,
    pub state: Arc<EngineState>,
    pub rpc: Arc<RpcApi>,
    is_active: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChainModule {
    /// Initialize storage from genesis and start the node.
    pub async fn load(
        config: NodeConfig,
        store: Arc<dyn ChainStore>,
        channel: Arc<dyn NetworkChannel>,
    ) -> Result<ChainModule> {
        config.validate().context("invalid node configuration")?;
        let chain_params = Arc::new(config.chain_params()?);
        let consensus_params = Arc::new(config.consensus_params());

        let genesis = load_genesis(&config)?;
        store
            .init(&genesis)
            .await
            .context("genesis initialization failed")?;

        let verifier: Arc<dyn CryptoClient> =
            Arc::new(DevCryptoClient::verifier(&config.network_symbol));
        let forging_clients = connect_forging_clients(&config)?;

        let mempool = Arc::new(Mempool::new(
            Arc::clone(&chain_params),
            Arc::clone(&store),
            Arc::clone(&verifier),
        ));
        let delegates = Arc::new(ActiveDelegateCache::new(
            config.forger_count,
            Arc::clone(&store),
        ));
        delegates.refresh().await?;

        let tip_height = store.get_max_block_height().await?;
        let tip = store.get_signed_block_at_height(tip_height).await?;
        let state = Arc::new(EngineState::new(tip));
        let events = ChainEventBus::new();
        let block_stream = Arc::new(SlotStream::new());
        let signature_stream = Arc::new(SlotStream::new());
        let is_active = Arc::new(AtomicBool::new(true));

        let processor = Arc::new(BlockProcessor::new(
            Arc::clone(&chain_params),
            Arc::clone(&store),
        ));
        let forger = Arc::new(Forger::new(Arc::clone(&chain_params), Arc::clone(&store)));
        let catch_up = Arc::new(CatchUpEngine {
            chain_params: Arc::clone(&chain_params),
            params: Arc::clone(&consensus_params),
            store: Arc::clone(&store),
            crypto: Arc::clone(&verifier),
            delegates: Arc::clone(&delegates),
            channel: Arc::clone(&channel),
            processor: Arc::clone(&processor),
            mempool: Arc::clone(&mempool),
            events: events.clone(),
        });

        let gossip = Arc::new(GossipHandlers {
            chain_params: Arc::clone(&chain_params),
            params: Arc::clone(&consensus_params),
            store: Arc::clone(&store),
            crypto: Arc::clone(&verifier),
            mempool: Arc::clone(&mempool),
            delegates: Arc::clone(&delegates),
            channel: Arc::clone(&channel),
            events: events.clone(),
            state: Arc::clone(&state),
            block_stream: Arc::clone(&block_stream),
            signature_stream: Arc::clone(&signature_stream),
        });

        let forging_loop = ForgingLoop {
            chain_params: Arc::clone(&chain_params),
            params: Arc::clone(&consensus_params),
            clock: SlotClock::new(config.forging_interval, config.time_poll_interval),
            store: Arc::clone(&store),
            crypto: Arc::clone(&verifier),
            forging_clients,
            mempool: Arc::clone(&mempool),
            forger,
            processor,
            delegates: Arc::clone(&delegates),
            channel: Arc::clone(&channel),
            events: events.clone(),
            state: Arc::clone(&state),
            block_stream: Arc::clone(&block_stream),
            signature_stream: Arc::clone(&signature_stream),
            catch_up,
            is_active: Arc::clone(&is_active),
        };

        let mut tasks = gossip.spawn(Arc::clone(&is_active));
        tasks.push(tokio::spawn(async move { forging_loop.run().await }));
        tasks.push(spawn_expiry_task(
            Arc::clone(&mempool),
            config.pending_transaction_expiry_check_interval,
            Arc::clone(&is_active),
        ));

        advertise_capabilities(&config, channel.as_ref()).await;

        let rpc = Arc::new(RpcApi::new(
            config.clone(),
            Arc::clone(&chain_params),
            Arc::clone(&store),
            Arc::clone(&mempool),
            Arc::clone(&delegates),
            Arc::clone(&channel),
            events.clone(),
        ));

        let tip_height = state.last_processed_block().height;
        events.publish(ChainEvent::Bootstrap { height: tip_height });
        info!(height = tip_height, "chain module loaded");

        Ok(ChainModule {
            config,
            chain_params,
            consensus_params,
            store,
            channel,
            mempool,
            delegates,
            events,
            state,
            rpc,
            is_active,
            tasks,
        })
    }

    /// Deactivate every loop, settle background tasks, destroy the store.
    ///
    /// The slot loop observes `is_active` at its next poll and exits on its
    /// own; subscription and expiry tasks park on channels and timers, so
    /// they are aborted after a short grace period.
    pub async fn unload(mut self) -> Result<()> {
        self.is_active.store(false, Ordering::SeqCst);
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_millis(500), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        self.store.destroy().await?;
        info!("chain module unloaded");
        Ok(())
    }
}

fn load_genesis(config: &NodeConfig) -> Result<Genesis> {
    let raw = std::fs::read_to_string(&config.genesis_path).with_context(|| {
        format!("cannot read genesis file {}", config.genesis_path.display())
    })?;
    let genesis: Genesis = serde_json::from_str(&raw).context("malformed genesis file")?;
    if genesis.network_symbol != config.network_symbol {
        return Err(anyhow!(
            "genesis network symbol {} does not match configured {}",
            genesis.network_symbol,
            config.network_symbol
        ));
    }
    Ok(genesis)
}

fn connect_forging_clients(config: &NodeConfig) -> Result<Vec<Arc<dyn CryptoClient>>> {
    let mut clients: Vec<Arc<dyn CryptoClient>> = Vec::new();
    for credential in &config.forging_credentials {
        let passphrase = match (
            &credential.forging_passphrase,
            &credential.encrypted_forging_passphrase,
        ) {
            (Some(plain), _) => plain.clone(),
            (None, Some(encrypted)) => {
                let password = password_from_env()?;
                decrypt_passphrase(encrypted, &password)?
            }
            (None, None) => unreachable!("rejected by config validation"),
        };
        let client = DevCryptoClient::connect(DevConnectOptions {
            passphrase,
            network_symbol: config.network_symbol.clone(),
            wallet_address: Some(Address::from(credential.wallet_address.as_str())),
            forging_key_index: forging_key_index_from_env(),
        })?;
        info!(wallet = %credential.wallet_address, "connected forging delegate");
        clients.push(Arc::new(client));
    }
    Ok(clients)
}

fn spawn_expiry_task(
    mempool: Arc<Mempool>,
    check_interval: u64,
    is_active: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(check_interval.max(1));
        loop {
            tokio::time::sleep(period).await;
            if !is_active.load(Ordering::SeqCst) {
                break;
            }
            let evicted = mempool.expire(lib_consensus::now_ms()).await;
            if evicted > 0 {
                info!(evicted, "expired pending transactions");
            }
        }
    })
}

/// Advertise how many co-signatures this node stores per block, so catch-up
/// peers can route signature-hungry fetches here.
async fn advertise_capabilities(config: &NodeConfig, channel: &dyn NetworkChannel) {
    let quorum =
        (config.forger_count as f64 * config.min_forger_block_signature_ratio).floor() as usize;
    let state = json!({
        "flags": [format!(
            "{}{}",
            config.block_signatures_indicator, config.block_signatures_to_provide
        )],
        "provides_all_block_signatures": config.block_signatures_to_provide >= config.forger_count,
        "provides_most_block_signatures": config.block_signatures_to_provide >= quorum,
    });
    if let Err(err) = channel.update_module_state(state).await {
        warn!(%err, "capability advertisement failed");
    }
}
