use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use dposd::{ChainModule, NodeConfig};
use lib_blockchain::MemoryStore;
use lib_consensus::testing::LoopbackChannel;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read config file {path}"))?;
            serde_json::from_str::<NodeConfig>(&raw).context("malformed config file")?
        }
        None => NodeConfig::default(),
    };

    // The default binary runs a standalone development chain on the
    // in-memory store and a loopback channel. Production deployments embed
    // ChainModule with a persistent store and a real peer mesh.
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(LoopbackChannel::new());
    let module = ChainModule::load(config, store, channel).await?;

    info!("node running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    module.unload().await?;
    Ok(())
}
