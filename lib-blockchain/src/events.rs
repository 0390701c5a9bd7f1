//! Chain event emission.
//!
//! Components that need to observe chain progress subscribe here; the slot
//! loop publishes after every processed or skipped slot, and gossip
//! publishes accepted transactions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use lib_types::{SimplifiedBlock, Timestamp, Transaction};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Chain-level events published by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChainEvent {
    /// The module finished loading and the chain tip is known.
    Bootstrap { height: u64 },
    /// A block was processed onto the chain.
    AddBlock { block: SimplifiedBlock },
    /// A slot passed without a processable block.
    SkipBlock { timestamp: Timestamp },
    /// A transaction was accepted into the pending pool.
    Transaction { transaction: Transaction },
}

impl std::fmt::Display for ChainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainEvent::Bootstrap { height } => write!(f, "bootstrap(height={height})"),
            ChainEvent::AddBlock { block } => write!(f, "addBlock(height={})", block.height),
            ChainEvent::SkipBlock { timestamp } => write!(f, "skipBlock(timestamp={timestamp})"),
            ChainEvent::Transaction { transaction } => {
                write!(f, "transaction(id={})", transaction.id)
            }
        }
    }
}

/// Fan-out bus for [`ChainEvent`]s.
#[derive(Clone)]
pub struct ChainEventBus {
    sender: broadcast::Sender<ChainEvent>,
}

impl ChainEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish, ignoring the no-subscriber case.
    pub fn publish(&self, event: ChainEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChainEventBus {
    fn default() -> Self {
        Self::new()
    }
}
