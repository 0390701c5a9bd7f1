//! Peer network boundary.
//!
//! The consensus layer talks to the peer mesh exclusively through the
//! [`NetworkChannel`] trait: request/response RPC, fire-and-forget event
//! emission, and pub/sub subscriptions. Concrete transports are wired in by
//! the node; tests use the loopback channel in [`crate::testing`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Gossip event carrying a forged block.
pub const EVENT_BLOCK: &str = "block";
/// Gossip event carrying a delegate co-signature.
pub const EVENT_BLOCK_SIGNATURE: &str = "blockSignature";
/// Gossip event carrying a freshly signed transaction.
pub const EVENT_TRANSACTION: &str = "transaction";

/// Peer procedure: batched signed blocks from a height.
pub const PROC_GET_SIGNED_BLOCKS_FROM_HEIGHT: &str = "getSignedBlocksFromHeight";
/// Peer procedure: whether the peer holds a block id.
pub const PROC_HAS_BLOCK: &str = "hasBlock";
/// Peer procedure: full signed form of a pending transaction.
pub const PROC_GET_SIGNED_PENDING_TRANSACTION: &str = "getSignedPendingTransaction";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer request {procedure} timed out")]
    Timeout { procedure: String },

    #[error("no peer available for {procedure}")]
    NoPeer { procedure: String },

    #[error("peer returned an error for {procedure}: {message}")]
    Remote { procedure: String, message: String },

    #[error("malformed peer payload: {0}")]
    BadPayload(String),

    #[error("network channel is closed")]
    Closed,
}

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Request/response and pub/sub access to the peer mesh.
#[async_trait]
pub trait NetworkChannel: Send + Sync {
    /// Invoke `procedure` on one suitable peer. When `capability` is set,
    /// the peer must advertise that flag in its module state.
    async fn request(
        &self,
        procedure: &str,
        data: Value,
        capability: Option<&str>,
    ) -> NetworkResult<Value>;

    /// Broadcast `event` to up to `peer_limit` peers (all when `None`).
    async fn emit(&self, event: &str, data: Value, peer_limit: Option<usize>) -> NetworkResult<()>;

    /// Subscribe to an inbound gossip event stream.
    async fn subscribe(&self, event: &str) -> mpsc::Receiver<Value>;

    /// Advertise this module's state (capability flags) to the mesh.
    async fn update_module_state(&self, state: Value) -> NetworkResult<()>;
}
