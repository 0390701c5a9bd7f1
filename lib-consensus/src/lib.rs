//! Consensus package.
//!
//! Slot scheduling, delegate rotation, gossip ingestion, the per-slot
//! forging loop, and peer catch-up for the DPoS chain. Chain state itself
//! is owned by lib-blockchain; this crate decides when and with whose
//! signatures blocks enter it.

pub mod catch_up;
pub mod clock;
pub mod config;
pub mod delegates;
pub mod errors;
pub mod forging_loop;
pub mod gossip;
pub mod network;
pub mod state;
pub mod streams;
pub mod testing;

pub use catch_up::{CatchUpEngine, CatchUpOutcome};
pub use clock::{now_ms, SlotClock};
pub use config::{ConsensusParams, PropagationMode};
pub use delegates::ActiveDelegateCache;
pub use errors::{ConsensusError, ConsensusResult};
pub use forging_loop::ForgingLoop;
pub use gossip::GossipHandlers;
pub use network::{
    NetworkChannel, NetworkError, NetworkResult, EVENT_BLOCK, EVENT_BLOCK_SIGNATURE,
    EVENT_TRANSACTION, PROC_GET_SIGNED_BLOCKS_FROM_HEIGHT, PROC_GET_SIGNED_PENDING_TRANSACTION,
    PROC_HAS_BLOCK,
};
pub use state::EngineState;
pub use streams::SlotStream;
