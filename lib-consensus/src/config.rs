//! Consensus timing and peer-exchange parameters.

/// Whether accepted gossip is re-broadcast to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    /// Re-broadcast after a randomised delay.
    Relay,
    /// Never re-broadcast (observer nodes, tests).
    None,
}

/// Parameters of the slot loop, gossip, and catch-up.
#[derive(Debug, Clone)]
pub struct ConsensusParams {
    /// Slot width in milliseconds; every block timestamp is a multiple.
    pub forging_interval: u64,
    /// Size of the top active delegate set.
    pub forger_count: usize,
    /// Fraction of active delegates whose co-signatures make a block fully
    /// signed. Must be at least 0.5 so two conflicting blocks can never
    /// both reach quorum.
    pub min_forger_block_signature_ratio: f64,
    /// Poll period of the slot clock, in milliseconds.
    pub time_poll_interval: u64,
    /// Delay before a forger broadcasts its freshly forged block.
    pub forging_block_broadcast_delay: u64,
    /// Delay before a delegate broadcasts its block co-signature.
    pub forging_signature_broadcast_delay: u64,
    /// How long to wait for peer-propagated objects beyond the broadcast
    /// delays.
    pub propagation_timeout: u64,
    /// Upper bound of the random re-broadcast delay.
    pub propagation_randomness: u64,
    pub propagation_mode: PropagationMode,
    /// Blocks requested per catch-up fetch.
    pub fetch_block_limit: usize,
    /// Pause between catch-up fetch rounds, in milliseconds.
    pub fetch_block_pause: u64,
    /// Consecutive empty fetches required to conclude the node is caught
    /// up.
    pub fetch_block_end_confirmations: usize,
    /// Minimum number of co-signatures a sync peer must advertise.
    pub block_signatures_to_fetch: usize,
    /// Capability-flag prefix advertised and matched for signature-rich
    /// peers (e.g. `bsi12`).
    pub block_signatures_indicator: String,
    pub max_consecutive_block_fetch_failures: usize,
    pub max_consecutive_transaction_fetch_failures: usize,
    /// Peers sampled to confirm a fetched batch's tip.
    pub catch_up_consensus_poll_count: usize,
    /// Fraction of sampled peers that must confirm the tip.
    pub catch_up_consensus_min_ratio: f64,
    /// Advance local forging key indexes to chain state after catch-up.
    pub auto_sync_forging_key_index: bool,
}

impl ConsensusParams {
    /// Distinct co-signatures required for a block to count as fully
    /// signed, given the current active delegate count.
    pub fn signature_quorum(&self, active_delegate_count: usize) -> usize {
        (active_delegate_count as f64 * self.min_forger_block_signature_ratio).floor() as usize
    }

    /// The capability flag advertised by nodes that store enough block
    /// co-signatures to serve catch-up.
    pub fn signature_capability_flag(&self) -> String {
        format!(
            "{}{}",
            self.block_signatures_indicator, self.block_signatures_to_fetch
        )
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            forging_interval: 30_000,
            forger_count: 21,
            min_forger_block_signature_ratio: 0.6,
            time_poll_interval: 200,
            forging_block_broadcast_delay: 2_000,
            forging_signature_broadcast_delay: 5_000,
            propagation_timeout: 15_000,
            propagation_randomness: 3_000,
            propagation_mode: PropagationMode::Relay,
            fetch_block_limit: 10,
            fetch_block_pause: 100,
            fetch_block_end_confirmations: 10,
            block_signatures_to_fetch: 12,
            block_signatures_indicator: "bsi".to_string(),
            max_consecutive_block_fetch_failures: 5,
            max_consecutive_transaction_fetch_failures: 3,
            catch_up_consensus_poll_count: 6,
            catch_up_consensus_min_ratio: 0.5,
            auto_sync_forging_key_index: true,
        }
    }
}
