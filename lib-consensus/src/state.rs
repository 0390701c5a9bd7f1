//! Shared slot-loop state.
//!
//! Gossip handlers and the forging loop coordinate through this state: the
//! chain tip, the slot's active block, the set of co-signers seen so far,
//! and the double-forge latch.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use lib_types::{Address, Block, Timestamp};

pub struct EngineState {
    last_processed_block: RwLock<Block>,
    last_fully_signed_block: Mutex<Option<Block>>,
    active_block: Mutex<Option<Block>>,
    received_signers: Mutex<HashSet<Address>>,
    last_double_forged_timestamp: Mutex<Option<Timestamp>>,
}

impl EngineState {
    pub fn new(tip: Block) -> Self {
        Self {
            last_processed_block: RwLock::new(tip),
            last_fully_signed_block: Mutex::new(None),
            active_block: Mutex::new(None),
            received_signers: Mutex::new(HashSet::new()),
            last_double_forged_timestamp: Mutex::new(None),
        }
    }

    pub fn last_fully_signed_block(&self) -> Option<Block> {
        self.last_fully_signed_block
            .lock()
            .expect("engine state poisoned")
            .clone()
    }

    pub fn set_last_fully_signed_block(&self, block: Block) {
        *self
            .last_fully_signed_block
            .lock()
            .expect("engine state poisoned") = Some(block);
    }

    pub fn last_processed_block(&self) -> Block {
        self.last_processed_block
            .read()
            .expect("engine state poisoned")
            .clone()
    }

    pub fn set_last_processed_block(&self, block: Block) {
        *self
            .last_processed_block
            .write()
            .expect("engine state poisoned") = block;
    }

    pub fn active_block(&self) -> Option<Block> {
        self.active_block
            .lock()
            .expect("engine state poisoned")
            .clone()
    }

    pub fn set_active_block(&self, block: Option<Block>) {
        *self.active_block.lock().expect("engine state poisoned") = block;
    }

    /// Record a co-signer; false when the signer was already counted.
    pub fn record_signer(&self, address: Address) -> bool {
        self.received_signers
            .lock()
            .expect("engine state poisoned")
            .insert(address)
    }

    pub fn signer_count(&self) -> usize {
        self.received_signers
            .lock()
            .expect("engine state poisoned")
            .len()
    }

    /// Reset the per-slot fields at slot start.
    pub fn begin_slot(&self) {
        self.set_active_block(None);
        self.received_signers
            .lock()
            .expect("engine state poisoned")
            .clear();
    }

    pub fn last_double_forged_timestamp(&self) -> Option<Timestamp> {
        *self
            .last_double_forged_timestamp
            .lock()
            .expect("engine state poisoned")
    }

    /// Latch a double-forge observation; false when that slot timestamp
    /// was already latched (the sibling was propagated before).
    pub fn latch_double_forge(&self, timestamp: Timestamp) -> bool {
        let mut latch = self
            .last_double_forged_timestamp
            .lock()
            .expect("engine state poisoned");
        if *latch == Some(timestamp) {
            return false;
        }
        *latch = Some(timestamp);
        true
    }
}
