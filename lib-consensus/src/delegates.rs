//! Top active delegate cache.
//!
//! Holds the top-N delegates by vote weight and answers slot-to-forger
//! assignment. Rewritten only after block processing; read everywhere.

use std::sync::{Arc, RwLock};

use lib_blockchain::storage::{ChainStore, SortOrder, StoreResult};
use lib_types::{Address, Delegate, Timestamp};

/// Cache of the top `forger_count` delegates, ordered by descending vote
/// weight with the store's address tie-break.
pub struct ActiveDelegateCache {
    forger_count: usize,
    store: Arc<dyn ChainStore>,
    delegates: RwLock<Vec<Delegate>>,
}

impl ActiveDelegateCache {
    pub fn new(forger_count: usize, store: Arc<dyn ChainStore>) -> Self {
        Self {
            forger_count,
            store,
            delegates: RwLock::new(Vec::new()),
        }
    }

    /// Reload the top set from the store.
    pub async fn refresh(&self) -> StoreResult<()> {
        let top = self
            .store
            .get_delegates_by_vote_weight(0, self.forger_count, SortOrder::Desc)
            .await?;
        *self.delegates.write().expect("delegate cache poisoned") = top;
        Ok(())
    }

    pub fn active(&self) -> Vec<Delegate> {
        self.delegates
            .read()
            .expect("delegate cache poisoned")
            .clone()
    }

    pub fn is_active_delegate(&self, address: &Address) -> bool {
        self.delegates
            .read()
            .expect("delegate cache poisoned")
            .iter()
            .any(|delegate| &delegate.address == address)
    }

    /// The delegate assigned to forge the slot containing `timestamp`.
    pub fn forger_for_timestamp(
        &self,
        forging_interval: u64,
        timestamp: Timestamp,
    ) -> Option<Address> {
        let delegates = self.delegates.read().expect("delegate cache poisoned");
        if delegates.is_empty() || forging_interval == 0 {
            return None;
        }
        let slot = timestamp / forging_interval;
        let index = (slot % delegates.len() as u64) as usize;
        Some(delegates[index].address.clone())
    }
}
