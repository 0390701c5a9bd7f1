//! Slot clock.
//!
//! Maps wall-clock time to slot indexes and provides the cooperative
//! per-slot wait the forging loop parks on. Waits poll so a deactivated
//! node falls through within one poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lib_types::Timestamp;

/// Wall-clock milliseconds since the UNIX epoch.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Fixed-width slot schedule.
#[derive(Debug, Clone)]
pub struct SlotClock {
    forging_interval: u64,
    time_poll_interval: u64,
}

impl SlotClock {
    pub fn new(forging_interval: u64, time_poll_interval: u64) -> Self {
        Self {
            forging_interval,
            time_poll_interval,
        }
    }

    pub fn forging_interval(&self) -> u64 {
        self.forging_interval
    }

    pub fn slot_index(&self, timestamp: Timestamp) -> u64 {
        timestamp / self.forging_interval
    }

    /// The aligned timestamp of the slot containing `timestamp`.
    pub fn slot_timestamp(&self, timestamp: Timestamp) -> Timestamp {
        self.slot_index(timestamp) * self.forging_interval
    }

    /// Park until the slot index advances past the current one. Returns the
    /// new slot's aligned timestamp, or `None` once `is_active` drops.
    pub async fn wait_until_next_block_time_slot(
        &self,
        is_active: &AtomicBool,
    ) -> Option<Timestamp> {
        let starting_slot = self.slot_index(now_ms());
        loop {
            if !is_active.load(Ordering::SeqCst) {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(self.time_poll_interval)).await;
            let now = now_ms();
            if self.slot_index(now) != starting_slot {
                return Some(self.slot_timestamp(now));
            }
        }
    }
}
