//! Slot-scoped wait streams.
//!
//! The forging loop waits on exactly one verified block and a trickle of
//! verified co-signatures per slot. Gossip writes into these streams; the
//! loop drains them at slot start and performs bounded waits with a
//! deadline, so a missing forger or a signature shortfall can only stall
//! one slot.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

const STREAM_CAPACITY: usize = 128;

/// Single-consumer stream with bounded, cancellable waits.
pub struct SlotStream<T> {
    sender: mpsc::Sender<T>,
    receiver: Mutex<mpsc::Receiver<T>>,
}

impl<T> SlotStream<T> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(STREAM_CAPACITY);
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Non-blocking write; full streams drop the value (the slot has moved
    /// on).
    pub fn write(&self, value: T) {
        let _ = self.sender.try_send(value);
    }

    /// Wait up to `timeout` for the next value.
    pub async fn next_within(&self, timeout: Duration) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        tokio::time::timeout(timeout, receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Discard everything buffered from previous slots.
    pub async fn drain(&self) {
        let mut receiver = self.receiver.lock().await;
        while receiver.try_recv().is_ok() {}
    }
}

impl<T> Default for SlotStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waits_resolve_on_write_and_expire_on_silence() {
        let stream: SlotStream<u32> = SlotStream::new();
        stream.write(7);
        assert_eq!(stream.next_within(Duration::from_millis(10)).await, Some(7));
        assert_eq!(stream.next_within(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn drain_discards_stale_values() {
        let stream: SlotStream<u32> = SlotStream::new();
        stream.write(1);
        stream.write(2);
        stream.drain().await;
        assert_eq!(stream.next_within(Duration::from_millis(5)).await, None);
    }
}
