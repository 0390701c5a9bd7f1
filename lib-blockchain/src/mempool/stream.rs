//! Per-sender pending stream state.
//!
//! The mempool verifies same-sender transactions strictly serially; this
//! module holds the state that serialization protects: the sender account
//! snapshot, the ordered pending list, and the key-index windows that keep
//! stateful-signature usage monotonic across pending transactions.

use std::collections::HashMap;

use lib_types::{Account, Address, KeyIndex, Timestamp, Transaction};

use crate::validation::MultisigContext;

/// Admission window over the key indexes of a sender's pending transactions.
///
/// The underlying signature scheme is stateful: a key index, once consumed,
/// invalidates every lower index. Pending transactions therefore may not be
/// ordered in a way that would consume a high index before a lower one.
/// Two bounds enforce this:
///
/// - `lowest_next`: lowest `next_key_index` among pending transactions that
///   were signed with the account's committed NEXT key. A transaction signed
///   with the CURRENT key must slot strictly below this bound.
/// - `highest`: highest `next_key_index` among pending transactions signed
///   with the CURRENT key. A transaction signed with the NEXT key must slot
///   strictly above this bound.
#[derive(Debug, Clone, Default)]
pub struct KeyIndexWindow {
    lowest_next: Option<KeyIndex>,
    highest: Option<KeyIndex>,
}

/// Why a transaction cannot join the pending window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingViolation {
    pub index: KeyIndex,
    pub bound: KeyIndex,
}

impl KeyIndexWindow {
    /// Admit a transaction signed with the account's committed next key.
    pub fn admit_next_key(&mut self, index: KeyIndex) -> Result<(), OrderingViolation> {
        if let Some(highest) = self.highest {
            if index <= highest {
                return Err(OrderingViolation {
                    index,
                    bound: highest,
                });
            }
        }
        self.lowest_next = Some(match self.lowest_next {
            Some(lowest) => lowest.min(index),
            None => index,
        });
        Ok(())
    }

    /// Admit a transaction signed with the account's current key.
    pub fn admit_current_key(&mut self, index: KeyIndex) -> Result<(), OrderingViolation> {
        if let Some(lowest) = self.lowest_next {
            if index >= lowest {
                return Err(OrderingViolation {
                    index,
                    bound: lowest,
                });
            }
        }
        self.highest = Some(match self.highest {
            Some(highest) => highest.max(index),
            None => index,
        });
        Ok(())
    }
}

/// One accepted pending transaction.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub transaction: Transaction,
    pub received_at: Timestamp,
}

/// State protected by a sender stream's serial lock.
#[derive(Debug)]
pub struct SenderStreamState {
    /// In-memory sender snapshot; balance already reflects accepted
    /// pending spends.
    pub snapshot: Account,
    /// Member snapshots for multisig wallets.
    pub multisig: Option<MultisigContext>,
    /// Accepted pending transactions in arrival order.
    pub pending: Vec<PendingRecord>,
    pub sig_window: KeyIndexWindow,
    pub member_windows: HashMap<Address, KeyIndexWindow>,
}

impl SenderStreamState {
    pub fn new(snapshot: Account, multisig: Option<MultisigContext>) -> Self {
        Self {
            snapshot,
            multisig,
            pending: Vec::new(),
            sig_window: KeyIndexWindow::default(),
            member_windows: HashMap::new(),
        }
    }

    /// Rebuild the windows from the remaining pending set, dropping any
    /// record that no longer fits a monotonic ordering. Used after purges.
    pub fn rebuild_windows(&mut self) {
        let records = std::mem::take(&mut self.pending);
        self.sig_window = KeyIndexWindow::default();
        self.member_windows.clear();
        for record in records {
            if self.admit_into_windows(&record.transaction).is_ok() {
                self.pending.push(record);
            }
        }
    }

    /// Run the window rules for `transaction` against the current state.
    pub fn admit_into_windows(&mut self, transaction: &Transaction) -> Result<(), OrderingViolation> {
        if transaction.is_multisig_sent() {
            // Tentatively admit per member; roll back on the first failure
            // so a rejected transaction leaves no trace in the windows.
            let saved: Vec<(Address, KeyIndexWindow)> = transaction
                .signatures
                .iter()
                .map(|packet| {
                    (
                        packet.signer_address.clone(),
                        self.member_windows
                            .get(&packet.signer_address)
                            .cloned()
                            .unwrap_or_default(),
                    )
                })
                .collect();
            for packet in &transaction.signatures {
                let member_key = self
                    .multisig
                    .as_ref()
                    .and_then(|context| context.members.get(&packet.signer_address));
                let uses_next_key = member_key
                    .map(|member| {
                        member.next_multisig_public_key.as_deref()
                            == Some(packet.multisig_public_key.as_str())
                    })
                    .unwrap_or(false);
                let window = self
                    .member_windows
                    .entry(packet.signer_address.clone())
                    .or_default();
                let outcome = if uses_next_key {
                    window.admit_next_key(packet.next_multisig_key_index)
                } else {
                    window.admit_current_key(packet.next_multisig_key_index)
                };
                if let Err(violation) = outcome {
                    for (address, window) in saved {
                        self.member_windows.insert(address, window);
                    }
                    return Err(violation);
                }
            }
            Ok(())
        } else {
            let index = transaction.next_sig_key_index.unwrap_or(0);
            let uses_next_key = self.snapshot.next_sig_public_key.is_some()
                && self.snapshot.next_sig_public_key == transaction.sig_public_key;
            if uses_next_key {
                self.sig_window.admit_next_key(index)
            } else {
                self.sig_window.admit_current_key(index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_key_must_clear_pending_current_key_indexes() {
        let mut window = KeyIndexWindow::default();
        window.admit_current_key(4).unwrap();
        assert!(window.admit_next_key(4).is_err());
        window.admit_next_key(5).unwrap();
    }

    #[test]
    fn current_key_must_stay_below_pending_next_key_indexes() {
        let mut window = KeyIndexWindow::default();
        window.admit_next_key(5).unwrap();
        // Equal to the lowest pending next-key index: would invert on
        // processing.
        assert!(window.admit_current_key(5).is_err());
        window.admit_current_key(4).unwrap();
    }

    #[test]
    fn windows_track_extremes_across_admissions() {
        let mut window = KeyIndexWindow::default();
        window.admit_current_key(2).unwrap();
        window.admit_current_key(3).unwrap();
        assert!(window.admit_next_key(3).is_err());
        window.admit_next_key(7).unwrap();
        window.admit_next_key(5).unwrap();
        assert!(window.admit_current_key(5).is_err());
        window.admit_current_key(4).unwrap();
    }
}
