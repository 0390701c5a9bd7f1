//! Transaction records and their simplified (block-inclusion) form.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::primitives::{Address, Amount, KeyIndex, Timestamp};

/// SHA-256 hex digest of a signature string.
///
/// Simplified transactions and blocks carry these hashes in place of full
/// signatures so peers can cross-check block contents against the pending
/// transactions they already hold.
pub fn signature_hash(signature: &str) -> String {
    hex::encode(Sha256::digest(signature.as_bytes()))
}

/// Every operation the chain can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionType {
    Transfer,
    Vote,
    Unvote,
    RegisterSigDetails,
    RegisterMultisigDetails,
    RegisterForgingDetails,
    RegisterMultisigWallet,
}

impl TransactionType {
    pub const ALL: [TransactionType; 7] = [
        TransactionType::Transfer,
        TransactionType::Vote,
        TransactionType::Unvote,
        TransactionType::RegisterSigDetails,
        TransactionType::RegisterMultisigDetails,
        TransactionType::RegisterForgingDetails,
        TransactionType::RegisterMultisigWallet,
    ];

    /// Canonical name used in config fee schedules and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "transfer",
            TransactionType::Vote => "vote",
            TransactionType::Unvote => "unvote",
            TransactionType::RegisterSigDetails => "registerSigDetails",
            TransactionType::RegisterMultisigDetails => "registerMultisigDetails",
            TransactionType::RegisterForgingDetails => "registerForgingDetails",
            TransactionType::RegisterMultisigWallet => "registerMultisigWallet",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One member's contribution to a multisig-sent transaction.
///
/// Each packet binds the member's current multisig key state to the
/// transaction. In the simplified form `signature` is replaced by
/// `signature_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePacket {
    pub signer_address: Address,
    pub multisig_public_key: String,
    pub next_multisig_public_key: String,
    pub next_multisig_key_index: KeyIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_hash: Option<String>,
}

impl SignaturePacket {
    /// Simplified copy: full signature swapped for its hash.
    pub fn simplified(&self) -> SignaturePacket {
        let mut packet = self.clone();
        if let Some(signature) = packet.signature.take() {
            packet.signature_hash = Some(signature_hash(&signature));
        }
        packet
    }
}

/// A chain transaction.
///
/// The populated optional fields depend on `transaction_type`; schema
/// validation in lib-blockchain enforces the per-type shape. A sig-sent
/// transaction carries `sender_signature` plus its sig key triple, a
/// multisig-sent one carries `signatures` packets instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub sender_address: Address,
    pub fee: Amount,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    // transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<Address>,

    // vote / unvote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_address: Option<Address>,

    // registerMultisigWallet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_addresses: Option<Vec<Address>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_signature_count: Option<u32>,

    // registerSigDetails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_sig_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_next_sig_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_next_sig_key_index: Option<KeyIndex>,

    // registerMultisigDetails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_multisig_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_next_multisig_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_next_multisig_key_index: Option<KeyIndex>,

    // registerForgingDetails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_forging_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_next_forging_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_next_forging_key_index: Option<KeyIndex>,

    // sig sender authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_signature_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sig_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sig_key_index: Option<KeyIndex>,

    // multisig sender authentication
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<SignaturePacket>,
}

impl Transaction {
    /// Whether this transaction was sent from a multisig wallet.
    pub fn is_multisig_sent(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// Amount moved by the transaction, zero for non-transfers.
    pub fn amount_or_zero(&self) -> Amount {
        self.amount.clone().unwrap_or_else(Amount::zero)
    }

    /// Simplified copy for block inclusion: every full signature is
    /// replaced by its SHA-256 hash; all other fields are preserved.
    pub fn simplified(&self) -> Transaction {
        let mut simplified = self.clone();
        if let Some(signature) = simplified.sender_signature.take() {
            simplified.sender_signature_hash = Some(signature_hash(&signature));
        }
        simplified.signatures = simplified
            .signatures
            .iter()
            .map(SignaturePacket::simplified)
            .collect();
        simplified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_fixture() -> Transaction {
        Transaction {
            id: "a1".repeat(32),
            transaction_type: TransactionType::Transfer,
            sender_address: Address::from("clux93efae1582437d410fb5cbc5d7e3dee1bb8194e7"),
            fee: Amount::from_u64(10),
            timestamp: 60000,
            message: Some("invoice 7".to_string()),
            amount: Some(Amount::from_u64(100)),
            recipient_address: Some(Address::from("cluxf2ab44a1582437d410fb5cbc5d7e3dee1bb8194")),
            delegate_address: None,
            member_addresses: None,
            required_signature_count: None,
            new_sig_public_key: None,
            new_next_sig_public_key: None,
            new_next_sig_key_index: None,
            new_multisig_public_key: None,
            new_next_multisig_public_key: None,
            new_next_multisig_key_index: None,
            new_forging_public_key: None,
            new_next_forging_public_key: None,
            new_next_forging_key_index: None,
            sender_signature: Some("sigdata".to_string()),
            sender_signature_hash: None,
            sig_public_key: Some("93efae1582437d410fb5cbc5d7e3dee1bb8194e7aa55".to_string()),
            next_sig_public_key: Some("b".repeat(64)),
            next_sig_key_index: Some(1),
            signatures: Vec::new(),
        }
    }

    #[test]
    fn simplification_hashes_signature_and_preserves_fields() {
        let full = transfer_fixture();
        let simplified = full.simplified();
        assert_eq!(simplified.sender_signature, None);
        assert_eq!(
            simplified.sender_signature_hash.as_deref(),
            Some(signature_hash("sigdata").as_str())
        );
        assert_eq!(simplified.id, full.id);
        assert_eq!(simplified.amount, full.amount);
        assert_eq!(simplified.fee, full.fee);
        assert_eq!(simplified.next_sig_key_index, full.next_sig_key_index);
    }

    #[test]
    fn wire_form_uses_type_tag_and_decimal_amounts() {
        let json = serde_json::to_value(transfer_fixture()).unwrap();
        assert_eq!(json["type"], "transfer");
        assert_eq!(json["amount"], "100");
        assert_eq!(json["fee"], "10");
    }
}
