//! Canonical hashing for chain objects.
//!
//! SHA-256 is the canonical hash function for all consensus-critical data:
//! transaction ids, block ids, and signature hashes. Payloads are JSON
//! objects whose keys serialize in sorted order, so every node derives the
//! same id for the same logical object regardless of field population order.

use serde_json::json;
use sha2::{Digest, Sha256};

use lib_types::{Block, Transaction};

/// The canonical hash function for all consensus-critical data.
pub const CONSENSUS_HASH_FUNCTION: &str = "SHA-256";

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Deterministic id of a transaction.
///
/// Covers every consensus-relevant field except signatures and the id
/// itself. Signatures cannot participate because sig and multisig senders
/// sign the id; signature hashes are carried separately in simplified form.
pub fn transaction_id(transaction: &Transaction) -> String {
    let payload = json!({
        "type": transaction.transaction_type.as_str(),
        "senderAddress": transaction.sender_address.as_str(),
        "fee": transaction.fee.to_string(),
        "timestamp": transaction.timestamp,
        "message": transaction.message,
        "amount": transaction.amount.as_ref().map(|amount| amount.to_string()),
        "recipientAddress": transaction.recipient_address.as_ref().map(|a| a.as_str().to_string()),
        "delegateAddress": transaction.delegate_address.as_ref().map(|a| a.as_str().to_string()),
        "memberAddresses": transaction.member_addresses.as_ref().map(|members| {
            members.iter().map(|m| m.as_str().to_string()).collect::<Vec<_>>()
        }),
        "requiredSignatureCount": transaction.required_signature_count,
        "newSigPublicKey": transaction.new_sig_public_key,
        "newNextSigPublicKey": transaction.new_next_sig_public_key,
        "newNextSigKeyIndex": transaction.new_next_sig_key_index,
        "newMultisigPublicKey": transaction.new_multisig_public_key,
        "newNextMultisigPublicKey": transaction.new_next_multisig_public_key,
        "newNextMultisigKeyIndex": transaction.new_next_multisig_key_index,
        "newForgingPublicKey": transaction.new_forging_public_key,
        "newNextForgingPublicKey": transaction.new_next_forging_public_key,
        "newNextForgingKeyIndex": transaction.new_next_forging_key_index,
        "sigPublicKey": transaction.sig_public_key,
        "nextSigPublicKey": transaction.next_sig_public_key,
        "nextSigKeyIndex": transaction.next_sig_key_index,
    });
    sha256_hex(payload.to_string().as_bytes())
}

/// Deterministic id of a block.
///
/// Commits to the chain position, the forger's key state, and the ids of
/// every contained transaction. The forger signature and delegate
/// co-signatures sign this id and are therefore excluded from it.
pub fn block_id(block: &Block) -> String {
    let transaction_ids: Vec<&str> = block
        .transactions
        .iter()
        .map(|transaction| transaction.id.as_str())
        .collect();
    let payload = json!({
        "height": block.height,
        "timestamp": block.timestamp,
        "previousBlockId": block.previous_block_id,
        "forgerAddress": block.forger_address.as_str(),
        "forgingPublicKey": block.forging_public_key,
        "nextForgingPublicKey": block.next_forging_public_key,
        "nextForgingKeyIndex": block.next_forging_key_index,
        "transactionIds": transaction_ids,
    });
    sha256_hex(payload.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::{Address, Amount, TransactionType};

    fn bare_transfer() -> Transaction {
        Transaction {
            id: String::new(),
            transaction_type: TransactionType::Transfer,
            sender_address: Address::from("clux93efae1582437d410fb5cbc5d7e3dee1bb8194e7"),
            fee: Amount::from_u64(10),
            timestamp: 30000,
            message: None,
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
            sender_signature: None,
            sender_signature_hash: None,
            sig_public_key: Some("93efae1582437d410fb5cbc5d7e3dee1bb8194e7aa55".to_string()),
            next_sig_public_key: Some("b".repeat(64)),
            next_sig_key_index: Some(1),
            signatures: Vec::new(),
        }
    }

    #[test]
    fn transaction_id_ignores_signatures() {
        let unsigned = bare_transfer();
        let mut signed = unsigned.clone();
        signed.sender_signature = Some("anything".to_string());
        assert_eq!(transaction_id(&unsigned), transaction_id(&signed));
    }

    #[test]
    fn transaction_id_tracks_consensus_fields() {
        let base = bare_transfer();
        let mut bumped = base.clone();
        bumped.fee = Amount::from_u64(11);
        assert_ne!(transaction_id(&base), transaction_id(&bumped));
    }
}
