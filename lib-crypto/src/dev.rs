//! Deterministic development-mode crypto client.
//!
//! This client derives its whole key-evolving chain from a passphrase and
//! verifies signatures by recomputation. It is NOT cryptographically secure
//! and exists for development networks and tests only; production nodes
//! connect a real signer behind the [`CryptoClient`] trait.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use lib_types::{Account, Address, Block, BlockSignature, KeyIndex, SignaturePacket, Transaction};

use crate::client::{CryptoClient, CryptoError, CryptoResult, KeyType};
use crate::hashing::{block_id, sha256_hex, transaction_id};

/// Options for connecting a [`DevCryptoClient`] to a wallet.
#[derive(Debug, Clone)]
pub struct DevConnectOptions {
    pub passphrase: String,
    pub network_symbol: String,
    /// Explicit wallet address; derived from the sig chain when absent.
    pub wallet_address: Option<Address>,
    /// Initial forging key index override.
    pub forging_key_index: Option<KeyIndex>,
}

/// Dev-mode client.
///
/// Mirrors the shape of a tree-based one-time signature scheme: each chain
/// has a stable public key (the current tree root, derived from the seed
/// and a tree number), a committed next tree root, and a key index that
/// advances by one per signature within the tree. Signatures are hashes of
/// (public key, message); nothing here is secret.
pub struct DevCryptoClient {
    seed: String,
    network_symbol: String,
    wallet_address: Address,
    forging_index: AtomicU64,
    sig_index: AtomicU64,
    multisig_index: AtomicU64,
}

/// Tree number of the current key of every dev chain.
const CURRENT_TREE: u64 = 0;

impl DevCryptoClient {
    pub fn connect(options: DevConnectOptions) -> CryptoResult<Self> {
        let seed = sha256_hex(options.passphrase.as_bytes());
        let first_sig_key = derive_public_key(&seed, KeyType::Sig, 0);
        let wallet_address = match options.wallet_address {
            Some(address) => address,
            None => Address::from_sig_public_key(&options.network_symbol, &first_sig_key)
                .map_err(|err| CryptoError::Backend(err.to_string()))?,
        };
        Ok(Self {
            seed,
            network_symbol: options.network_symbol,
            wallet_address,
            forging_index: AtomicU64::new(options.forging_key_index.unwrap_or(0)),
            sig_index: AtomicU64::new(0),
            multisig_index: AtomicU64::new(0),
        })
    }

    /// A verification-only client with no usable signing chains.
    pub fn verifier(network_symbol: &str) -> Self {
        let seed = sha256_hex(b"verifier");
        let wallet_address = Address::new(format!("{network_symbol}{}", &seed[..40]));
        Self {
            seed,
            network_symbol: network_symbol.to_string(),
            wallet_address,
            forging_index: AtomicU64::new(0),
            sig_index: AtomicU64::new(0),
            multisig_index: AtomicU64::new(0),
        }
    }

    pub fn network_symbol(&self) -> &str {
        &self.network_symbol
    }

    /// Public key of the given chain's tree. Tree 0 is the current key,
    /// tree 1 the committed next key.
    pub fn public_key(&self, key_type: KeyType, tree: u64) -> String {
        derive_public_key(&self.seed, key_type, tree)
    }

    /// Fill in a transaction's id, sig key triple, and sender signature
    /// using the wallet's current sig key, consuming one sig key index.
    pub fn prepare_transaction(&self, mut transaction: Transaction) -> Transaction {
        let index = self.sig_index.fetch_add(1, Ordering::SeqCst);
        let public_key = self.public_key(KeyType::Sig, CURRENT_TREE);
        transaction.sig_public_key = Some(public_key.clone());
        transaction.next_sig_public_key = Some(self.public_key(KeyType::Sig, CURRENT_TREE + 1));
        transaction.next_sig_key_index = Some(index + 1);
        transaction.id = transaction_id(&transaction);
        transaction.sender_signature = Some(sign_message(&public_key, &transaction.id));
        transaction
    }

    /// Produce this wallet's member signature packet for a multisig-sent
    /// transaction, consuming one multisig key index.
    pub fn sign_multisig_transaction(&self, transaction: &Transaction) -> SignaturePacket {
        let index = self.multisig_index.fetch_add(1, Ordering::SeqCst);
        let public_key = self.public_key(KeyType::Multisig, CURRENT_TREE);
        SignaturePacket {
            signer_address: self.wallet_address.clone(),
            multisig_public_key: public_key.clone(),
            next_multisig_public_key: self.public_key(KeyType::Multisig, CURRENT_TREE + 1),
            next_multisig_key_index: index + 1,
            signature: Some(sign_message(&public_key, &transaction.id)),
            signature_hash: None,
        }
    }
}

fn derive_public_key(seed: &str, key_type: KeyType, tree: u64) -> String {
    sha256_hex(format!("{seed}:{key_type}:{tree}").as_bytes())
}

/// Dev-scheme signature over `message` by the holder of `public_key`.
/// Public because wallet tooling and fixtures build signatures directly.
pub fn sign_message(public_key: &str, message: &str) -> String {
    sha256_hex(format!("{public_key}:{message}").as_bytes())
}

fn verify(public_key: &str, message: &str, signature: &str) -> bool {
    sign_message(public_key, message) == signature
}

#[async_trait]
impl CryptoClient for DevCryptoClient {
    fn wallet_address(&self) -> &Address {
        &self.wallet_address
    }

    fn forging_key_index(&self) -> KeyIndex {
        self.forging_index.load(Ordering::SeqCst)
    }

    async fn prepare_block(&self, mut block: Block) -> CryptoResult<Block> {
        let index = self.forging_index.fetch_add(1, Ordering::SeqCst);
        let public_key = self.public_key(KeyType::Forging, CURRENT_TREE);
        block.forger_address = self.wallet_address.clone();
        block.forging_public_key = public_key.clone();
        block.next_forging_public_key = self.public_key(KeyType::Forging, CURRENT_TREE + 1);
        block.next_forging_key_index = index + 1;
        block.id = block_id(&block);
        block.forger_signature = Some(sign_message(&public_key, &block.id));
        Ok(block)
    }

    async fn sign_block(&self, block: &Block) -> CryptoResult<BlockSignature> {
        let index = self.forging_index.fetch_add(1, Ordering::SeqCst);
        let public_key = self.public_key(KeyType::Forging, CURRENT_TREE);
        Ok(BlockSignature {
            signer_address: self.wallet_address.clone(),
            forging_public_key: public_key.clone(),
            next_forging_public_key: self.public_key(KeyType::Forging, CURRENT_TREE + 1),
            next_forging_key_index: index + 1,
            block_id: block.id.clone(),
            signature: sign_message(&public_key, &block.id),
        })
    }

    async fn verify_block(&self, block: &Block) -> CryptoResult<bool> {
        if block_id(block) != block.id {
            return Ok(false);
        }
        let Some(signature) = &block.forger_signature else {
            return Ok(false);
        };
        Ok(verify(&block.forging_public_key, &block.id, signature))
    }

    async fn verify_block_signature(
        &self,
        block: &Block,
        signature: &BlockSignature,
    ) -> CryptoResult<bool> {
        if signature.block_id != block.id {
            return Ok(false);
        }
        Ok(verify(
            &signature.forging_public_key,
            &signature.block_id,
            &signature.signature,
        ))
    }

    async fn verify_transaction(&self, transaction: &Transaction) -> CryptoResult<bool> {
        if transaction_id(transaction) != transaction.id {
            return Ok(false);
        }
        let (Some(public_key), Some(signature)) = (
            transaction.sig_public_key.as_deref(),
            transaction.sender_signature.as_deref(),
        ) else {
            return Ok(false);
        };
        Ok(verify(public_key, &transaction.id, signature))
    }

    async fn verify_transaction_id(&self, transaction: &Transaction) -> CryptoResult<bool> {
        Ok(transaction_id(transaction) == transaction.id)
    }

    async fn verify_multisig_transaction_signature(
        &self,
        transaction: &Transaction,
        packet: &SignaturePacket,
    ) -> CryptoResult<bool> {
        let Some(signature) = packet.signature.as_deref() else {
            return Ok(false);
        };
        Ok(verify(&packet.multisig_public_key, &transaction.id, signature))
    }

    async fn sync_key_index(&self, key_type: KeyType, account: &Account) -> CryptoResult<bool> {
        let (counter, committed) = match key_type {
            KeyType::Forging => (&self.forging_index, account.next_forging_key_index),
            KeyType::Sig => (&self.sig_index, account.next_sig_key_index),
            KeyType::Multisig => (&self.multisig_index, account.next_multisig_key_index),
        };
        let local = counter.load(Ordering::SeqCst);
        if committed > local {
            counter.store(committed, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::{Amount, TransactionType};

    fn unsigned_transfer(sender: Address) -> Transaction {
        Transaction {
            id: String::new(),
            transaction_type: TransactionType::Transfer,
            sender_address: sender,
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
            sig_public_key: None,
            next_sig_public_key: None,
            next_sig_key_index: None,
            signatures: Vec::new(),
        }
    }

    fn dev_client(passphrase: &str) -> DevCryptoClient {
        DevCryptoClient::connect(DevConnectOptions {
            passphrase: passphrase.to_string(),
            network_symbol: "clux".to_string(),
            wallet_address: None,
            forging_key_index: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn prepared_transactions_verify_and_consume_key_indexes() {
        let client = dev_client("dawn comet ledger");
        let first = client.prepare_transaction(unsigned_transfer(client.wallet_address().clone()));
        let second = client.prepare_transaction(unsigned_transfer(client.wallet_address().clone()));

        assert!(client.verify_transaction(&first).await.unwrap());
        assert!(client.verify_transaction_id(&first).await.unwrap());
        assert_eq!(first.next_sig_key_index, Some(1));
        assert_eq!(second.next_sig_key_index, Some(2));
        // The tree root stays stable while the index advances within it.
        assert_eq!(first.sig_public_key, second.sig_public_key);
    }

    #[tokio::test]
    async fn tampered_transactions_fail_verification() {
        let client = dev_client("dawn comet ledger");
        let mut transaction =
            client.prepare_transaction(unsigned_transfer(client.wallet_address().clone()));
        transaction.amount = Some(Amount::from_u64(999));
        assert!(!client.verify_transaction(&transaction).await.unwrap());
        assert!(!client.verify_transaction_id(&transaction).await.unwrap());
    }

    #[tokio::test]
    async fn sync_key_index_only_moves_forward() {
        let client = dev_client("dawn comet ledger");
        let mut account = Account::default_for(client.wallet_address().clone());
        account.next_forging_key_index = 7;

        assert!(client.sync_key_index(KeyType::Forging, &account).await.unwrap());
        assert_eq!(client.forging_key_index(), 7);
        assert!(!client.sync_key_index(KeyType::Forging, &account).await.unwrap());
        assert_eq!(client.forging_key_index(), 7);
    }
}
