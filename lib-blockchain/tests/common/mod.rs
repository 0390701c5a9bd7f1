//! Shared fixtures for the chain-core test suites.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use lib_blockchain::storage::{ChainStore, Genesis, GenesisAccount, MemoryStore};
use lib_blockchain::ChainParams;
use lib_crypto::dev::sign_message;
use lib_crypto::{transaction_id, CryptoClient, DevConnectOptions, DevCryptoClient, KeyType};
use lib_types::{Account, AccountType, Address, Amount, Block, Transaction, TransactionType};

pub const SYMBOL: &str = "ldpos";

/// Chain parameters with a flat low fee schedule so balances in scenarios
/// stay easy to follow.
pub fn chain_params() -> ChainParams {
    let mut params = ChainParams::default();
    params.network_symbol = SYMBOL.to_string();
    params.min_transaction_fees = TransactionType::ALL
        .iter()
        .map(|transaction_type| (*transaction_type, Amount::from_u64(10)))
        .collect();
    params.min_multisig_registration_fee_per_member = Amount::zero();
    params.min_multisig_transaction_fee_per_member = Amount::zero();
    params
}

pub fn dev_client(passphrase: &str) -> DevCryptoClient {
    DevCryptoClient::connect(DevConnectOptions {
        passphrase: passphrase.to_string(),
        network_symbol: SYMBOL.to_string(),
        wallet_address: None,
        forging_key_index: None,
    })
    .expect("dev client connects")
}

/// Genesis entry for a wallet: sig chain seeded at index 0, forging chain
/// seeded too when `delegate` is set.
pub fn genesis_account(
    client: &DevCryptoClient,
    balance: u64,
    delegate: bool,
    votes: Vec<Address>,
) -> GenesisAccount {
    let mut account = Account::default_for(client.wallet_address().clone());
    account.balance = Amount::from_u64(balance);
    account.sig_public_key = Some(client.public_key(KeyType::Sig, 0));
    account.next_sig_public_key = Some(client.public_key(KeyType::Sig, 1));
    account.next_sig_key_index = 1;
    if delegate {
        account.forging_public_key = Some(client.public_key(KeyType::Forging, 0));
        account.next_forging_public_key = Some(client.public_key(KeyType::Forging, 1));
        account.next_forging_key_index = 1;
    }
    GenesisAccount { account, votes }
}

/// Genesis member entry carrying a multisig chain seeded at index 0.
pub fn genesis_member_account(client: &DevCryptoClient, balance: u64) -> GenesisAccount {
    let mut entry = genesis_account(client, balance, false, Vec::new());
    entry.account.multisig_public_key = Some(client.public_key(KeyType::Multisig, 0));
    entry.account.next_multisig_public_key = Some(client.public_key(KeyType::Multisig, 1));
    entry.account.next_multisig_key_index = 1;
    entry
}

pub async fn init_store(accounts: Vec<GenesisAccount>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let genesis = Genesis {
        network_symbol: SYMBOL.to_string(),
        accounts,
    };
    store.init(&genesis).await.expect("genesis initializes");
    store
}

pub async fn genesis_tip(store: &MemoryStore) -> Block {
    store
        .get_signed_block_at_height(0)
        .await
        .expect("genesis tip exists")
}

/// A transaction with every optional field empty; tests fill what they
/// need.
pub fn base_transaction(
    transaction_type: TransactionType,
    sender_address: Address,
    fee: u64,
    timestamp: u64,
) -> Transaction {
    Transaction {
        id: String::new(),
        transaction_type,
        sender_address,
        fee: Amount::from_u64(fee),
        timestamp,
        message: None,
        amount: None,
        recipient_address: None,
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

pub fn transfer(
    client: &DevCryptoClient,
    recipient: &Address,
    amount: u64,
    fee: u64,
    timestamp: u64,
) -> Transaction {
    let mut transaction = base_transaction(
        TransactionType::Transfer,
        client.wallet_address().clone(),
        fee,
        timestamp,
    );
    transaction.amount = Some(Amount::from_u64(amount));
    transaction.recipient_address = Some(recipient.clone());
    client.prepare_transaction(transaction)
}

/// A sig transaction signed with an explicit key and key-index commitment,
/// for ordering-window scenarios.
pub fn transfer_with_key(
    sender: &Address,
    recipient: &Address,
    amount: u64,
    fee: u64,
    timestamp: u64,
    sig_public_key: &str,
    next_sig_public_key: &str,
    next_sig_key_index: u64,
) -> Transaction {
    let mut transaction =
        base_transaction(TransactionType::Transfer, sender.clone(), fee, timestamp);
    transaction.amount = Some(Amount::from_u64(amount));
    transaction.recipient_address = Some(recipient.clone());
    transaction.sig_public_key = Some(sig_public_key.to_string());
    transaction.next_sig_public_key = Some(next_sig_public_key.to_string());
    transaction.next_sig_key_index = Some(next_sig_key_index);
    transaction.id = transaction_id(&transaction);
    transaction.sender_signature = Some(sign_message(sig_public_key, &transaction.id));
    transaction
}

/// Register a 2-of-3 style multisig wallet directly in the store.
pub async fn register_wallet(
    store: &MemoryStore,
    wallet: &Address,
    members: &[Address],
    required: u32,
) {
    store
        .register_multisig_wallet(wallet, members, required)
        .await
        .expect("wallet registers");
    let mut account = store.get_account(wallet).await.expect("wallet account");
    account.account_type = AccountType::Multisig;
    account.required_signature_count = Some(required);
    store.upsert_account(&account).await.expect("wallet updates");
}

/// Multisig member snapshots keyed by address.
pub async fn member_accounts(
    store: &MemoryStore,
    members: &[Address],
) -> HashMap<Address, Account> {
    let mut accounts = HashMap::new();
    for address in members {
        accounts.insert(
            address.clone(),
            store.get_account(address).await.expect("member account"),
        );
    }
    accounts
}
