//! Shared fixtures for the consensus test suites.
#![allow(dead_code)]

use std::sync::Arc;

use lib_blockchain::storage::{ChainStore, Genesis, GenesisAccount, MemoryStore};
use lib_blockchain::{BlockProcessor, ChainEventBus, ChainParams, Forger, Mempool};
use lib_consensus::{ActiveDelegateCache, EngineState};
use lib_crypto::{CryptoClient, DevConnectOptions, DevCryptoClient, KeyType};
use lib_types::{Account, Address, Amount, Block, Transaction, TransactionType};

pub const SYMBOL: &str = "ldpos";
pub const INTERVAL: u64 = 30_000;

pub fn dev_client(passphrase: &str) -> DevCryptoClient {
    DevCryptoClient::connect(DevConnectOptions {
        passphrase: passphrase.to_string(),
        network_symbol: SYMBOL.to_string(),
        wallet_address: None,
        forging_key_index: None,
    })
    .expect("dev client connects")
}

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

pub fn genesis(accounts: Vec<GenesisAccount>) -> Genesis {
    Genesis {
        network_symbol: SYMBOL.to_string(),
        accounts,
    }
}

pub async fn init_store(genesis: &Genesis) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.init(genesis).await.expect("genesis initializes");
    store
}

pub async fn genesis_tip(store: &MemoryStore) -> Block {
    store
        .get_signed_block_at_height(0)
        .await
        .expect("genesis tip exists")
}

pub fn transfer(
    client: &DevCryptoClient,
    recipient: &Address,
    amount: u64,
    fee: u64,
    timestamp: u64,
) -> Transaction {
    let mut transaction = Transaction {
        id: String::new(),
        transaction_type: TransactionType::Transfer,
        sender_address: client.wallet_address().clone(),
        fee: Amount::from_u64(fee),
        timestamp,
        message: None,
        amount: Some(Amount::from_u64(amount)),
        recipient_address: Some(recipient.clone()),
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
    };
    transaction = client.prepare_transaction(transaction);
    transaction
}

/// A small fully wired chain-core stack over one store.
pub struct Stack {
    pub store: Arc<MemoryStore>,
    pub params: Arc<ChainParams>,
    pub crypto: Arc<dyn CryptoClient>,
    pub mempool: Arc<Mempool>,
    pub processor: Arc<BlockProcessor>,
    pub forger: Arc<Forger>,
    pub delegates: Arc<ActiveDelegateCache>,
    pub events: ChainEventBus,
    pub state: Arc<EngineState>,
}

pub async fn stack(store: Arc<MemoryStore>, forger_count: usize) -> Stack {
    let params = Arc::new(chain_params());
    let crypto: Arc<dyn CryptoClient> = Arc::new(DevCryptoClient::verifier(SYMBOL));
    let mempool = Arc::new(Mempool::new(
        Arc::clone(&params),
        store.clone() as Arc<dyn ChainStore>,
        Arc::clone(&crypto),
    ));
    let processor = Arc::new(BlockProcessor::new(
        Arc::clone(&params),
        store.clone() as Arc<dyn ChainStore>,
    ));
    let forger = Arc::new(Forger::new(
        Arc::clone(&params),
        store.clone() as Arc<dyn ChainStore>,
    ));
    let delegates = Arc::new(ActiveDelegateCache::new(
        forger_count,
        store.clone() as Arc<dyn ChainStore>,
    ));
    delegates.refresh().await.expect("delegate cache refreshes");
    let tip = genesis_tip(store.as_ref()).await;
    Stack {
        state: Arc::new(EngineState::new(tip)),
        events: ChainEventBus::new(),
        store,
        params,
        crypto,
        mempool,
        processor,
        forger,
        delegates,
    }
}

/// Forge and process one block on `stack`, returning the signed block.
pub async fn advance_chain(
    stack: &Stack,
    forger_client: &DevCryptoClient,
    transactions: Vec<Transaction>,
    height: u64,
    timestamp: u64,
    now: u64,
) -> Block {
    for transaction in transactions {
        stack
            .mempool
            .submit(transaction, now)
            .await
            .expect("transaction admits");
    }
    let tip = stack.state.last_processed_block();
    let block = stack
        .forger
        .forge_block(
            forger_client,
            &stack.mempool,
            height,
            timestamp,
            tip.id.clone(),
            now,
        )
        .await
        .expect("block forges");
    let processed = stack
        .processor
        .process_block(&block, false)
        .await
        .expect("block processes");
    stack
        .mempool
        .purge_for_block(&block, &processed.updated_accounts)
        .await;
    stack.delegates.refresh().await.expect("cache refreshes");
    stack.state.set_last_processed_block(block.clone());
    block
}
