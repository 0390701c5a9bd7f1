//! Per-sender mempool behavior: ordering windows, caps, exclusivity rules,
//! and expiry.

mod common;

use std::sync::Arc;

use lib_blockchain::storage::ChainStore;
use lib_blockchain::{Mempool, MempoolError};
use lib_crypto::{CryptoClient, DevCryptoClient, KeyType};
use lib_types::TransactionType;

use common::*;

fn mempool_with(
    store: Arc<lib_blockchain::MemoryStore>,
    params: lib_blockchain::ChainParams,
) -> Mempool {
    let crypto: Arc<dyn CryptoClient> = Arc::new(DevCryptoClient::verifier(SYMBOL));
    Mempool::new(Arc::new(params), store, crypto)
}

#[tokio::test]
async fn accepts_a_serial_run_of_transfers_and_tracks_balance() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![genesis_account(&alice, 1_000, false, Vec::new())]).await;
    let mempool = mempool_with(Arc::clone(&store), chain_params());

    for _ in 0..3 {
        let transaction = transfer(&alice, bob.wallet_address(), 100, 10, 1_000);
        mempool.submit(transaction, 2_000).await.unwrap();
    }
    assert_eq!(mempool.pending_count(), 3);

    // 3 * (100 + 10) spent of 1000; a fourth 700-unit transfer cannot fit.
    let too_big = transfer(&alice, bob.wallet_address(), 700, 10, 1_000);
    let outcome = mempool.submit(too_big, 2_000).await;
    assert!(matches!(
        outcome,
        Err(MempoolError::Validation(
            lib_blockchain::ValidationError::InsufficientBalance { .. }
        ))
    ));
}

#[tokio::test]
async fn rejects_duplicate_pending_ids() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![genesis_account(&alice, 1_000, false, Vec::new())]).await;
    let mempool = mempool_with(Arc::clone(&store), chain_params());

    let transaction = transfer(&alice, bob.wallet_address(), 100, 10, 1_000);
    mempool.submit(transaction.clone(), 2_000).await.unwrap();
    assert!(matches!(
        mempool.submit(transaction, 2_000).await,
        Err(MempoolError::DuplicatePending { .. })
    ));
}

#[tokio::test]
async fn ordering_window_rejects_key_index_inversions() {
    // Sender account holds current key K and committed next key K'.
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let current_key = alice.public_key(KeyType::Sig, 4);
    let next_key = alice.public_key(KeyType::Sig, 5);

    let mut entry = genesis_account(&alice, 10_000, false, Vec::new());
    entry.account.sig_public_key = Some(current_key.clone());
    entry.account.next_sig_public_key = Some(next_key.clone());
    entry.account.next_sig_key_index = 5;
    let store = init_store(vec![entry]).await;
    let mempool = mempool_with(Arc::clone(&store), chain_params());

    // t1 signed with the NEXT key, committing index 5.
    let t1 = transfer_with_key(
        alice.wallet_address(),
        bob.wallet_address(),
        100,
        10,
        1_000,
        &next_key,
        &alice.public_key(KeyType::Sig, 6),
        5,
    );
    mempool.submit(t1, 2_000).await.unwrap();

    // t2 signed with the CURRENT key at the same index would invert the
    // chain once t1 processes.
    let t2 = transfer_with_key(
        alice.wallet_address(),
        bob.wallet_address(),
        100,
        10,
        1_001,
        &current_key,
        &next_key,
        5,
    );
    assert!(matches!(
        mempool.submit(t2, 2_000).await,
        Err(MempoolError::OrderingWindow { index: 5, bound: 5 })
    ));

    // A lower index slots below the pending next-key transaction.
    let t3 = transfer_with_key(
        alice.wallet_address(),
        bob.wallet_address(),
        100,
        10,
        1_002,
        &current_key,
        &next_key,
        4,
    );
    mempool.submit(t3, 2_000).await.unwrap();
    assert_eq!(mempool.pending_count(), 2);
}

#[tokio::test]
async fn pending_cap_limits_each_sender() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![genesis_account(&alice, 100_000, false, Vec::new())]).await;
    let mut params = chain_params();
    params.max_pending_transactions_per_account = 2;
    let mempool = mempool_with(Arc::clone(&store), params);

    for _ in 0..2 {
        let transaction = transfer(&alice, bob.wallet_address(), 10, 10, 1_000);
        mempool.submit(transaction, 2_000).await.unwrap();
    }
    assert!(matches!(
        mempool
            .submit(transfer(&alice, bob.wallet_address(), 10, 10, 1_000), 2_000)
            .await,
        Err(MempoolError::PendingCapReached { .. })
    ));
}

#[tokio::test]
async fn future_timestamps_are_rejected() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![genesis_account(&alice, 1_000, false, Vec::new())]).await;
    let mempool = mempool_with(Arc::clone(&store), chain_params());

    let transaction = transfer(&alice, bob.wallet_address(), 100, 10, 5_000);
    assert!(matches!(
        mempool.submit(transaction, 4_999).await,
        Err(MempoolError::Validation(
            lib_blockchain::ValidationError::FutureTimestamp { .. }
        ))
    ));
}

#[tokio::test]
async fn sig_details_registration_requires_an_empty_stream() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![genesis_account(&alice, 10_000, false, Vec::new())]).await;
    let mempool = mempool_with(Arc::clone(&store), chain_params());

    mempool
        .submit(transfer(&alice, bob.wallet_address(), 100, 10, 1_000), 2_000)
        .await
        .unwrap();

    let mut register = base_transaction(
        TransactionType::RegisterSigDetails,
        alice.wallet_address().clone(),
        10,
        1_001,
    );
    register.new_sig_public_key = Some(alice.public_key(KeyType::Sig, 20));
    register.new_next_sig_public_key = Some(alice.public_key(KeyType::Sig, 21));
    register.new_next_sig_key_index = Some(21);
    let register = alice.prepare_transaction(register);

    assert!(matches!(
        mempool.submit(register, 2_000).await,
        Err(MempoolError::SigDetailsNotAlone)
    ));
}

#[tokio::test]
async fn expiry_evicts_old_pending_transactions() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![genesis_account(&alice, 10_000, false, Vec::new())]).await;
    let mut params = chain_params();
    params.pending_transaction_expiry = 1_000;
    let mempool = mempool_with(Arc::clone(&store), params);

    mempool
        .submit(transfer(&alice, bob.wallet_address(), 100, 10, 500), 1_000)
        .await
        .unwrap();
    assert_eq!(mempool.pending_count(), 1);

    // Not yet past the horizon.
    assert_eq!(mempool.expire(1_500).await, 0);
    assert_eq!(mempool.pending_count(), 1);

    assert_eq!(mempool.expire(2_500).await, 1);
    assert_eq!(mempool.pending_count(), 0);
}

#[tokio::test]
async fn already_processed_transactions_are_rejected() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![genesis_account(&alice, 10_000, false, Vec::new())]).await;
    let mempool = mempool_with(Arc::clone(&store), chain_params());

    let transaction = transfer(&alice, bob.wallet_address(), 100, 10, 1_000);
    // Simulate the transaction having landed in a block already.
    let mut block = genesis_tip(store.as_ref()).await;
    block.id = "processed-block".to_string();
    block.height = 1;
    block.transactions = vec![transaction.simplified()];
    store.upsert_block(&block, false).await.unwrap();

    assert!(matches!(
        mempool.submit(transaction, 2_000).await,
        Err(MempoolError::AlreadyProcessed { .. })
    ));
}
