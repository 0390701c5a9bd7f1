//! Pending-transaction ordering and block packaging.

mod common;

use std::sync::Arc;

use lib_blockchain::storage::ChainStore;
use lib_blockchain::{sort_pending_transactions, Forger, Mempool, SenderGroup};
use lib_crypto::{CryptoClient, DevCryptoClient};
use lib_types::Amount;

use common::*;

const INTERVAL: u64 = 30_000;

#[test]
fn sig_groups_order_by_key_index_and_groups_by_average_fee() {
    let alice = dev_client("alice primary wallet");
    let bob = dev_client("bob primary wallet");
    let carol = dev_client("carol primary wallet");

    // Alice: two cheap transfers, queued out of index order.
    let a2 = transfer(&alice, carol.wallet_address(), 5, 30, 100);
    let a1 = transfer(&alice, carol.wallet_address(), 5, 10, 101);
    let (a1_id, a2_id) = (a1.id.clone(), a2.id.clone());
    assert!(a2.next_sig_key_index < a1.next_sig_key_index);

    // Bob: one expensive transfer.
    let b1 = transfer(&bob, carol.wallet_address(), 5, 100, 102);
    let b1_id = b1.id.clone();

    let ordered = sort_pending_transactions(vec![
        SenderGroup {
            transactions: vec![a1, a2],
        },
        SenderGroup {
            transactions: vec![b1],
        },
    ]);

    // Bob's group averages 100 against Alice's 20, so it leads; within
    // Alice's group the lower key index comes first.
    let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec![b1_id.as_str(), a2_id.as_str(), a1_id.as_str()]);
}

#[tokio::test]
async fn forged_blocks_carry_simplified_transactions_and_verify() {
    let delegate = dev_client("delegate one forging wallet");
    let alice = dev_client("alice primary wallet");
    let carol = dev_client("carol primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&alice, 1_000, false, Vec::new()),
    ])
    .await;
    let params = Arc::new(chain_params());
    let crypto: Arc<dyn CryptoClient> = Arc::new(DevCryptoClient::verifier(SYMBOL));
    let mempool = Mempool::new(
        Arc::clone(&params),
        store.clone() as Arc<dyn ChainStore>,
        Arc::clone(&crypto),
    );
    let forger = Forger::new(Arc::clone(&params), store.clone() as Arc<dyn ChainStore>);
    let tip = genesis_tip(store.as_ref()).await;

    mempool
        .submit(transfer(&alice, carol.wallet_address(), 100, 10, 100), 200)
        .await
        .unwrap();

    let block = forger
        .forge_block(&delegate, &mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();

    assert_eq!(block.forger_address, *delegate.wallet_address());
    assert!(block.forger_signature.is_some());
    assert!(crypto.verify_block(&block).await.unwrap());

    let packaged = &block.transactions[0];
    assert!(packaged.sender_signature.is_none());
    assert!(packaged.sender_signature_hash.is_some());
}

#[tokio::test]
async fn forging_drops_transactions_invalidated_since_admission() {
    let delegate = dev_client("delegate one forging wallet");
    let alice = dev_client("alice primary wallet");
    let carol = dev_client("carol primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&alice, 150, false, Vec::new()),
    ])
    .await;
    let params = Arc::new(chain_params());
    let crypto: Arc<dyn CryptoClient> = Arc::new(DevCryptoClient::verifier(SYMBOL));
    let mempool = Mempool::new(
        Arc::clone(&params),
        store.clone() as Arc<dyn ChainStore>,
        Arc::clone(&crypto),
    );
    let forger = Forger::new(Arc::clone(&params), store.clone() as Arc<dyn ChainStore>);
    let tip = genesis_tip(store.as_ref()).await;

    mempool
        .submit(transfer(&alice, carol.wallet_address(), 100, 10, 100), 200)
        .await
        .unwrap();

    // Alice's balance shrinks on chain after admission; the forging pass
    // re-verifies against the store and must drop the transfer.
    let mut account = store.get_account(alice.wallet_address()).await.unwrap();
    account.balance = Amount::from_u64(50);
    store.upsert_account(&account).await.unwrap();

    let block = forger
        .forge_block(&delegate, &mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();
    assert!(block.transactions.is_empty());
}
