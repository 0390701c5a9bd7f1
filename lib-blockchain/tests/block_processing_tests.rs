//! Block verification and deterministic processing, including replay
//! safety and vote-weight maintenance.

mod common;

use std::sync::Arc;

use lib_blockchain::storage::ChainStore;
use lib_blockchain::{
    verify_forged_block, BlockProcessor, ChainError, Forger, Mempool,
};
use lib_crypto::{transaction_id, CryptoClient, DevCryptoClient, KeyType};
use lib_types::{Address, Amount, TransactionType};

use common::*;

const INTERVAL: u64 = 30_000;

struct Chain {
    store: Arc<lib_blockchain::MemoryStore>,
    params: lib_blockchain::ChainParams,
    verifier: Arc<dyn CryptoClient>,
    mempool: Mempool,
    processor: BlockProcessor,
    forger: Forger,
}

fn chain_fixture(store: Arc<lib_blockchain::MemoryStore>) -> Chain {
    let params = chain_params();
    let shared = Arc::new(params.clone());
    let verifier: Arc<dyn CryptoClient> = Arc::new(DevCryptoClient::verifier(SYMBOL));
    Chain {
        mempool: Mempool::new(
            Arc::clone(&shared),
            store.clone() as Arc<dyn ChainStore>,
            Arc::clone(&verifier),
        ),
        processor: BlockProcessor::new(Arc::clone(&shared), store.clone() as Arc<dyn ChainStore>),
        forger: Forger::new(Arc::clone(&shared), store.clone() as Arc<dyn ChainStore>),
        verifier,
        params,
        store,
    }
}

async fn balance_of(store: &lib_blockchain::MemoryStore, address: &Address) -> Amount {
    store
        .get_account(address)
        .await
        .map(|account| account.balance)
        .unwrap_or_else(|_| Amount::zero())
}

#[tokio::test]
async fn genesis_successor_block_moves_funds_and_pays_the_forger() {
    let delegate = dev_client("delegate one forging wallet");
    let alice = dev_client("alice primary wallet");
    let carol = dev_client("carol primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&alice, 200, false, Vec::new()),
    ])
    .await;
    let chain = chain_fixture(Arc::clone(&store));
    let tip = genesis_tip(store.as_ref()).await;
    assert_eq!(tip.height, 0);

    chain
        .mempool
        .submit(transfer(&alice, carol.wallet_address(), 100, 10, 100), 200)
        .await
        .unwrap();

    let block = chain
        .forger
        .forge_block(&delegate, &chain.mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();
    assert_eq!(block.height, 1);
    assert_eq!(block.previous_block_id.as_deref(), Some(tip.id.as_str()));
    assert_eq!(block.transactions.len(), 1);

    let outcome = verify_forged_block(
        store.as_ref(),
        chain.verifier.as_ref(),
        &chain.params,
        INTERVAL,
        delegate.wallet_address(),
        &block,
        &tip,
        60_000,
    )
    .await
    .unwrap();
    assert!(!outcome.delegate_changed_keys);

    let processed = chain.processor.process_block(&block, false).await.unwrap();
    assert_eq!(processed.total_fees, Amount::from_u64(10));

    assert_eq!(balance_of(&store, alice.wallet_address()).await, Amount::from_u64(90));
    assert_eq!(balance_of(&store, carol.wallet_address()).await, Amount::from_u64(100));
    assert_eq!(
        balance_of(&store, delegate.wallet_address()).await,
        Amount::from_u64(10)
    );
    assert_eq!(store.get_max_block_height().await.unwrap(), 1);

    let alice_account = store.get_account(alice.wallet_address()).await.unwrap();
    assert_eq!(alice_account.update_height, Some(1));

    // Re-processing the same block is a no-op under the update-height
    // guard.
    chain.processor.process_block(&block, true).await.unwrap();
    assert_eq!(balance_of(&store, alice.wallet_address()).await, Amount::from_u64(90));
    assert_eq!(balance_of(&store, carol.wallet_address()).await, Amount::from_u64(100));
    assert_eq!(
        balance_of(&store, delegate.wallet_address()).await,
        Amount::from_u64(10)
    );
}

#[tokio::test]
async fn voter_balance_changes_flow_into_delegate_weight() {
    let delegate = dev_client("delegate one forging wallet");
    let alice = dev_client("alice primary wallet");
    let carol = dev_client("carol primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&alice, 200, false, vec![delegate.wallet_address().clone()]),
    ])
    .await;
    let chain = chain_fixture(Arc::clone(&store));
    let tip = genesis_tip(store.as_ref()).await;

    assert_eq!(
        store
            .get_delegate(delegate.wallet_address())
            .await
            .unwrap()
            .vote_weight,
        Amount::from_u64(200)
    );

    chain
        .mempool
        .submit(transfer(&alice, carol.wallet_address(), 100, 10, 100), 200)
        .await
        .unwrap();
    let block = chain
        .forger
        .forge_block(&delegate, &chain.mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();
    chain.processor.process_block(&block, false).await.unwrap();

    // Alice now holds 90; her delegate's weight follows her balance.
    assert_eq!(
        store
            .get_delegate(delegate.wallet_address())
            .await
            .unwrap()
            .vote_weight,
        Amount::from_u64(90)
    );
}

#[tokio::test]
async fn explicit_votes_apply_and_invalid_votes_only_charge_the_fee() {
    let delegate = dev_client("delegate one forging wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&bob, 500, false, Vec::new()),
    ])
    .await;
    let chain = chain_fixture(Arc::clone(&store));
    let tip = genesis_tip(store.as_ref()).await;

    let mut vote = base_transaction(
        TransactionType::Vote,
        bob.wallet_address().clone(),
        10,
        100,
    );
    vote.delegate_address = Some(delegate.wallet_address().clone());
    let vote = bob.prepare_transaction(vote);

    let ghost = Address::from("ldpos0000000000000000000000000000000000000000");
    let mut bad_vote = base_transaction(
        TransactionType::Vote,
        bob.wallet_address().clone(),
        10,
        101,
    );
    bad_vote.delegate_address = Some(ghost.clone());
    let bad_vote = bob.prepare_transaction(bad_vote);

    chain.mempool.submit(vote, 200).await.unwrap();
    chain.mempool.submit(bad_vote, 200).await.unwrap();
    let block = chain
        .forger
        .forge_block(&delegate, &chain.mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();
    chain.processor.process_block(&block, false).await.unwrap();

    assert!(store
        .has_vote_for_delegate(bob.wallet_address(), delegate.wallet_address())
        .await
        .unwrap());
    assert!(!store
        .has_vote_for_delegate(bob.wallet_address(), &ghost)
        .await
        .unwrap());

    // Both fees charged: 500 - 20.
    assert_eq!(balance_of(&store, bob.wallet_address()).await, Amount::from_u64(480));
    // The applied vote contributes Bob's post-block balance.
    assert_eq!(
        store
            .get_delegate(delegate.wallet_address())
            .await
            .unwrap()
            .vote_weight,
        Amount::from_u64(480)
    );
}

#[tokio::test]
async fn multisig_member_key_advancement_is_per_packet() {
    let delegate = dev_client("delegate one forging wallet");
    let wallet = dev_client("shared treasury wallet");
    let m1 = dev_client("member one wallet");
    let m2 = dev_client("member two wallet");
    let m3 = dev_client("member three wallet");
    let carol = dev_client("carol primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&wallet, 1_000, false, Vec::new()),
        genesis_member_account(&m1, 50),
        genesis_member_account(&m2, 50),
        genesis_member_account(&m3, 50),
    ])
    .await;
    register_wallet(
        &store,
        wallet.wallet_address(),
        &[
            m1.wallet_address().clone(),
            m2.wallet_address().clone(),
            m3.wallet_address().clone(),
        ],
        2,
    )
    .await;
    let chain = chain_fixture(Arc::clone(&store));
    let tip = genesis_tip(store.as_ref()).await;

    let mut transaction = base_transaction(
        TransactionType::Transfer,
        wallet.wallet_address().clone(),
        10,
        100,
    );
    transaction.amount = Some(Amount::from_u64(100));
    transaction.recipient_address = Some(carol.wallet_address().clone());
    transaction.id = transaction_id(&transaction);
    // M1 signs with its current key, M2 with its committed next key.
    transaction.signatures.push(m1.sign_multisig_transaction(&transaction));
    let m2_next_key = m2.public_key(KeyType::Multisig, 1);
    transaction.signatures.push(lib_types::SignaturePacket {
        signer_address: m2.wallet_address().clone(),
        multisig_public_key: m2_next_key.clone(),
        next_multisig_public_key: m2.public_key(KeyType::Multisig, 2),
        next_multisig_key_index: 2,
        signature: Some(lib_crypto::sign_message(&m2_next_key, &transaction.id)),
        signature_hash: None,
    });

    chain.mempool.submit(transaction, 200).await.unwrap();
    let block = chain
        .forger
        .forge_block(&delegate, &chain.mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();
    assert_eq!(block.transactions.len(), 1);
    verify_forged_block(
        store.as_ref(),
        chain.verifier.as_ref(),
        &chain.params,
        INTERVAL,
        delegate.wallet_address(),
        &block,
        &tip,
        60_000,
    )
    .await
    .unwrap();
    chain.processor.process_block(&block, false).await.unwrap();

    let m1_account = store.get_account(m1.wallet_address()).await.unwrap();
    assert_eq!(
        m1_account.multisig_public_key.as_deref(),
        Some(m1.public_key(KeyType::Multisig, 0).as_str())
    );

    let m2_account = store.get_account(m2.wallet_address()).await.unwrap();
    assert_eq!(m2_account.multisig_public_key.as_deref(), Some(m2_next_key.as_str()));
    assert_eq!(
        m2_account.next_multisig_public_key.as_deref(),
        Some(m2.public_key(KeyType::Multisig, 2).as_str())
    );

    let wallet_account = store.get_account(wallet.wallet_address()).await.unwrap();
    assert!(wallet_account.is_multisig());
    assert_eq!(wallet_account.balance, Amount::from_u64(890));
    assert_eq!(balance_of(&store, carol.wallet_address()).await, Amount::from_u64(100));
}

#[tokio::test]
async fn a_transaction_cannot_appear_in_two_blocks() {
    let delegate = dev_client("delegate one forging wallet");
    let alice = dev_client("alice primary wallet");
    let carol = dev_client("carol primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&alice, 1_000, false, Vec::new()),
    ])
    .await;
    let chain = chain_fixture(Arc::clone(&store));
    let tip = genesis_tip(store.as_ref()).await;

    chain
        .mempool
        .submit(transfer(&alice, carol.wallet_address(), 100, 10, 100), 200)
        .await
        .unwrap();
    let block = chain
        .forger
        .forge_block(&delegate, &chain.mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();
    chain.processor.process_block(&block, false).await.unwrap();

    // A second block re-carrying the same transaction must be rejected.
    let mut replayed = lib_types::Block {
        id: String::new(),
        height: 2,
        timestamp: 2 * INTERVAL,
        previous_block_id: Some(block.id.clone()),
        forger_address: delegate.wallet_address().clone(),
        forging_public_key: String::new(),
        next_forging_public_key: String::new(),
        next_forging_key_index: 0,
        transactions: block.transactions.clone(),
        forger_signature: None,
        signatures: Vec::new(),
    };
    replayed = delegate.prepare_block(replayed).await.unwrap();

    let verdict = verify_forged_block(
        store.as_ref(),
        chain.verifier.as_ref(),
        &chain.params,
        INTERVAL,
        delegate.wallet_address(),
        &replayed,
        &block,
        90_000,
    )
    .await;
    assert!(matches!(
        verdict,
        Err(ChainError::TransactionAlreadyProcessed { .. })
    ));
}

#[tokio::test]
async fn key_rotation_purges_unverifiable_pending_transactions() {
    let delegate = dev_client("delegate one forging wallet");
    let alice = dev_client("alice primary wallet");
    let carol = dev_client("carol primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&alice, 1_000, false, Vec::new()),
    ])
    .await;
    let chain = chain_fixture(Arc::clone(&store));
    let tip = genesis_tip(store.as_ref()).await;

    // A pending transfer signed with Alice's current key.
    chain
        .mempool
        .submit(transfer(&alice, carol.wallet_address(), 100, 10, 100), 200)
        .await
        .unwrap();
    assert_eq!(chain.mempool.pending_count(), 1);

    // A peer block rotates Alice's sig keys out from under it.
    let mut rotate = base_transaction(
        TransactionType::RegisterSigDetails,
        alice.wallet_address().clone(),
        10,
        150,
    );
    rotate.new_sig_public_key = Some(alice.public_key(KeyType::Sig, 7));
    rotate.new_next_sig_public_key = Some(alice.public_key(KeyType::Sig, 8));
    rotate.new_next_sig_key_index = Some(1);
    rotate.sig_public_key = Some(alice.public_key(KeyType::Sig, 0));
    rotate.next_sig_public_key = Some(alice.public_key(KeyType::Sig, 1));
    rotate.next_sig_key_index = Some(9);
    rotate.id = transaction_id(&rotate);
    rotate.sender_signature = Some(lib_crypto::sign_message(
        &alice.public_key(KeyType::Sig, 0),
        &rotate.id,
    ));

    let mut block = lib_types::Block {
        id: String::new(),
        height: 1,
        timestamp: INTERVAL,
        previous_block_id: Some(tip.id.clone()),
        forger_address: delegate.wallet_address().clone(),
        forging_public_key: String::new(),
        next_forging_public_key: String::new(),
        next_forging_key_index: 0,
        transactions: vec![rotate.simplified()],
        forger_signature: None,
        signatures: Vec::new(),
    };
    block = delegate.prepare_block(block).await.unwrap();

    let processed = chain.processor.process_block(&block, false).await.unwrap();
    chain
        .mempool
        .purge_for_block(&block, &processed.updated_accounts)
        .await;

    // The old-key transfer is no longer verifiable and must be gone.
    assert_eq!(chain.mempool.pending_count(), 0);

    let account = store.get_account(alice.wallet_address()).await.unwrap();
    assert_eq!(
        account.sig_public_key.as_deref(),
        Some(alice.public_key(KeyType::Sig, 7).as_str())
    );
}

#[tokio::test]
async fn delegate_registration_enables_votes_in_the_same_block() {
    let delegate = dev_client("delegate one forging wallet");
    let bob = dev_client("bob primary wallet");
    let store = init_store(vec![
        genesis_account(&delegate, 0, true, Vec::new()),
        genesis_account(&bob, 500, false, Vec::new()),
    ])
    .await;
    let chain = chain_fixture(Arc::clone(&store));
    let tip = genesis_tip(store.as_ref()).await;

    let mut register = base_transaction(
        TransactionType::RegisterForgingDetails,
        bob.wallet_address().clone(),
        10,
        100,
    );
    register.new_forging_public_key = Some(bob.public_key(KeyType::Forging, 0));
    register.new_next_forging_public_key = Some(bob.public_key(KeyType::Forging, 1));
    register.new_next_forging_key_index = Some(1);
    let register = bob.prepare_transaction(register);

    let mut vote = base_transaction(
        TransactionType::Vote,
        bob.wallet_address().clone(),
        10,
        101,
    );
    vote.delegate_address = Some(bob.wallet_address().clone());
    let vote = bob.prepare_transaction(vote);

    chain.mempool.submit(register, 200).await.unwrap();
    chain.mempool.submit(vote, 200).await.unwrap();
    let block = chain
        .forger
        .forge_block(&delegate, &chain.mempool, 1, INTERVAL, tip.id.clone(), 60_000)
        .await
        .unwrap();
    assert_eq!(block.transactions.len(), 2);
    chain.processor.process_block(&block, false).await.unwrap();

    assert!(store.has_delegate(bob.wallet_address()).await.unwrap());
    // 500 - 20 in fees, all of it now weighted behind Bob's own delegate.
    assert_eq!(
        store
            .get_delegate(bob.wallet_address())
            .await
            .unwrap()
            .vote_weight,
        Amount::from_u64(480)
    );
}
