//! Tests for transaction history reconciliation
//!
//! Tests cover:
//! - Direction and amount of received, sent and internal transactions
//! - Backwards paging by block range
//! - Single transaction lookup (mined, unmined, unknown)
//! - Malformed records and stake transactions
//!
//! Run with: cargo test --test history_test -- --nocapture

mod common;

use common::{external_address, TestWallet, BEST_HEIGHT, PASSPHRASE};
use dcrbridge::backend::memory::{DEFAULT_ACCOUNT, FUNDING_FEE};
use dcrbridge::backend::{CreditRecord, TransactionRecord};
use dcrbridge::{
    Amount, BackendError, BridgeError, Hash, Stage, TransactionDestination, TransactionDirection,
    TransactionType,
};

#[tokio::test]
async fn test_funding_shows_as_received() {
    let wallet = TestWallet::new();
    wallet.fund(7_500_000, 950);

    let page = wallet.manager.transaction_history(-1, 10).await.unwrap();
    assert_eq!(page.transactions.len(), 1);

    let tx = &page.transactions[0];
    assert_eq!(tx.direction, TransactionDirection::Received);
    assert_eq!(tx.amount, Amount(7_500_000));
    assert_eq!(tx.fee, FUNDING_FEE);
    assert!(tx.size > 0);
    assert_eq!(tx.fee_rate, Amount(FUNDING_FEE.atoms() * 1000 / tx.size as i64));
    assert!(!tx.formatted_time.is_empty());
}

#[tokio::test]
async fn test_history_pages_backwards_until_enough() {
    let wallet = TestWallet::new();
    let at_100 = wallet.fund(1_000_000, 100);
    let at_90 = wallet.fund(2_000_000, 90);
    wallet.fund(3_000_000, 50);
    wallet.fund(4_000_000, 10);

    let page = wallet.manager.transaction_history(100, 2).await.unwrap();
    let hashes: Vec<Hash> = page.transactions.iter().map(|t| t.hash).collect();
    assert_eq!(hashes, vec![at_100.hash, at_90.hash]);
    assert_eq!(page.end_block_height, 89);
}

#[tokio::test]
async fn test_history_reads_to_genesis_when_short() {
    let wallet = TestWallet::new();
    wallet.fund(1_000_000, 0);
    wallet.fund(1_000_000, 500);
    wallet.fund(1_000_000, -1);

    let page = wallet.manager.transaction_history(-1, 100).await.unwrap();
    assert_eq!(page.transactions.len(), 3);
    assert_eq!(page.end_block_height, 0);

    // newest first
    let timestamps: Vec<i64> = page.transactions.iter().map(|t| t.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(timestamps, sorted);
}

#[tokio::test]
async fn test_internal_transfer_costs_only_the_fee() {
    let wallet = TestWallet::new();
    let key = wallet.fund(5_000_000, 900);
    let own = wallet.backend.new_address(DEFAULT_ACCOUNT);

    let hash = wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[TransactionDestination::new(own, Amount(1_000_000))],
            &[],
            PASSPHRASE,
        )
        .await
        .unwrap();

    let details = wallet.manager.get_transaction(&hash.to_string()).await.unwrap();
    assert_eq!(details.transaction.direction, TransactionDirection::Transferred);
    assert_eq!(details.transaction.amount, details.transaction.fee);
    assert_eq!(details.inputs.len(), 1);
    assert_eq!(details.inputs[0].previous_output, key);
    assert_eq!(details.outputs.len(), 2);
}

#[tokio::test]
async fn test_get_transaction_reports_block_height() {
    let wallet = TestWallet::new();
    let key = wallet.fund(5_000_000, 900);

    let details = wallet.manager.get_transaction(&key.hash.to_string()).await.unwrap();
    assert_eq!(details.block_height, 900);
    assert_eq!(details.confirmations, BEST_HEIGHT as i32 - 900 + 1);
    assert_eq!(details.outputs[0].amount, Amount(5_000_000));

    let pending = wallet.fund(1_000_000, -1);
    let details = wallet.manager.get_transaction(&pending.hash.to_string()).await.unwrap();
    assert_eq!(details.block_height, -1);
    assert_eq!(details.confirmations, 0);
}

#[tokio::test]
async fn test_get_transaction_unknown_and_malformed_hash() {
    let wallet = TestWallet::new();

    let unknown = Hash([7u8; 32]).to_string();
    let result = wallet.manager.get_transaction(&unknown).await;
    assert!(matches!(result, Err(BridgeError::NotFound(_))));

    let result = wallet.manager.get_transaction("xyz").await;
    assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
}

#[tokio::test]
async fn test_malformed_record_fails_the_page() {
    let wallet = TestWallet::new();
    wallet.fund(1_000_000, 400);
    wallet.backend.add_transaction(
        500,
        TransactionRecord {
            hash: Hash([9u8; 32]),
            transaction: vec![1, 2, 3],
            credits: Vec::new(),
            debits: Vec::new(),
            fee: Amount::ZERO,
            timestamp: 0,
            tx_type: TransactionType::Regular,
        },
    );

    let result = wallet.manager.transaction_history(-1, 10).await;
    assert!(matches!(result, Err(BridgeError::MalformedTransaction(_))));
}

#[tokio::test]
async fn test_stake_record_without_bytes_uses_provisional_fee() {
    let wallet = TestWallet::new();
    wallet.backend.add_transaction(
        700,
        TransactionRecord {
            hash: Hash([3u8; 32]),
            transaction: Vec::new(),
            credits: vec![CreditRecord {
                index: 0,
                account: DEFAULT_ACCOUNT,
                internal: false,
                amount: Amount(2_000_000),
                address: external_address('v'),
            }],
            debits: Vec::new(),
            fee: Amount(1_000),
            timestamp: 1_600_000_000,
            tx_type: TransactionType::Vote,
        },
    );

    let page = wallet.manager.transaction_history(-1, 1).await.unwrap();
    let tx = &page.transactions[0];
    assert_eq!(tx.direction, TransactionDirection::Unclassified);
    assert_eq!(tx.amount, Amount(2_000_000));
    assert_eq!(tx.fee, Amount(1_000));
    assert_eq!(tx.size, 0);
}

#[tokio::test]
async fn test_history_failure_is_tagged_with_stage() {
    let wallet = TestWallet::new();
    wallet
        .backend
        .fail_at(Stage::FetchingTransactions, BackendError::unavailable("connection refused"));

    let err = wallet.manager.transaction_history(-1, 10).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::FetchingTransactions));
}

#[tokio::test]
async fn test_sent_payment_history_entry() {
    let wallet = TestWallet::new();
    let key = wallet.fund(5_000_000, 900);

    wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[TransactionDestination::new(external_address('s'), Amount(1_250_000))],
            &[],
            PASSPHRASE,
        )
        .await
        .unwrap();
    wallet.backend.mine_pending(BEST_HEIGHT + 1);

    let page = wallet.manager.transaction_history(-1, 2).await.unwrap();
    assert_eq!(page.transactions.len(), 2);
    let sent = page
        .transactions
        .iter()
        .find(|t| t.direction == TransactionDirection::Sent)
        .unwrap();
    assert_eq!(sent.amount, Amount(1_250_000));
}
