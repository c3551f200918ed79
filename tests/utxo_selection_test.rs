//! Tests for listing and selecting unspent outputs
//!
//! Tests cover:
//! - Confirmation counts derived from the best block
//! - Targeted listings read to the end of the stream
//! - Key selection order, early stop and missing keys
//! - Stage-tagged backend failures
//!
//! Run with: cargo test --test utxo_selection_test -- --nocapture

mod common;

use common::{TestWallet, BEST_HEIGHT};
use dcrbridge::backend::memory::DEFAULT_ACCOUNT;
use dcrbridge::{Amount, BackendError, BridgeError, OutputKey, Stage};

#[tokio::test]
async fn test_list_unspent_reports_confirmations() {
    let wallet = TestWallet::new();
    let mined = wallet.fund(5_000_000, 990);
    let unmined = wallet.fund(1_000_000, -1);

    let outputs = wallet
        .manager
        .list_unspent(DEFAULT_ACCOUNT, Amount::ZERO, 0)
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);

    let first = outputs.iter().find(|o| o.key == mined).unwrap();
    assert_eq!(first.confirmations, BEST_HEIGHT as i32 - 990 + 1);
    assert_eq!(first.amount, Amount(5_000_000));

    let second = outputs.iter().find(|o| o.key == unmined).unwrap();
    assert_eq!(second.confirmations, 0);

    let confirmed = wallet
        .manager
        .list_unspent(DEFAULT_ACCOUNT, Amount::ZERO, 2)
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].key, mined);
}

#[tokio::test]
async fn test_list_unspent_with_target_keeps_every_streamed_output() {
    let wallet = TestWallet::new();
    let keys: Vec<OutputKey> = (0..4).map(|i| wallet.fund(5_000_000, 900 + i)).collect();
    // Backend hands back more than the first output needed for the target
    wallet.backend.set_unspent_surplus(3);

    let outputs = wallet
        .manager
        .list_unspent(DEFAULT_ACCOUNT, Amount(1_000_000), 1)
        .await
        .unwrap();

    let listed: Vec<OutputKey> = outputs.iter().map(|o| o.key).collect();
    assert_eq!(listed, keys);
}

#[tokio::test]
async fn test_list_unspent_rejects_negative_target() {
    let wallet = TestWallet::new();
    let result = wallet.manager.list_unspent(DEFAULT_ACCOUNT, Amount(-1), 0).await;
    assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
}

#[tokio::test]
async fn test_select_by_keys_follows_stream_order() {
    let wallet = TestWallet::new();
    let a = wallet.fund(1_000_000, 900);
    let _b = wallet.fund(2_000_000, 901);
    let c = wallet.fund(3_000_000, 902);

    let selection = wallet
        .manager
        .select_by_keys(DEFAULT_ACCOUNT, &[c, a], 1)
        .await
        .unwrap();

    let keys: Vec<OutputKey> = selection.outputs.iter().map(|o| o.key).collect();
    assert_eq!(keys, vec![a, c]);
    assert!(selection.is_complete());
    assert_eq!(selection.total(), Amount(4_000_000));
}

#[tokio::test]
async fn test_select_by_keys_stops_once_all_keys_are_found() {
    let wallet = TestWallet::new();
    let a = wallet.fund(1_000_000, 900);
    let b = wallet.fund(2_000_000, 901);
    let c = wallet.fund(3_000_000, 902);
    // Stream breaks right after the second output
    wallet
        .backend
        .fail_stream_at(Stage::ListingUnspent, 2, BackendError::internal("stream reset"));

    let selection = wallet
        .manager
        .select_by_keys(DEFAULT_ACCOUNT, &[b, a], 1)
        .await
        .unwrap();
    let keys: Vec<OutputKey> = selection.outputs.iter().map(|o| o.key).collect();
    assert_eq!(keys, vec![a, b]);
    assert!(selection.is_complete());

    // Asking for the third output has to read past the break
    let result = wallet.manager.select_by_keys(DEFAULT_ACCOUNT, &[c], 1).await;
    assert!(matches!(
        result,
        Err(BridgeError::Transport {
            stage: Stage::ListingUnspent,
            ..
        })
    ));
}

#[tokio::test]
async fn test_select_by_keys_reports_missing_keys() {
    let wallet = TestWallet::new();
    let a = wallet.fund(1_000_000, 900);
    let b = wallet.fund(2_000_000, 901);
    assert!(wallet.backend.remove_unspent(&b));

    let selection = wallet
        .manager
        .select_by_keys(DEFAULT_ACCOUNT, &[a, b], 1)
        .await
        .unwrap();
    assert_eq!(selection.outputs.len(), 1);
    assert_eq!(selection.missing, vec![b]);
    assert!(!selection.is_complete());
}

#[tokio::test]
async fn test_select_by_keys_ignores_unconfirmed_outputs() {
    let wallet = TestWallet::new();
    let pending = wallet.fund(1_000_000, -1);

    let selection = wallet
        .manager
        .select_by_keys(DEFAULT_ACCOUNT, &[pending], 1)
        .await
        .unwrap();
    assert!(selection.outputs.is_empty());
    assert_eq!(selection.missing, vec![pending]);
}

#[tokio::test]
async fn test_select_by_keys_requires_keys() {
    let wallet = TestWallet::new();
    let result = wallet.manager.select_by_keys(DEFAULT_ACCOUNT, &[], 1).await;
    assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
}

#[tokio::test]
async fn test_listing_failure_is_tagged_with_stage() {
    let wallet = TestWallet::new();
    wallet.fund(1_000_000, 900);
    wallet
        .backend
        .fail_at(Stage::ListingUnspent, BackendError::unavailable("wallet service restarting"));

    let err = wallet
        .manager
        .list_unspent(DEFAULT_ACCOUNT, Amount::ZERO, 1)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::ListingUnspent));
    assert!(err.to_string().contains("wallet service restarting"));
}

#[tokio::test]
async fn test_stream_failure_midway_fails_the_listing() {
    let wallet = TestWallet::new();
    wallet.fund(1_000_000, 900);
    wallet.fund(2_000_000, 901);
    wallet
        .backend
        .fail_stream_at(Stage::ListingUnspent, 1, BackendError::internal("stream reset"));

    let result = wallet.manager.list_unspent(DEFAULT_ACCOUNT, Amount::ZERO, 1).await;
    assert!(matches!(
        result,
        Err(BridgeError::Transport {
            stage: Stage::ListingUnspent,
            ..
        })
    ));
}
