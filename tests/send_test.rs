//! Tests for assembling, signing and publishing transactions
//!
//! Tests cover:
//! - Explicit output spending with automatic and explicit change
//! - Send-max destinations, and explicit change taking precedence over them
//! - Insufficient funds, overflowing amounts and stale selections
//! - Validation before any state-changing backend call
//! - Backend-selected sends from an account
//!
//! Run with: cargo test --test send_test -- --nocapture

mod common;

use common::{external_address, TestWallet, PASSPHRASE};
use dcrbridge::backend::memory::{address_script, DEFAULT_ACCOUNT};
use dcrbridge::wire::{fee_size_rate, WireTx};
use dcrbridge::{Amount, BridgeError, Stage, TransactionDestination, TransactionDirection};

const FUNDED: i64 = 10_000_000;

/// One input, destination plus change: 253 bytes at 10 atoms/byte
const FEE_TWO_OUTPUTS: i64 = 2_530;
/// One input, single output: 217 bytes
const FEE_ONE_OUTPUT: i64 = 2_170;

fn last_published(wallet: &TestWallet) -> WireTx {
    let published = wallet.backend.published();
    WireTx::deserialize(published.last().unwrap()).unwrap()
}

#[tokio::test]
async fn test_send_from_utxos_with_automatic_change() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);
    let destination = TransactionDestination::new(external_address('a'), Amount(3_000_000));

    let hash = wallet
        .manager
        .send_from_utxos(DEFAULT_ACCOUNT, 1, &[key], &[destination], &[], PASSPHRASE)
        .await
        .unwrap();

    let published = wallet.backend.published();
    assert_eq!(published.len(), 1);
    let tx = last_published(&wallet);
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[0].value, Amount(3_000_000));
    assert_eq!(tx.outputs[1].value, Amount(FUNDED - 3_000_000 - FEE_TWO_OUTPUTS));

    let decoded = fee_size_rate(&published[0]).unwrap();
    assert_eq!(decoded.fee, Amount(FEE_TWO_OUTPUTS));
    assert_eq!(decoded.size, 253);

    // spent output gone, change output pending
    let unspent = wallet.backend.unspent_keys(DEFAULT_ACCOUNT);
    assert!(!unspent.contains(&key));
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].hash, hash);
}

#[tokio::test]
async fn test_send_max_spends_everything_without_change() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);

    wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[TransactionDestination::send_max(external_address('b'))],
            &[],
            PASSPHRASE,
        )
        .await
        .unwrap();

    let tx = last_published(&wallet);
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].value, Amount(FUNDED - FEE_ONE_OUTPUT));
    assert!(wallet.backend.unspent_keys(DEFAULT_ACCOUNT).is_empty());
}

#[tokio::test]
async fn test_insufficient_funds_publishes_nothing() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);
    let destination = TransactionDestination::new(external_address('c'), Amount(FUNDED));

    let err = wallet
        .manager
        .send_from_utxos(DEFAULT_ACCOUNT, 1, &[key], &[destination], &[], PASSPHRASE)
        .await
        .unwrap_err();

    match err {
        BridgeError::InsufficientFunds { available, required } => {
            assert_eq!(available, Amount(FUNDED));
            assert_eq!(required, Amount(FUNDED + FEE_TWO_OUTPUTS));
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }
    assert_eq!(wallet.backend.call_count(Stage::Signing), 0);
    assert!(wallet.backend.published().is_empty());
}

#[tokio::test]
async fn test_overflowing_destination_amounts_are_rejected() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);

    let err = wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[
                TransactionDestination::new(external_address('x'), Amount(i64::MAX)),
                TransactionDestination::new(external_address('y'), Amount(i64::MAX)),
            ],
            &[],
            PASSPHRASE,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::InvalidInput(_)), "unexpected error: {:?}", err);
    assert_eq!(wallet.backend.call_count(Stage::Signing), 0);
    assert!(wallet.backend.published().is_empty());
    assert!(wallet.backend.unspent_keys(DEFAULT_ACCOUNT).contains(&key));
}

#[tokio::test]
async fn test_spent_selection_is_rejected() {
    let wallet = TestWallet::new();
    let a = wallet.fund(FUNDED, 900);
    let b = wallet.fund(FUNDED, 901);
    let destination = TransactionDestination::new(external_address('d'), Amount(1_000_000));

    wallet.backend.remove_unspent(&b);
    let partial = wallet
        .manager
        .send_from_utxos(DEFAULT_ACCOUNT, 1, &[a, b], &[destination.clone()], &[], PASSPHRASE)
        .await;
    assert!(matches!(partial, Err(BridgeError::StaleState(_))));

    wallet.backend.remove_unspent(&a);
    let none = wallet
        .manager
        .send_from_utxos(DEFAULT_ACCOUNT, 1, &[a], &[destination], &[], PASSPHRASE)
        .await;
    assert!(matches!(none, Err(BridgeError::NoInputsSelected)));
    assert!(wallet.backend.published().is_empty());
}

#[tokio::test]
async fn test_single_zero_change_destination_takes_all_change() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);
    let change_address = wallet.backend.new_address(DEFAULT_ACCOUNT);

    wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[TransactionDestination::new(external_address('e'), Amount(4_000_000))],
            &[TransactionDestination::new(change_address, Amount::ZERO)],
            PASSPHRASE,
        )
        .await
        .unwrap();

    let tx = last_published(&wallet);
    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[1].value, Amount(FUNDED - 4_000_000 - FEE_TWO_OUTPUTS));
    // no address was generated for change
    assert_eq!(wallet.backend.call_count(Stage::GeneratingAddress), 0);
}

#[tokio::test]
async fn test_explicit_change_wins_over_send_max_destination() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);
    let max_address = external_address('n');
    let change_address = wallet.backend.new_address(DEFAULT_ACCOUNT);

    wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[
                TransactionDestination::send_max(max_address.clone()),
                TransactionDestination::new(external_address('o'), Amount(4_000_000)),
            ],
            &[TransactionDestination::new(change_address.clone(), Amount::ZERO)],
            PASSPHRASE,
        )
        .await
        .unwrap();

    let tx = last_published(&wallet);
    assert_eq!(tx.outputs.len(), 2);
    assert!(tx
        .outputs
        .iter()
        .all(|o| o.pk_script != address_script(&max_address)));

    assert_eq!(tx.outputs[0].pk_script, address_script(&external_address('o')));
    assert_eq!(tx.outputs[0].value, Amount(4_000_000));
    assert_eq!(tx.outputs[1].pk_script, address_script(&change_address));
    assert_eq!(tx.outputs[1].value, Amount(FUNDED - 4_000_000 - FEE_TWO_OUTPUTS));
    assert_eq!(wallet.backend.call_count(Stage::GeneratingAddress), 0);
}

#[tokio::test]
async fn test_explicit_change_must_match_computed_change() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);

    let result = wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[TransactionDestination::new(external_address('f'), Amount(4_000_000))],
            &[
                TransactionDestination::new(external_address('g'), Amount(1_000_000)),
                TransactionDestination::new(external_address('h'), Amount(1_000_000)),
            ],
            PASSPHRASE,
        )
        .await;

    assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
    assert_eq!(wallet.backend.call_count(Stage::Signing), 0);
}

#[tokio::test]
async fn test_invalid_destination_fails_before_selection() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);

    let result = wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[TransactionDestination::new("not-an-address", Amount(1_000))],
            &[],
            PASSPHRASE,
        )
        .await;

    assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
    assert_eq!(wallet.backend.call_count(Stage::ListingUnspent), 0);
}

#[tokio::test]
async fn test_two_send_max_destinations_are_rejected() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);

    let result = wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[
                TransactionDestination::send_max(external_address('i')),
                TransactionDestination::send_max(external_address('j')),
            ],
            &[],
            PASSPHRASE,
        )
        .await;
    assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
}

#[tokio::test]
async fn test_wrong_passphrase_fails_at_signing() {
    let wallet = TestWallet::new();
    let key = wallet.fund(FUNDED, 900);

    let err = wallet
        .manager
        .send_from_utxos(
            DEFAULT_ACCOUNT,
            1,
            &[key],
            &[TransactionDestination::new(external_address('k'), Amount(1_000_000))],
            &[],
            "wrong",
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Signing));
    assert_eq!(wallet.backend.call_count(Stage::Publishing), 0);
    assert!(wallet.backend.unspent_keys(DEFAULT_ACCOUNT).contains(&key));
}

#[tokio::test]
async fn test_send_from_account_lets_backend_select() {
    let wallet = TestWallet::new();
    wallet.fund(FUNDED, 900);

    let hash = wallet
        .manager
        .send_from_account(
            DEFAULT_ACCOUNT,
            1,
            &[TransactionDestination::new(external_address('l'), Amount(2_000_000))],
            PASSPHRASE,
        )
        .await
        .unwrap();

    let details = wallet.manager.get_transaction(&hash.to_string()).await.unwrap();
    assert_eq!(details.transaction.direction, TransactionDirection::Sent);
    assert_eq!(details.transaction.amount, Amount(2_000_000));
    assert_eq!(details.transaction.fee, Amount(FEE_TWO_OUTPUTS));
    assert_eq!(details.block_height, -1);
}

#[tokio::test]
async fn test_send_from_account_send_max() {
    let wallet = TestWallet::new();
    wallet.fund(FUNDED, 900);

    wallet
        .manager
        .send_from_account(
            DEFAULT_ACCOUNT,
            1,
            &[TransactionDestination::send_max(external_address('m'))],
            PASSPHRASE,
        )
        .await
        .unwrap();

    let tx = last_published(&wallet);
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].value, Amount(FUNDED - FEE_ONE_OUTPUT));
    assert!(wallet.backend.unspent_keys(DEFAULT_ACCOUNT).is_empty());
}
