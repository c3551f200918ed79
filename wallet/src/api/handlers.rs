use axum::{
    extract::{Path, Query, State},
    Json,
};
use dcrbridge::sync::LogListener;
use dcrbridge::{
    Account, AddressInfo, Balance, ConnectionInfo, SyncProgressReport, Transaction, TransactionDetails,
    UnspentOutput, WalletManager,
};
use std::sync::Arc;

use super::types::{
    AccountNumberResponse, AddressResponse, BestBlockResponse, ConfirmationsQuery, CreateAccountRequest,
    HistoryQuery, RescanRequest, SendRequest, SendResponse, SendUtxosRequest, UnspentQuery,
    ValidateAddressResponse,
};
use crate::error::ApiError;

fn confirmations(manager: &WalletManager, requested: Option<i32>) -> Result<i32, ApiError> {
    match requested {
        Some(n) if n < 0 => Err(ApiError::InvalidRequest(
            "required_confirmations cannot be negative".to_string(),
        )),
        Some(n) => Ok(n),
        None => Ok(manager.config().required_confirmations),
    }
}

// ============================================================================
// Accounts and addresses
// ============================================================================

pub async fn list_accounts_handler(
    State(manager): State<Arc<WalletManager>>,
    Query(query): Query<ConfirmationsQuery>,
) -> Result<Json<Vec<Account>>, ApiError> {
    let required = confirmations(&manager, query.required_confirmations)?;
    let accounts = manager.accounts_overview(required).await?;
    Ok(Json(accounts))
}

pub async fn create_account_handler(
    State(manager): State<Arc<WalletManager>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<AccountNumberResponse>, ApiError> {
    let number = manager.next_account(&req.name, &req.passphrase).await?;
    Ok(Json(AccountNumberResponse { name: req.name, number }))
}

pub async fn account_by_name_handler(
    State(manager): State<Arc<WalletManager>>,
    Path(name): Path<String>,
) -> Result<Json<AccountNumberResponse>, ApiError> {
    let number = manager.account_number(&name).await?;
    Ok(Json(AccountNumberResponse { name, number }))
}

pub async fn account_balance_handler(
    State(manager): State<Arc<WalletManager>>,
    Path(account): Path<u32>,
    Query(query): Query<ConfirmationsQuery>,
) -> Result<Json<Balance>, ApiError> {
    let required = confirmations(&manager, query.required_confirmations)?;
    let balance = manager.account_balance(account, required).await?;
    Ok(Json(balance))
}

pub async fn next_address_handler(
    State(manager): State<Arc<WalletManager>>,
    Path(account): Path<u32>,
) -> Result<Json<AddressResponse>, ApiError> {
    let address = manager.generate_receive_address(account).await?;
    Ok(Json(AddressResponse { address }))
}

pub async fn unspent_handler(
    State(manager): State<Arc<WalletManager>>,
    Path(account): Path<u32>,
    Query(query): Query<UnspentQuery>,
) -> Result<Json<Vec<UnspentOutput>>, ApiError> {
    let required = confirmations(&manager, query.required_confirmations)?;
    let outputs = manager.list_unspent(account, query.target_amount, required).await?;
    Ok(Json(outputs))
}

pub async fn address_info_handler(
    State(manager): State<Arc<WalletManager>>,
    Path(address): Path<String>,
) -> Result<Json<AddressInfo>, ApiError> {
    let info = manager.address_info(&address).await?;
    Ok(Json(info))
}

pub async fn validate_address_handler(
    State(manager): State<Arc<WalletManager>>,
    Path(address): Path<String>,
) -> Result<Json<ValidateAddressResponse>, ApiError> {
    let valid = manager.validate_address(&address).await?;
    Ok(Json(ValidateAddressResponse { address, valid }))
}

// ============================================================================
// Sending
// ============================================================================

pub async fn send_handler(
    State(manager): State<Arc<WalletManager>>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let required = confirmations(&manager, req.required_confirmations)?;
    let hash = manager
        .send_from_account(req.source_account, required, &req.destinations, &req.passphrase)
        .await?;
    Ok(Json(SendResponse { hash }))
}

pub async fn send_utxos_handler(
    State(manager): State<Arc<WalletManager>>,
    Json(req): Json<SendUtxosRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let required = confirmations(&manager, req.required_confirmations)?;
    let hash = manager
        .send_from_utxos(
            req.source_account,
            required,
            &req.utxo_keys,
            &req.destinations,
            &req.change_destinations,
            &req.passphrase,
        )
        .await?;
    Ok(Json(SendResponse { hash }))
}

// ============================================================================
// History and chain state
// ============================================================================

pub async fn history_handler(
    State(manager): State<Arc<WalletManager>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<dcrbridge::HistoryPage>, ApiError> {
    let page = manager
        .transaction_history(query.start_height, query.min_return)
        .await?;
    Ok(Json(page))
}

pub async fn transaction_handler(
    State(manager): State<Arc<WalletManager>>,
    Path(hash): Path<String>,
) -> Result<Json<TransactionDetails>, ApiError> {
    let details = manager.get_transaction(&hash).await?;
    Ok(Json(details))
}

pub async fn best_block_handler(
    State(manager): State<Arc<WalletManager>>,
) -> Result<Json<BestBlockResponse>, ApiError> {
    let best = manager.best_block().await?;
    Ok(Json(BestBlockResponse {
        hash: best.hash,
        height: best.height,
    }))
}

pub async fn connection_handler(
    State(manager): State<Arc<WalletManager>>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let info = manager.connection_info().await?;
    Ok(Json(info))
}

// ============================================================================
// Sync
// ============================================================================

/// Starts a sync in the background and returns the first report
pub async fn start_sync_handler(
    State(manager): State<Arc<WalletManager>>,
) -> Result<Json<SyncProgressReport>, ApiError> {
    let session = manager.start_sync(Arc::new(LogListener))?;
    Ok(Json(session.progress()))
}

pub async fn sync_status_handler(State(manager): State<Arc<WalletManager>>) -> Json<SyncProgressReport> {
    Json(manager.sync_report())
}

pub async fn cancel_sync_handler(State(manager): State<Arc<WalletManager>>) -> Json<SyncProgressReport> {
    manager.cancel_sync();
    Json(manager.sync_report())
}

pub async fn rescan_handler(
    State(manager): State<Arc<WalletManager>>,
    body: Option<Json<RescanRequest>>,
) -> Result<Json<SyncProgressReport>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = manager.rescan_blockchain(req.begin_height)?;
    Ok(Json(session.progress()))
}

pub async fn indexed_transactions_handler(
    State(manager): State<Arc<WalletManager>>,
) -> Json<Vec<Transaction>> {
    Json(manager.indexed_transactions())
}
