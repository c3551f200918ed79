//! WalletManager: one handle over a wallet backend
//!
//! Owns the backend, the configuration, the sync progress shared by sync and
//! rescan sessions, and the transaction index rebuilt after each sync.

use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use crate::assembler::TransactionAssembler;
use crate::backend::{BlockStamp, RemoteBackend, WalletBackend};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Stage};
use crate::fees::FeeEstimator;
use crate::history::{self, HistoryPage, TransactionIndex};
use crate::sync::{
    spawn_rescan, SyncListener, SyncPipeline, SyncProgress, SyncProgressReport, SyncSession, SyncStatus,
    TransactionIndexHook,
};
use crate::types::{
    Account, AddressInfo, Amount, Balance, ConnectionInfo, Hash, Network, OutputKey, Transaction,
    TransactionDestination, TransactionDetails, UnspentOutput,
};
use crate::utxo::{self, KeySelection};
use crate::Result;

const IMPORTED_ACCOUNT_NAME: &str = "imported";

#[derive(Default)]
struct SyncState {
    listener: Option<Arc<dyn SyncListener>>,
    cancel: Option<CancellationToken>,
}

pub struct WalletManager {
    backend: Arc<dyn WalletBackend>,
    config: BridgeConfig,
    fees: FeeEstimator,
    progress: SyncProgress,
    sync: Mutex<SyncState>,
    index: Arc<RwLock<TransactionIndex>>,
}

impl WalletManager {
    pub fn new(backend: Arc<dyn WalletBackend>, config: BridgeConfig) -> Self {
        let fees = FeeEstimator::new(config.relay_fee_per_kb);
        let progress = SyncProgress::new(config.network);
        Self {
            backend,
            config,
            fees,
            progress,
            sync: Mutex::new(SyncState::default()),
            index: Arc::new(RwLock::new(TransactionIndex::default())),
        }
    }

    /// Connect to the remote wallet service named in `config`
    pub async fn connect(config: BridgeConfig, cancel: &CancellationToken) -> Result<Self> {
        let backend = RemoteBackend::connect(&config, cancel).await?;
        log::info!("📡 Connected to wallet backend at {}", backend.base_url());
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn WalletBackend {
        self.backend.as_ref()
    }

    // ========================================================================
    // Accounts and addresses
    // ========================================================================

    /// Every account with its balance, except an empty "imported" account
    pub async fn accounts_overview(&self, required_confirmations: i32) -> Result<Vec<Account>> {
        let records = self
            .backend
            .accounts()
            .await
            .map_err(BridgeError::at(Stage::FetchingAccounts))?;

        let mut accounts = Vec::with_capacity(records.len());
        for record in records {
            let balance = self.account_balance(record.number, required_confirmations).await?;
            if record.name == IMPORTED_ACCOUNT_NAME && balance.total == Amount::ZERO {
                continue;
            }
            accounts.push(Account {
                number: record.number,
                name: record.name,
                balance,
            });
        }
        Ok(accounts)
    }

    pub async fn account_balance(&self, account: u32, required_confirmations: i32) -> Result<Balance> {
        let balance = self
            .backend
            .account_balance(account, required_confirmations)
            .await
            .map_err(BridgeError::at(Stage::FetchingBalance))?;
        if !balance.is_consistent() {
            log::warn!(
                "⚠️  Account {} reports spendable {} above total {}",
                account,
                balance.spendable,
                balance.total
            );
        }
        Ok(balance)
    }

    pub async fn account_number(&self, name: &str) -> Result<u32> {
        self.backend.account_number(name).await.map_err(|e| {
            if e.is_not_found() {
                BridgeError::NotFound(format!("account '{}'", name))
            } else {
                BridgeError::transport(Stage::FetchingAccounts, e)
            }
        })
    }

    pub async fn account_name(&self, number: u32) -> Result<String> {
        self.backend
            .accounts()
            .await
            .map_err(BridgeError::at(Stage::FetchingAccounts))?
            .into_iter()
            .find(|a| a.number == number)
            .map(|a| a.name)
            .ok_or_else(|| BridgeError::NotFound(format!("account {}", number)))
    }

    pub async fn next_account(&self, name: &str, passphrase: &str) -> Result<u32> {
        if name.trim().is_empty() {
            return Err(BridgeError::invalid_input("account name cannot be empty"));
        }
        let number = self
            .backend
            .next_account(name, passphrase)
            .await
            .map_err(BridgeError::at(Stage::CreatingAccount))?;
        log::info!("Created account {} ({})", name, number);
        Ok(number)
    }

    /// Ownership details for an address
    ///
    /// The owning account's name is best effort: a failed lookup leaves it
    /// empty rather than failing the call.
    pub async fn address_info(&self, address: &str) -> Result<AddressInfo> {
        let validation = self
            .backend
            .validate_address(address)
            .await
            .map_err(BridgeError::at(Stage::ValidatingAddress))?;
        if !validation.valid {
            return Err(BridgeError::invalid_input(format!("invalid address {}", address)));
        }

        let account_number = validation.account.filter(|_| validation.is_mine);
        let account_name = match account_number {
            Some(number) => self.account_name(number).await.ok(),
            None => None,
        };
        Ok(AddressInfo {
            address: address.to_string(),
            is_mine: validation.is_mine,
            account_number,
            account_name,
        })
    }

    pub async fn validate_address(&self, address: &str) -> Result<bool> {
        let validation = self
            .backend
            .validate_address(address)
            .await
            .map_err(BridgeError::at(Stage::ValidatingAddress))?;
        Ok(validation.valid)
    }

    pub async fn generate_receive_address(&self, account: u32) -> Result<String> {
        self.backend
            .next_address(account)
            .await
            .map_err(BridgeError::at(Stage::GeneratingAddress))
    }

    // ========================================================================
    // Outputs and sending
    // ========================================================================

    pub async fn list_unspent(
        &self,
        account: u32,
        target_amount: Amount,
        required_confirmations: i32,
    ) -> Result<Vec<UnspentOutput>> {
        utxo::list_unspent(self.backend.as_ref(), account, target_amount, required_confirmations).await
    }

    pub async fn select_by_keys(
        &self,
        account: u32,
        keys: &[OutputKey],
        required_confirmations: i32,
    ) -> Result<KeySelection> {
        utxo::select_by_keys(self.backend.as_ref(), account, keys, required_confirmations).await
    }

    pub async fn send_from_account(
        &self,
        source_account: u32,
        required_confirmations: i32,
        destinations: &[TransactionDestination],
        passphrase: &str,
    ) -> Result<Hash> {
        self.assembler()
            .send_from_account(source_account, required_confirmations, destinations, passphrase)
            .await
    }

    pub async fn send_from_utxos(
        &self,
        source_account: u32,
        required_confirmations: i32,
        utxo_keys: &[OutputKey],
        destinations: &[TransactionDestination],
        change_destinations: &[TransactionDestination],
        passphrase: &str,
    ) -> Result<Hash> {
        self.assembler()
            .send_from_utxos(
                source_account,
                required_confirmations,
                utxo_keys,
                destinations,
                change_destinations,
                passphrase,
            )
            .await
    }

    fn assembler(&self) -> TransactionAssembler<'_> {
        TransactionAssembler::new(self.backend.as_ref(), self.fees)
    }

    // ========================================================================
    // History and chain state
    // ========================================================================

    pub async fn transaction_history(&self, start_height: i32, min_return: usize) -> Result<HistoryPage> {
        history::transaction_history(self.backend.as_ref(), start_height, min_return).await
    }

    pub async fn get_transaction(&self, hash: &str) -> Result<TransactionDetails> {
        history::get_transaction(self.backend.as_ref(), hash).await
    }

    pub async fn best_block(&self) -> Result<BlockStamp> {
        self.backend
            .best_block()
            .await
            .map_err(BridgeError::at(Stage::ReadingBestBlock))
    }

    pub async fn connection_info(&self) -> Result<ConnectionInfo> {
        let accounts = self.accounts_overview(self.config.required_confirmations).await?;
        let total_balance = accounts.iter().map(|a| a.balance.total).sum();

        let best = self.best_block().await?;
        let best_block_timestamp = match self.backend.block_info(best.hash).await {
            Ok(info) => info.timestamp,
            Err(e) => {
                log::warn!("⚠️  Could not read best block time: {}", e);
                0
            }
        };

        Ok(ConnectionInfo {
            network: self.config.network,
            total_balance,
            best_block: best.height,
            best_block_timestamp,
            peer_count: self.progress.snapshot().connected_peers,
        })
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Start a sync session reporting to `listener`
    ///
    /// After the wallet is synced the transaction index is rebuilt before
    /// the session reports `Success`.
    pub fn start_sync(&self, listener: Arc<dyn SyncListener>) -> Result<SyncSession> {
        let mut state = self.sync.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.progress.status() == SyncStatus::InProgress {
            return Err(BridgeError::SyncInProgress);
        }

        let cancel = CancellationToken::new();
        let session = SyncPipeline::new(self.backend.clone(), self.progress.clone(), listener.clone())
            .with_post_hook(Arc::new(TransactionIndexHook::new(self.index.clone())))
            .spawn(cancel.clone());

        state.listener = Some(listener);
        state.cancel = Some(cancel);
        Ok(session)
    }

    /// Rescan from `begin_height`, reporting to the last sync listener
    pub fn rescan_blockchain(&self, begin_height: i32) -> Result<SyncSession> {
        let mut state = self.sync.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let listener = state.listener.clone().ok_or(BridgeError::NotSynced)?;
        if self.progress.status() == SyncStatus::InProgress {
            return Err(BridgeError::SyncInProgress);
        }
        if begin_height < 0 {
            return Err(BridgeError::invalid_input("rescan height cannot be negative"));
        }

        let cancel = CancellationToken::new();
        let session = spawn_rescan(
            self.backend.clone(),
            self.progress.clone(),
            listener,
            begin_height,
            cancel.clone(),
        );
        state.cancel = Some(cancel);
        Ok(session)
    }

    /// Cancel the running sync or rescan, if any
    pub fn cancel_sync(&self) {
        let state = self.sync.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
    }

    pub fn sync_report(&self) -> SyncProgressReport {
        self.progress.snapshot()
    }

    /// Transactions indexed by the last successful sync, newest first
    pub fn indexed_transactions(&self) -> Vec<Transaction> {
        let index = self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        index.transactions().to_vec()
    }
}
