//! dcrbridge: wallet client core for Decred-style wallets
//!
//! This crate sits between a user-facing frontend and a wallet engine. It
//! picks the outputs a payment spends, works out change, assembles and
//! publishes transactions, reconciles raw transaction records into a
//! history view, and turns the engine's sync event stream into a single
//! progress report.
//!
//! # Architecture
//!
//! - **Wallet Backend**: one async capability trait with a remote (HTTP/JSON)
//!   and an in-process implementation
//! - **UTXO Selector / Change Calculator / Transaction Assembler**: explicit
//!   output spending with change allocation
//! - **History Reconciler**: direction, amount, fee and paging
//! - **Sync Progress Aggregator**: hook pipeline around the sync stream
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dcrbridge::{BridgeConfig, MemoryBackend, Network, WalletManager};
//!
//! let backend = Arc::new(MemoryBackend::new(Network::Testnet));
//! let manager = WalletManager::new(backend, BridgeConfig::default());
//!
//! let session = manager.start_sync(Arc::new(|report: &dcrbridge::SyncProgressReport| {
//!     println!("{}%", report.total_progress);
//! }))?;
//! session.wait().await;
//!
//! let history = manager.transaction_history(-1, 20).await?;
//! ```

// Public modules
pub mod assembler;
pub mod backend;
pub mod change;
pub mod config;
pub mod error;
pub mod fees;
pub mod history;
pub mod manager;
pub mod sync;
pub mod types;
pub mod utxo;
pub mod wire;

// Re-exports for convenience
pub use assembler::TransactionAssembler;
pub use backend::{MemoryBackend, RemoteBackend, WalletBackend};
pub use change::{compute_change, ChangeOutcome};
pub use config::BridgeConfig;
pub use error::{BackendError, BackendErrorKind, BridgeError, Stage};
pub use fees::FeeEstimator;
pub use history::{HistoryPage, TransactionIndex};
pub use manager::WalletManager;
pub use sync::{SyncListener, SyncProgressReport, SyncSession, SyncStatus, SyncStep};
pub use types::{
    Account, AddressInfo, Amount, Balance, ConnectionInfo, Hash, Network, OutputKey, Transaction,
    TransactionDestination, TransactionDetails, TransactionDirection, TransactionType, Tree,
    UnspentOutput,
};
pub use utxo::KeySelection;

// Common result type
pub type Result<T> = std::result::Result<T, BridgeError>;
