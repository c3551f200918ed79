//! Common test utilities for dcrbridge integration tests
//!
//! Provides:
//! - Logging setup
//! - A funded in-memory wallet wired to a `WalletManager`
//! - Addresses the wallet does not own
//! - A listener that records every progress report

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use dcrbridge::backend::memory::DEFAULT_ACCOUNT;
use dcrbridge::sync::SyncListener;
use dcrbridge::{Amount, BridgeConfig, MemoryBackend, Network, OutputKey, SyncProgressReport, WalletManager};

pub const PASSPHRASE: &str = "correct horse battery staple";
pub const BEST_HEIGHT: u32 = 1_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Testnet address outside the wallet
pub fn external_address(seed: char) -> String {
    format!("Ts{}", seed.to_string().repeat(33))
}

/// In-memory wallet and the manager driving it
pub struct TestWallet {
    pub backend: Arc<MemoryBackend>,
    pub manager: WalletManager,
}

impl TestWallet {
    pub fn new() -> Self {
        init_logging();
        let backend = Arc::new(MemoryBackend::new(Network::Testnet));
        backend.set_passphrase(PASSPHRASE);
        backend.set_best_height(BEST_HEIGHT);

        let manager = WalletManager::new(backend.clone(), BridgeConfig::default());
        Self { backend, manager }
    }

    /// Fund the default account with one output mined at `height`
    pub fn fund(&self, atoms: i64, height: i32) -> OutputKey {
        self.backend.fund(DEFAULT_ACCOUNT, Amount(atoms), height)
    }
}

/// Listener that keeps a copy of every report it sees
#[derive(Clone, Default)]
pub struct RecordingListener {
    reports: Arc<Mutex<Vec<SyncProgressReport>>>,
}

impl RecordingListener {
    pub fn reports(&self) -> Vec<SyncProgressReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn as_listener(&self) -> Arc<dyn SyncListener> {
        Arc::new(self.clone())
    }
}

impl SyncListener for RecordingListener {
    fn on_progress(&self, report: &SyncProgressReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}
