//! Blockchain sync and rescan sessions
//!
//! A sync session runs as one background task: pre-hooks, then the
//! backend's sync stream folded into [`SyncProgress`], then post-hooks once
//! the wallet reports it is synced. Every update is handed to a
//! [`SyncListener`] after the lock is released. The task always ends in
//! `Success` or `Error`; a stream that stops early, a failing hook or a
//! cancelled token all land in `Error`.

pub mod progress;

use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{SyncNotification, WalletBackend};
use crate::error::{BridgeError, Stage};
use crate::history::TransactionIndex;
use crate::Result;

pub use progress::{
    now, ProgressTracker, SyncProgress, SyncProgressReport, SyncStatus, SyncStep, TOTAL_SYNC_STEPS,
};

pub const CANCELLED_MESSAGE: &str = "sync cancelled";

/// Receives a report after every change
pub trait SyncListener: Send + Sync {
    fn on_progress(&self, report: &SyncProgressReport);
}

impl<F> SyncListener for F
where
    F: Fn(&SyncProgressReport) + Send + Sync,
{
    fn on_progress(&self, report: &SyncProgressReport) {
        self(report)
    }
}

/// Listener that only logs
pub struct LogListener;

impl SyncListener for LogListener {
    fn on_progress(&self, report: &SyncProgressReport) {
        match report.status {
            SyncStatus::Success => log::info!("✅ Sync finished"),
            SyncStatus::Error => log::error!(
                "❌ Sync failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            ),
            _ => log::debug!(
                "Sync {}% (step {}/{}, {} peers)",
                report.total_progress,
                report.current_step.map(|s| s.number()).unwrap_or(0),
                TOTAL_SYNC_STEPS,
                report.connected_peers
            ),
        }
    }
}

/// Work run before the sync stream opens or after the wallet is synced
#[async_trait]
pub trait SyncHook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, backend: &dyn WalletBackend) -> Result<()>;
}

/// Rebuilds the transaction index once the wallet is synced
#[derive(Clone, Default)]
pub struct TransactionIndexHook {
    index: Arc<RwLock<TransactionIndex>>,
}

impl TransactionIndexHook {
    pub fn new(index: Arc<RwLock<TransactionIndex>>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> Arc<RwLock<TransactionIndex>> {
        self.index.clone()
    }
}

#[async_trait]
impl SyncHook for TransactionIndexHook {
    fn name(&self) -> &str {
        "transaction index"
    }

    async fn run(&self, backend: &dyn WalletBackend) -> Result<()> {
        let rebuilt = TransactionIndex::build(backend).await?;
        log::info!("📚 Indexed {} transactions", rebuilt.len());
        let mut index = self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *index = rebuilt;
        Ok(())
    }
}

/// Handle on a running sync or rescan task
pub struct SyncSession {
    progress: SyncProgress,
    cancel: CancellationToken,
    handle: JoinHandle<SyncStatus>,
}

impl SyncSession {
    pub fn progress(&self) -> SyncProgressReport {
        self.progress.snapshot()
    }

    /// Stop processing events. The task records `Error("sync cancelled")`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task and return its final status
    pub async fn wait(self) -> SyncStatus {
        match self.handle.await {
            Ok(status) => status,
            Err(e) => {
                log::error!("Sync task ended abnormally: {}", e);
                SyncStatus::Error
            }
        }
    }
}

enum Interrupted {
    Cancelled,
}

async fn unless_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> std::result::Result<F::Output, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        out = fut => Ok(out),
    }
}

/// Ordered sync stages: pre-hooks, sync stream, post-hooks
pub struct SyncPipeline {
    backend: Arc<dyn WalletBackend>,
    progress: SyncProgress,
    listener: Arc<dyn SyncListener>,
    pre_hooks: Vec<Arc<dyn SyncHook>>,
    post_hooks: Vec<Arc<dyn SyncHook>>,
}

impl SyncPipeline {
    pub fn new(backend: Arc<dyn WalletBackend>, progress: SyncProgress, listener: Arc<dyn SyncListener>) -> Self {
        Self {
            backend,
            progress,
            listener,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    pub fn with_pre_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.pre_hooks.push(hook);
        self
    }

    pub fn with_post_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.post_hooks.push(hook);
        self
    }

    /// Start the session in the background
    ///
    /// The report is `InProgress` by the time this returns.
    pub fn spawn(self, cancel: CancellationToken) -> SyncSession {
        let (_, report) = self.progress.update(|t| t.start(now(), false));
        self.listener.on_progress(&report);
        log::info!("🔄 Starting blockchain sync");

        let progress = self.progress.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { self.run(task_cancel).await });
        SyncSession {
            progress,
            cancel,
            handle,
        }
    }

    async fn run(self, cancel: CancellationToken) -> SyncStatus {
        match self.drive(&cancel).await {
            Ok(()) => {
                let (_, report) = self.progress.update(|t| t.succeed(now()));
                self.listener.on_progress(&report);
                report.status
            }
            Err(message) => self.fail(message),
        }
    }

    fn fail(&self, message: String) -> SyncStatus {
        log::error!("❌ Blockchain sync failed: {}", message);
        let (_, report) = self.progress.update(|t| t.fail(message));
        self.listener.on_progress(&report);
        report.status
    }

    async fn run_hooks(&self, hooks: &[Arc<dyn SyncHook>], cancel: &CancellationToken) -> std::result::Result<(), String> {
        for hook in hooks {
            log::debug!("Running sync hook: {}", hook.name());
            match unless_cancelled(cancel, hook.run(self.backend.as_ref())).await {
                Err(Interrupted::Cancelled) => return Err(CANCELLED_MESSAGE.to_string()),
                Ok(Err(e)) => return Err(format!("{} failed: {}", hook.name(), e)),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }

    async fn drive(&self, cancel: &CancellationToken) -> std::result::Result<(), String> {
        self.run_hooks(&self.pre_hooks, cancel).await?;

        let mut stream = match unless_cancelled(cancel, self.backend.spv_sync()).await {
            Err(Interrupted::Cancelled) => return Err(CANCELLED_MESSAGE.to_string()),
            Ok(Err(e)) => return Err(BridgeError::transport(Stage::Syncing, e).to_string()),
            Ok(Ok(stream)) => stream,
        };

        loop {
            let next = match unless_cancelled(cancel, stream.next()).await {
                Err(Interrupted::Cancelled) => return Err(CANCELLED_MESSAGE.to_string()),
                Ok(next) => next,
            };
            let event = match next {
                None => return Err("sync stream closed before the wallet was synced".to_string()),
                Some(Err(e)) => return Err(BridgeError::transport(Stage::Syncing, e).to_string()),
                Some(Ok(SyncNotification::Synced)) => break,
                Some(Ok(event)) => event,
            };

            if self.progress.needs_rescan_target(&event) {
                match unless_cancelled(cancel, self.backend.best_block()).await {
                    Err(Interrupted::Cancelled) => return Err(CANCELLED_MESSAGE.to_string()),
                    Ok(Ok(best)) => {
                        self.progress.update(|t| t.set_rescan_target(best.height as i32));
                    }
                    Ok(Err(e)) => log::warn!("⚠️  Could not read best block for rescan progress: {}", e),
                }
            }

            let (changed, report) = self.progress.update(|t| t.apply(&event, now()));
            if changed {
                self.listener.on_progress(&report);
            }
        }

        log::info!("Wallet synced, running post-sync hooks");
        drop(stream);
        self.run_hooks(&self.post_hooks, cancel).await
    }
}

/// Rescan the chain from `begin_height` as a background task, reporting
/// through the same progress handle and listener as the last sync
pub fn spawn_rescan(
    backend: Arc<dyn WalletBackend>,
    progress: SyncProgress,
    listener: Arc<dyn SyncListener>,
    begin_height: i32,
    cancel: CancellationToken,
) -> SyncSession {
    let (_, report) = progress.update(|t| t.start(now(), true));
    listener.on_progress(&report);
    log::info!("🔍 Rescanning blockchain from height {}", begin_height);

    let task_progress = progress.clone();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let outcome = drive_rescan(backend.as_ref(), &task_progress, listener.as_ref(), begin_height, &task_cancel).await;
        let (_, report) = match outcome {
            Ok(()) => task_progress.update(|t| t.succeed(now())),
            Err(message) => {
                log::error!("❌ Rescan failed: {}", message);
                task_progress.update(|t| t.fail(message))
            }
        };
        listener.on_progress(&report);
        report.status
    });

    SyncSession {
        progress,
        cancel,
        handle,
    }
}

async fn drive_rescan(
    backend: &dyn WalletBackend,
    progress: &SyncProgress,
    listener: &dyn SyncListener,
    begin_height: i32,
    cancel: &CancellationToken,
) -> std::result::Result<(), String> {
    let mut stream = match unless_cancelled(cancel, backend.rescan(begin_height)).await {
        Err(Interrupted::Cancelled) => return Err(CANCELLED_MESSAGE.to_string()),
        Ok(Err(e)) => return Err(BridgeError::transport(Stage::Rescanning, e).to_string()),
        Ok(Ok(stream)) => stream,
    };

    let target = match unless_cancelled(cancel, backend.best_block()).await {
        Err(Interrupted::Cancelled) => return Err(CANCELLED_MESSAGE.to_string()),
        Ok(Ok(best)) => Some(best.height as i32),
        Ok(Err(e)) => {
            log::warn!("⚠️  Could not read best block for rescan progress: {}", e);
            None
        }
    };

    let (_, report) = progress.update(|t| {
        if let Some(target) = target {
            t.set_rescan_target(target);
        }
        t.apply(&SyncNotification::RescanStarted, now())
    });
    listener.on_progress(&report);

    loop {
        let next = match unless_cancelled(cancel, stream.next()).await {
            Err(Interrupted::Cancelled) => return Err(CANCELLED_MESSAGE.to_string()),
            Ok(next) => next,
        };
        match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(BridgeError::transport(Stage::Rescanning, e).to_string()),
            Some(Ok(update)) => {
                let event = SyncNotification::RescanProgress {
                    rescanned_through: update.rescanned_through,
                };
                let (changed, report) = progress.update(|t| t.apply(&event, now()));
                if changed {
                    listener.on_progress(&report);
                }
                if matches!(target, Some(t) if update.rescanned_through >= t) {
                    return Ok(());
                }
            }
        }
    }
}
