//! Sync progress state
//!
//! [`ProgressTracker`] folds sync lifecycle events into a
//! [`SyncProgressReport`]. It is plain data with no I/O so every rule can be
//! tested directly. [`SyncProgress`] is the shared handle: one writer task
//! updates it, any number of readers take snapshots.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::backend::SyncNotification;
use crate::types::Network;

/// Share of the overall percentage reached when header fetch completes
const HEADERS_WEIGHT: f64 = 40.0;
/// Overall percentage once address discovery completes
const DISCOVERY_END: f64 = 50.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    NotStarted,
    InProgress,
    Success,
    Error,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Error)
    }
}

/// Sub-step of a running sync. Steps only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    FetchingHeaders,
    DiscoveringAddresses,
    RescanningBlocks,
}

impl SyncStep {
    /// 1-based step number, as shown to users ("step 2 of 3")
    pub fn number(self) -> u8 {
        match self {
            SyncStep::FetchingHeaders => 1,
            SyncStep::DiscoveringAddresses => 2,
            SyncStep::RescanningBlocks => 3,
        }
    }

    fn of(event: &SyncNotification) -> Option<SyncStep> {
        use SyncNotification::*;
        match event {
            FetchedHeadersStarted | FetchedHeadersProgress { .. } | FetchedHeadersFinished => {
                Some(SyncStep::FetchingHeaders)
            }
            DiscoverAddressesStarted | DiscoverAddressesFinished => Some(SyncStep::DiscoveringAddresses),
            RescanStarted | RescanProgress { .. } | RescanFinished => Some(SyncStep::RescanningBlocks),
            _ => None,
        }
    }
}

pub const TOTAL_SYNC_STEPS: u8 = 3;

/// Snapshot of a sync session for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgressReport {
    pub status: SyncStatus,
    pub connected_peers: i32,
    pub current_step: Option<SyncStep>,
    pub headers_fetched: i32,
    pub total_headers_to_fetch: i32,
    /// Percentage of the header step alone
    pub headers_fetch_progress: i32,
    pub headers_fetch_time_taken: Option<i64>,
    pub days_behind: Option<i64>,
    pub rescanned_through: i32,
    /// Overall percentage, never decreases within a session
    pub total_progress: i32,
    pub estimated_time_remaining: Option<i64>,
    pub error: Option<String>,
    pub done: bool,
}

/// Event fold behind a [`SyncProgressReport`]
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    report: SyncProgressReport,
    network: Network,
    started_at: Option<i64>,
    headers_started_at: Option<i64>,
    rescan_target: Option<i32>,
    rescan_only: bool,
}

impl ProgressTracker {
    pub fn new(network: Network) -> Self {
        Self {
            report: SyncProgressReport::default(),
            network,
            started_at: None,
            headers_started_at: None,
            rescan_target: None,
            rescan_only: false,
        }
    }

    pub fn report(&self) -> &SyncProgressReport {
        &self.report
    }

    /// Reset for a new session. Peer count carries over.
    pub fn start(&mut self, now: i64, rescan_only: bool) {
        let peers = self.report.connected_peers;
        self.report = SyncProgressReport {
            status: SyncStatus::InProgress,
            connected_peers: peers,
            current_step: rescan_only.then_some(SyncStep::RescanningBlocks),
            ..SyncProgressReport::default()
        };
        self.started_at = Some(now);
        self.headers_started_at = None;
        self.rescan_target = None;
        self.rescan_only = rescan_only;
    }

    /// Rescan events need the best block height to turn into a percentage
    pub fn needs_rescan_target(&self, event: &SyncNotification) -> bool {
        self.rescan_target.is_none()
            && matches!(
                event,
                SyncNotification::RescanStarted | SyncNotification::RescanProgress { .. }
            )
    }

    pub fn set_rescan_target(&mut self, best_height: i32) {
        self.rescan_target = Some(best_height);
    }

    /// Fold one event in. Returns whether the report changed.
    pub fn apply(&mut self, event: &SyncNotification, now: i64) -> bool {
        match event {
            SyncNotification::PeerConnected { peer_count }
            | SyncNotification::PeerDisconnected { peer_count } => {
                self.report.connected_peers = *peer_count;
                return true;
            }
            SyncNotification::Synced => return false,
            SyncNotification::Unknown => {
                log::debug!("Ignoring unknown sync notification");
                return false;
            }
            _ => {}
        }

        if self.report.status.is_terminal() {
            return false;
        }
        if self.report.status == SyncStatus::NotStarted {
            self.start(now, false);
        }

        let Some(step) = SyncStep::of(event) else {
            return false;
        };
        if !self.enter_step(step) {
            log::debug!("Ignoring {:?} while at {:?}", event, self.report.current_step);
            return false;
        }

        let pct = match event {
            SyncNotification::FetchedHeadersStarted => {
                self.headers_started_at.get_or_insert(now);
                0.0
            }
            SyncNotification::FetchedHeadersProgress {
                fetched_headers_count,
                last_header_time,
            } => {
                self.headers_started_at.get_or_insert(now);
                self.report.headers_fetched += fetched_headers_count;
                let behind = (now - last_header_time).max(0);
                let remaining = (behind / self.network.target_block_spacing()) as i32;
                let fetched = self.report.headers_fetched.max(0);
                let total = fetched + remaining;
                self.report.total_headers_to_fetch = total;
                self.report.days_behind = Some(behind / 86_400);
                let frac = if total > 0 { fetched as f64 / total as f64 } else { 1.0 };
                self.report.headers_fetch_progress = (frac * 100.0) as i32;
                HEADERS_WEIGHT * frac
            }
            SyncNotification::FetchedHeadersFinished => {
                self.report.headers_fetch_progress = 100;
                self.report.days_behind = Some(0);
                self.report.headers_fetch_time_taken = self.headers_started_at.map(|t| now - t);
                HEADERS_WEIGHT
            }
            SyncNotification::DiscoverAddressesStarted => HEADERS_WEIGHT,
            SyncNotification::DiscoverAddressesFinished => DISCOVERY_END,
            SyncNotification::RescanStarted => self.rescan_pct(0.0),
            SyncNotification::RescanProgress { rescanned_through } => {
                self.report.rescanned_through = *rescanned_through;
                let frac = match self.rescan_target {
                    Some(target) if target > 0 => (*rescanned_through as f64 / target as f64).clamp(0.0, 1.0),
                    Some(_) => 1.0,
                    None => 0.0,
                };
                self.rescan_pct(frac)
            }
            SyncNotification::RescanFinished => self.rescan_pct(1.0),
            _ => return false,
        };

        self.raise_progress(pct as i32, now);
        true
    }

    /// Session finished cleanly
    pub fn succeed(&mut self, now: i64) {
        if self.report.status == SyncStatus::Error {
            return;
        }
        self.report.status = SyncStatus::Success;
        self.report.error = None;
        self.report.done = true;
        self.raise_progress(100, now);
        self.report.estimated_time_remaining = Some(0);
    }

    /// Session ended with an error. A finished session stays finished.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.report.status == SyncStatus::Success {
            return;
        }
        self.report.status = SyncStatus::Error;
        self.report.error = Some(message.into());
        self.report.done = true;
        self.report.estimated_time_remaining = None;
    }

    fn enter_step(&mut self, step: SyncStep) -> bool {
        match self.report.current_step {
            Some(current) if step < current => false,
            _ => {
                self.report.current_step = Some(step);
                true
            }
        }
    }

    fn rescan_pct(&self, frac: f64) -> f64 {
        if self.rescan_only {
            100.0 * frac
        } else {
            DISCOVERY_END + (100.0 - DISCOVERY_END) * frac
        }
    }

    fn raise_progress(&mut self, pct: i32, now: i64) {
        let pct = pct.clamp(0, 100);
        if pct > self.report.total_progress {
            self.report.total_progress = pct;
        }
        let total = self.report.total_progress;
        self.report.estimated_time_remaining = match self.started_at {
            Some(started) if total > 0 => {
                let elapsed = (now - started).max(0);
                Some(elapsed * (100 - total) as i64 / total as i64)
            }
            _ => None,
        };
    }
}

/// Shared, lock-protected progress of the current session
#[derive(Debug, Clone)]
pub struct SyncProgress {
    inner: Arc<RwLock<ProgressTracker>>,
}

impl SyncProgress {
    pub fn new(network: Network) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProgressTracker::new(network))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ProgressTracker> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProgressTracker> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current report
    pub fn snapshot(&self) -> SyncProgressReport {
        self.read().report().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.read().report().status
    }

    /// Run one update under the write lock and return the resulting report
    ///
    /// Keep `f` free of I/O; the lock is held for its whole duration.
    pub fn update<R>(&self, f: impl FnOnce(&mut ProgressTracker) -> R) -> (R, SyncProgressReport) {
        let mut tracker = self.write();
        let result = f(&mut tracker);
        (result, tracker.report().clone())
    }

    pub fn needs_rescan_target(&self, event: &SyncNotification) -> bool {
        self.read().needs_rescan_target(event)
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
