//! Error types for wallet bridge operations
//!
//! Backend failures are wrapped with the stage that issued the call so the
//! caller can tell a failed sign apart from a failed publish. Nothing in this
//! crate retries on its own.

use std::fmt;

use thiserror::Error;

use crate::types::Amount;

/// Failure reported by a Wallet Backend implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

/// Status class of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    NotFound,
    InvalidArgument,
    Unavailable,
    Internal,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::InvalidArgument => "invalid argument",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Internal, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == BackendErrorKind::NotFound
    }
}

/// The operation that was talking to the backend when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connecting,
    FetchingAccounts,
    FetchingBalance,
    CreatingAccount,
    ValidatingAddress,
    GeneratingAddress,
    ListingUnspent,
    Constructing,
    Signing,
    Publishing,
    FetchingTransaction,
    FetchingTransactions,
    ReadingBestBlock,
    ReadingBlockInfo,
    Syncing,
    Rescanning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Connecting => "connecting to wallet backend",
            Self::FetchingAccounts => "fetching accounts",
            Self::FetchingBalance => "fetching balance",
            Self::CreatingAccount => "creating account",
            Self::ValidatingAddress => "validating address",
            Self::GeneratingAddress => "generating address",
            Self::ListingUnspent => "listing unspent outputs",
            Self::Constructing => "constructing transaction",
            Self::Signing => "signing transaction",
            Self::Publishing => "publishing transaction",
            Self::FetchingTransaction => "fetching transaction",
            Self::FetchingTransactions => "fetching transactions",
            Self::ReadingBestBlock => "reading best block",
            Self::ReadingBlockInfo => "reading block info",
            Self::Syncing => "syncing blockchain",
            Self::Rescanning => "rescanning blockchain",
        };
        f.write_str(text)
    }
}

/// Core error type for wallet bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("error {stage}: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: BackendError,
    },

    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds { available: Amount, required: Amount },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no unspent outputs matched the selection")]
    NoInputsSelected,

    #[error("{0} not found")]
    NotFound(String),

    #[error("stale wallet state: {0}")]
    StaleState(String),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("blockchain has not been synced previously")]
    NotSynced,

    #[error("a blockchain sync or rescan is already running")]
    SyncInProgress,

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Wrap a backend failure with the stage it happened in
    pub fn transport(stage: Stage, source: BackendError) -> Self {
        Self::Transport { stage, source }
    }

    /// `map_err` adapter: `.map_err(BridgeError::at(Stage::Signing))`
    pub fn at(stage: Stage) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::transport(stage, source)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedTransaction(msg.into())
    }

    /// Stage of a transport failure, if this is one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Transport { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
