//! Wallet Backend capability interface
//!
//! Everything the bridge needs from the wallet engine goes through
//! [`WalletBackend`]. Two implementations exist: [`RemoteBackend`] talks
//! JSON over HTTP to a running wallet service, [`MemoryBackend`] keeps the
//! whole wallet in process (embedded mode and tests).

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::types::{Amount, Balance, Hash, Tree, TransactionType};

pub use memory::MemoryBackend;
pub use remote::RemoteBackend;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Server-side stream of backend records
pub type BackendStream<T> = BoxStream<'static, BackendResult<T>>;

// ============================================================================
// Request / response records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub number: u32,
    pub name: String,
    pub balance: Balance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressValidation {
    pub valid: bool,
    pub is_mine: bool,
    pub account: Option<u32>,
    #[serde(with = "hex_bytes")]
    pub script: Vec<u8>,
    pub script_version: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentRequest {
    pub account: u32,
    pub target_amount: Amount,
    pub required_confirmations: i32,
    pub include_immature_coinbases: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentRecord {
    pub hash: Hash,
    pub index: u32,
    pub amount: Amount,
    pub address: String,
    pub receive_time: i64,
    /// -1 while unmined
    pub block_height: i32,
    pub tree: Tree,
    #[serde(default)]
    pub from_coinbase: bool,
}

/// How the backend should pick inputs for a constructed transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSelection {
    #[default]
    Unspecified,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRequest {
    pub address: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructRequest {
    pub source_account: u32,
    pub required_confirmations: i32,
    pub outputs: Vec<OutputRequest>,
    pub selection: OutputSelection,
    /// Change goes here instead of a fresh internal address
    pub change_destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRecord {
    pub index: u32,
    pub account: u32,
    pub internal: bool,
    pub amount: Amount,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitRecord {
    pub index: u32,
    pub previous_account: u32,
    pub previous_amount: Amount,
}

/// Raw per-transaction wallet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: Hash,
    #[serde(with = "hex_bytes")]
    pub transaction: Vec<u8>,
    pub credits: Vec<CreditRecord>,
    pub debits: Vec<DebitRecord>,
    /// Provisional fee as reported by the backend
    pub fee: Amount,
    pub timestamp: i64,
    pub tx_type: TransactionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLookup {
    pub record: TransactionRecord,
    /// Zero hash while unmined
    pub block_hash: Option<Hash>,
    pub confirmations: i32,
}

/// One batch of a `get_transactions` stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBatch {
    #[serde(default)]
    pub mined: Vec<TransactionRecord>,
    #[serde(default)]
    pub unmined: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    pub hash: Hash,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: Hash,
    pub height: i32,
    pub timestamp: i64,
    pub confirmations: i32,
}

/// Lifecycle event emitted by the backend's SPV sync stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncNotification {
    FetchedHeadersStarted,
    FetchedHeadersProgress {
        fetched_headers_count: i32,
        last_header_time: i64,
    },
    FetchedHeadersFinished,
    DiscoverAddressesStarted,
    DiscoverAddressesFinished,
    RescanStarted,
    RescanProgress {
        rescanned_through: i32,
    },
    RescanFinished,
    PeerConnected {
        peer_count: i32,
    },
    PeerDisconnected {
        peer_count: i32,
    },
    Synced,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescanUpdate {
    pub rescanned_through: i32,
}

// ============================================================================
// Capability trait
// ============================================================================

#[async_trait]
pub trait WalletBackend: Send + Sync {
    async fn accounts(&self) -> BackendResult<Vec<AccountRecord>>;

    async fn account_balance(&self, account: u32, required_confirmations: i32) -> BackendResult<Balance>;

    async fn account_number(&self, name: &str) -> BackendResult<u32>;

    async fn next_account(&self, name: &str, passphrase: &str) -> BackendResult<u32>;

    async fn validate_address(&self, address: &str) -> BackendResult<AddressValidation>;

    async fn next_address(&self, account: u32) -> BackendResult<String>;

    async fn unspent_outputs(&self, request: UnspentRequest) -> BackendResult<BackendStream<UnspentRecord>>;

    /// Returns the unsigned serialized transaction
    async fn construct_transaction(&self, request: ConstructRequest) -> BackendResult<Vec<u8>>;

    async fn sign_transaction(&self, unsigned: Vec<u8>, passphrase: &str) -> BackendResult<Vec<u8>>;

    async fn publish_transaction(&self, signed: Vec<u8>) -> BackendResult<Hash>;

    async fn get_transaction(&self, hash: Hash) -> BackendResult<TransactionLookup>;

    /// Transactions mined in `[start_height, end_height]`, walking down when
    /// `start_height > end_height`. A start of -1 yields unmined transactions
    /// first, then mined ones from the tip down to `end_height`.
    async fn get_transactions(
        &self,
        start_height: i32,
        end_height: i32,
    ) -> BackendResult<BackendStream<TransactionBatch>>;

    async fn best_block(&self) -> BackendResult<BlockStamp>;

    async fn block_info(&self, hash: Hash) -> BackendResult<BlockInfo>;

    async fn spv_sync(&self) -> BackendResult<BackendStream<SyncNotification>>;

    async fn rescan(&self, begin_height: i32) -> BackendResult<BackendStream<RescanUpdate>>;
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
