use dcrbridge::{Amount, Hash, OutputKey, TransactionDestination};
use serde::{Deserialize, Serialize};

fn default_start_height() -> i32 {
    -1
}

fn default_min_return() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub passphrase: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountNumberResponse {
    pub name: String,
    pub number: u32,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationsQuery {
    pub required_confirmations: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UnspentQuery {
    #[serde(default)]
    pub target_amount: Amount,
    pub required_confirmations: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressResponse {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateAddressResponse {
    pub address: String,
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub source_account: u32,
    pub required_confirmations: Option<i32>,
    pub destinations: Vec<TransactionDestination>,
    pub passphrase: String,
}

#[derive(Debug, Deserialize)]
pub struct SendUtxosRequest {
    pub source_account: u32,
    pub required_confirmations: Option<i32>,
    pub utxo_keys: Vec<OutputKey>,
    pub destinations: Vec<TransactionDestination>,
    #[serde(default)]
    pub change_destinations: Vec<TransactionDestination>,
    pub passphrase: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub hash: Hash,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_start_height")]
    pub start_height: i32,
    #[serde(default = "default_min_return")]
    pub min_return: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BestBlockResponse {
    pub hash: Hash,
    pub height: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct RescanRequest {
    #[serde(default)]
    pub begin_height: i32,
}
