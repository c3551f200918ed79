//! UTXO selection
//!
//! Reads unspent outputs from the backend stream, either all of them or the
//! ones covering a target, and narrows them to an explicit key set for
//! manual input selection.

use std::collections::HashSet;

use futures::StreamExt;

use crate::backend::{UnspentRecord, UnspentRequest, WalletBackend};
use crate::error::{BridgeError, Stage};
use crate::types::{Amount, OutputKey, UnspentOutput};
use crate::Result;

/// Outputs found for a key selection, plus the requested keys the backend
/// no longer reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySelection {
    pub outputs: Vec<UnspentOutput>,
    pub missing: Vec<OutputKey>,
}

impl KeySelection {
    pub fn total(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

fn unspent_request(account: u32, target_amount: Amount, required_confirmations: i32) -> UnspentRequest {
    UnspentRequest {
        account,
        target_amount,
        required_confirmations,
        include_immature_coinbases: true,
    }
}

fn to_output(record: UnspentRecord, best_height: u32) -> UnspentOutput {
    // An output above the best block (backend tip lagging) counts as unconfirmed
    let confirmations = if record.block_height < 0 {
        0
    } else {
        (best_height as i32 - record.block_height + 1).max(0)
    };
    UnspentOutput {
        key: OutputKey::new(record.hash, record.index),
        amount: record.amount,
        receive_time: record.receive_time,
        confirmations,
        tree: record.tree,
        address: record.address,
    }
}

/// List unspent outputs of `account`
///
/// A zero `target_amount` returns every output with at least
/// `required_confirmations`. A positive target lets the backend pick a
/// covering set; the stream is still read to the end.
pub async fn list_unspent(
    backend: &dyn WalletBackend,
    account: u32,
    target_amount: Amount,
    required_confirmations: i32,
) -> Result<Vec<UnspentOutput>> {
    if target_amount < Amount::ZERO {
        return Err(BridgeError::invalid_input("target amount cannot be negative"));
    }
    let best = backend
        .best_block()
        .await
        .map_err(BridgeError::at(Stage::ReadingBestBlock))?;

    let mut stream = backend
        .unspent_outputs(unspent_request(account, target_amount, required_confirmations))
        .await
        .map_err(BridgeError::at(Stage::ListingUnspent))?;

    let mut outputs = Vec::new();
    while let Some(record) = stream.next().await {
        let record = record.map_err(BridgeError::at(Stage::ListingUnspent))?;
        outputs.push(to_output(record, best.height));
    }

    log::debug!(
        "Listed {} unspent outputs for account {} (target {})",
        outputs.len(),
        account,
        target_amount
    );
    Ok(outputs)
}

/// Resolve explicit output keys against the account's unspent set
///
/// Output order follows the backend stream, not `keys`. Reading stops as
/// soon as every requested key has been seen. Keys the backend does not
/// report end up in `missing` rather than failing the call.
pub async fn select_by_keys(
    backend: &dyn WalletBackend,
    account: u32,
    keys: &[OutputKey],
    required_confirmations: i32,
) -> Result<KeySelection> {
    if keys.is_empty() {
        return Err(BridgeError::invalid_input("no outputs selected"));
    }

    let wanted: HashSet<OutputKey> = keys.iter().copied().collect();
    let best = backend
        .best_block()
        .await
        .map_err(BridgeError::at(Stage::ReadingBestBlock))?;

    let mut stream = backend
        .unspent_outputs(unspent_request(account, Amount::ZERO, required_confirmations))
        .await
        .map_err(BridgeError::at(Stage::ListingUnspent))?;

    let mut found: HashSet<OutputKey> = HashSet::with_capacity(wanted.len());
    let mut outputs = Vec::with_capacity(wanted.len());
    while let Some(record) = stream.next().await {
        let record = record.map_err(BridgeError::at(Stage::ListingUnspent))?;
        let key = OutputKey::new(record.hash, record.index);
        if wanted.contains(&key) && found.insert(key) {
            outputs.push(to_output(record, best.height));
            if found.len() == wanted.len() {
                break;
            }
        }
    }

    let mut missing = Vec::new();
    for key in keys {
        if !found.contains(key) && !missing.contains(key) {
            missing.push(*key);
        }
    }
    if !missing.is_empty() {
        log::warn!(
            "⚠️  {} of {} selected outputs are no longer unspent: {}",
            missing.len(),
            wanted.len(),
            missing
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(KeySelection { outputs, missing })
}
