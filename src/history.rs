//! Transaction history reconciliation
//!
//! Turns raw backend records into [`Transaction`]s with a derived direction
//! and amount, pages backwards through block ranges to fill a history view,
//! and keeps an index of everything reconciled after a sync.

use std::collections::HashMap;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::backend::{TransactionRecord, WalletBackend};
use crate::error::{BridgeError, Stage};
use crate::types::{
    format_timestamp, Amount, Hash, OutputKey, Transaction, TransactionDetails, TransactionDirection,
    TransactionType, TxInputDetail, TxOutputDetail,
};
use crate::wire::{fee_size_rate, WireTx};
use crate::Result;

/// Direction and amount of a transaction as seen by the wallet
///
/// Only regular transactions are classified. A wallet-internal transfer nets
/// to exactly minus the fee, an outgoing payment to less than that, and an
/// incoming one to a positive difference. Stake transactions report the sum
/// of their credits.
pub fn amount_and_direction(
    tx_type: TransactionType,
    credits: Amount,
    debits: Amount,
    fee: Amount,
) -> (Amount, TransactionDirection) {
    if tx_type != TransactionType::Regular {
        return (credits, TransactionDirection::Unclassified);
    }

    let diff = credits - debits;
    if diff < Amount::ZERO && diff.abs() == fee {
        (fee, TransactionDirection::Transferred)
    } else if diff > Amount::ZERO {
        (credits, TransactionDirection::Received)
    } else {
        (debits - credits - fee, TransactionDirection::Sent)
    }
}

/// Normalize one backend record
///
/// Fee, size and rate come from decoding the raw bytes; the backend's own
/// fee is used only when no bytes were sent.
pub fn reconcile(record: &TransactionRecord) -> Result<Transaction> {
    let (fee, size, fee_rate) = if record.transaction.is_empty() {
        (record.fee, 0, Amount::ZERO)
    } else {
        let decoded = fee_size_rate(&record.transaction).map_err(|e| match e {
            BridgeError::MalformedTransaction(msg) => {
                BridgeError::MalformedTransaction(format!("{}: {}", record.hash, msg))
            }
            other => other,
        })?;
        (decoded.fee, decoded.size, decoded.fee_rate)
    };

    let credits: Amount = record.credits.iter().map(|c| c.amount).sum();
    let debits: Amount = record.debits.iter().map(|d| d.previous_amount).sum();
    let (amount, direction) = amount_and_direction(record.tx_type, credits, debits, fee);

    Ok(Transaction {
        hash: record.hash,
        amount,
        fee,
        fee_rate,
        size,
        tx_type: record.tx_type,
        direction,
        timestamp: record.timestamp,
        formatted_time: format_timestamp(record.timestamp),
    })
}

/// Reconciled transactions plus the lowest block height that was read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub transactions: Vec<Transaction>,
    pub end_block_height: i32,
}

/// Fetch and reconcile one block range. One bad record fails the range.
async fn fetch_range(backend: &dyn WalletBackend, start_height: i32, end_height: i32) -> Result<Vec<Transaction>> {
    let mut stream = backend
        .get_transactions(start_height, end_height)
        .await
        .map_err(BridgeError::at(Stage::FetchingTransactions))?;

    let mut transactions = Vec::new();
    while let Some(batch) = stream.next().await {
        let batch = batch.map_err(BridgeError::at(Stage::FetchingTransactions))?;
        for record in batch.mined.iter().chain(batch.unmined.iter()) {
            transactions.push(reconcile(record)?);
        }
    }
    Ok(transactions)
}

/// Read history backwards from `start_height` until at least `min_return`
/// transactions are collected or block 0 has been read
///
/// A negative `start_height` begins with unmined transactions and the best
/// block. The result is sorted newest first; ties keep fetch order.
pub async fn transaction_history(
    backend: &dyn WalletBackend,
    start_height: i32,
    min_return: usize,
) -> Result<HistoryPage> {
    let (mut start, mut end) = if start_height < 0 {
        let best = backend
            .best_block()
            .await
            .map_err(BridgeError::at(Stage::ReadingBestBlock))?;
        (-1, best.height as i32)
    } else if start_height == 0 {
        (0, 0)
    } else {
        (start_height, start_height - 1)
    };

    let mut transactions = Vec::new();
    loop {
        log::debug!("Fetching transactions in blocks {}..{}", start, end);
        transactions.extend(fetch_range(backend, start, end).await?);

        if transactions.len() >= min_return {
            break;
        }
        if end > 1 {
            start = end - 1;
            end = start - 1;
        } else if end == 1 {
            start = 0;
            end = 0;
        } else {
            break;
        }
    }

    transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(HistoryPage {
        transactions,
        end_block_height: end,
    })
}

/// Look up a single transaction by its hash string
pub async fn get_transaction(backend: &dyn WalletBackend, hash: &str) -> Result<TransactionDetails> {
    let hash: Hash = hash.parse()?;
    let lookup = backend.get_transaction(hash).await.map_err(|e| {
        if e.is_not_found() {
            BridgeError::NotFound("transaction".to_string())
        } else {
            BridgeError::transport(Stage::FetchingTransaction, e)
        }
    })?;

    let transaction = reconcile(&lookup.record)?;

    let block_height = match lookup.block_hash {
        Some(block_hash) if block_hash != Hash::default() => {
            backend
                .block_info(block_hash)
                .await
                .map_err(BridgeError::at(Stage::ReadingBlockInfo))?
                .height
        }
        _ => -1,
    };

    let (inputs, outputs) = if lookup.record.transaction.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let tx = WireTx::deserialize(&lookup.record.transaction)?;
        let inputs = tx
            .inputs
            .iter()
            .map(|i| TxInputDetail {
                previous_output: OutputKey::from(&i.previous_outpoint),
                amount: i.value_in,
            })
            .collect();
        let outputs = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, o)| TxOutputDetail {
                index: index as u32,
                amount: o.value,
                script_version: o.script_version,
                script: hex::encode(&o.pk_script),
            })
            .collect();
        (inputs, outputs)
    };

    Ok(TransactionDetails {
        transaction,
        block_height,
        confirmations: lookup.confirmations,
        inputs,
        outputs,
    })
}

/// Every reconciled wallet transaction, keyed by hash
#[derive(Debug, Clone, Default)]
pub struct TransactionIndex {
    ordered: Vec<Transaction>,
    by_hash: HashMap<Hash, usize>,
}

impl TransactionIndex {
    /// Reconcile the wallet's whole history in one pass
    pub async fn build(backend: &dyn WalletBackend) -> Result<Self> {
        let mut transactions = fetch_range(backend, -1, 0).await?;
        transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(Self::from_transactions(transactions))
    }

    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        let mut index = Self::default();
        for tx in transactions {
            if index.by_hash.contains_key(&tx.hash) {
                continue;
            }
            index.by_hash.insert(tx.hash, index.ordered.len());
            index.ordered.push(tx);
        }
        index
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.by_hash.get(hash).map(|i| &self.ordered[*i])
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Newest first
    pub fn transactions(&self) -> &[Transaction] {
        &self.ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_transfer() {
        let (amount, direction) =
            amount_and_direction(TransactionType::Regular, Amount(500_000), Amount(500_500), Amount(500));
        assert_eq!(direction, TransactionDirection::Transferred);
        assert_eq!(amount, Amount(500));
    }

    #[test]
    fn test_received() {
        let (amount, direction) =
            amount_and_direction(TransactionType::Regular, Amount(1_000_000), Amount::ZERO, Amount(300));
        assert_eq!(direction, TransactionDirection::Received);
        assert_eq!(amount, Amount(1_000_000));
    }

    #[test]
    fn test_sent() {
        // 1_000_000 in, 300_000 change back, 500 fee: 699_500 left the wallet
        let (amount, direction) =
            amount_and_direction(TransactionType::Regular, Amount(300_000), Amount(1_000_000), Amount(500));
        assert_eq!(direction, TransactionDirection::Sent);
        assert_eq!(amount, Amount(699_500));
    }

    #[test]
    fn test_zero_difference_counts_as_sent() {
        let (amount, direction) =
            amount_and_direction(TransactionType::Regular, Amount(1_000), Amount(1_000), Amount::ZERO);
        assert_eq!(direction, TransactionDirection::Sent);
        assert_eq!(amount, Amount::ZERO);
    }

    #[test]
    fn test_stake_transactions_pass_credits_through() {
        let (amount, direction) =
            amount_and_direction(TransactionType::Vote, Amount(2_000_000), Amount(1_900_000), Amount(0));
        assert_eq!(direction, TransactionDirection::Unclassified);
        assert_eq!(amount, Amount(2_000_000));
    }

    #[test]
    fn test_index_deduplicates() {
        let tx = Transaction {
            hash: Hash([1u8; 32]),
            amount: Amount(1),
            fee: Amount::ZERO,
            fee_rate: Amount::ZERO,
            size: 0,
            tx_type: TransactionType::Regular,
            direction: TransactionDirection::Received,
            timestamp: 10,
            formatted_time: String::new(),
        };
        let index = TransactionIndex::from_transactions(vec![tx.clone(), tx.clone()]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&tx.hash), Some(&tx));
    }
}
