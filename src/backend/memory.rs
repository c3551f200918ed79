//! In-process wallet backend
//!
//! Keeps accounts, an address book, the unspent set and transaction history
//! in memory. Used for embedded mode and as the backend of the test suites,
//! so it also supports scripted sync/rescan streams, per-stage failure
//! injection and call counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};

use super::{
    AccountRecord, AddressValidation, BackendResult, BackendStream, BlockInfo, BlockStamp,
    ConstructRequest, CreditRecord, DebitRecord, OutputSelection, RescanUpdate, SyncNotification,
    TransactionBatch, TransactionLookup, TransactionRecord, UnspentRecord, UnspentRequest,
    WalletBackend,
};
use crate::error::{BackendError, Stage};
use crate::fees::FeeEstimator;
use crate::types::{Amount, Balance, Hash, Network, OutputKey, TransactionType, Tree};
use crate::wire::{OutPoint, TxIn, TxOut, WireTx};

pub const DEFAULT_ACCOUNT: u32 = 0;
pub const IMPORTED_ACCOUNT: u32 = i32::MAX as u32;
pub const COINBASE_MATURITY: i32 = 256;

/// Fee paid by the synthetic sender of funds created with [`MemoryBackend::fund`]
pub const FUNDING_FEE: Amount = Amount(2_530);

const GENESIS_TIME: i64 = 1_454_954_400;
const SIGNATURE_SCRIPT_SIZE: usize = 108;

/// How a scripted stream ends after its items are delivered
#[derive(Debug, Clone)]
pub enum StreamEnding {
    Close,
    Fail(BackendError),
    Hang,
}

#[derive(Debug, Clone)]
struct Script<T> {
    items: Vec<T>,
    ending: StreamEnding,
}

#[derive(Debug, Clone)]
struct MemAccount {
    number: u32,
    name: String,
    next_index: u32,
}

#[derive(Debug, Clone)]
struct MemAddress {
    account: u32,
    internal: bool,
}

#[derive(Debug, Clone)]
struct MemUnspent {
    account: u32,
    record: UnspentRecord,
}

#[derive(Debug, Clone)]
struct MemTransaction {
    /// -1 while unmined
    height: i32,
    record: TransactionRecord,
}

#[derive(Debug, Default)]
struct State {
    accounts: Vec<MemAccount>,
    addresses: HashMap<String, MemAddress>,
    unspent: Vec<MemUnspent>,
    transactions: Vec<MemTransaction>,
    best_height: u32,
    passphrase: String,
    locked_by_tickets: HashMap<u32, Amount>,
    failures: HashMap<Stage, BackendError>,
    stream_faults: HashMap<Stage, (usize, BackendError)>,
    /// Extra outputs streamed after a positive target is covered
    unspent_surplus: usize,
    calls: HashMap<Stage, usize>,
    published: Vec<Vec<u8>>,
    sync_script: Option<Script<SyncNotification>>,
    rescan_script: Option<Script<RescanUpdate>>,
}

pub struct MemoryBackend {
    network: Network,
    fees: FeeEstimator,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Empty wallet with the `default` and `imported` accounts
    pub fn new(network: Network) -> Self {
        let state = State {
            accounts: vec![
                MemAccount {
                    number: DEFAULT_ACCOUNT,
                    name: "default".to_string(),
                    next_index: 0,
                },
                MemAccount {
                    number: IMPORTED_ACCOUNT,
                    name: "imported".to_string(),
                    next_index: 0,
                },
            ],
            ..State::default()
        };
        Self {
            network,
            fees: FeeEstimator::default(),
            state: Mutex::new(state),
        }
    }

    pub fn with_fee_estimator(mut self, fees: FeeEstimator) -> Self {
        self.fees = fees;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Wallet setup
    // ========================================================================

    pub fn set_passphrase(&self, passphrase: impl Into<String>) {
        self.state().passphrase = passphrase.into();
    }

    pub fn set_best_height(&self, height: u32) {
        self.state().best_height = height;
    }

    pub fn best_height(&self) -> u32 {
        self.state().best_height
    }

    pub fn add_account(&self, name: &str) -> u32 {
        let mut state = self.state();
        let number = next_account_number(&state);
        state.accounts.push(MemAccount {
            number,
            name: name.to_string(),
            next_index: 0,
        });
        number
    }

    pub fn set_locked_by_tickets(&self, account: u32, amount: Amount) {
        self.state().locked_by_tickets.insert(account, amount);
    }

    /// Fresh external address of `account`
    pub fn new_address(&self, account: u32) -> String {
        let mut state = self.state();
        derive_address(&mut state, self.network, account, false)
    }

    /// Receive `amount` into `account` from an outside sender, mined at
    /// `height` (-1 leaves it unmined). Records both the unspent output and
    /// the receiving transaction.
    pub fn fund(&self, account: u32, amount: Amount, height: i32) -> OutputKey {
        let mut state = self.state();
        let address = derive_address(&mut state, self.network, account, false);
        let nonce = state.transactions.len() as u32;
        let tx = WireTx {
            inputs: vec![TxIn::new(
                OutPoint {
                    hash: Hash(sha256d(&nonce.to_le_bytes())),
                    index: 0,
                    tree: Tree::Regular,
                },
                amount + FUNDING_FEE,
            )],
            outputs: vec![TxOut::new(amount, address_script(&address))],
            ..WireTx::default()
        };
        let raw = tx.serialize();
        let hash = Hash(sha256d(&raw));
        let timestamp = block_time(self.network, height.max(0));

        state.unspent.push(MemUnspent {
            account,
            record: UnspentRecord {
                hash,
                index: 0,
                amount,
                address: address.clone(),
                receive_time: timestamp,
                block_height: height,
                tree: Tree::Regular,
                from_coinbase: false,
            },
        });
        state.transactions.push(MemTransaction {
            height,
            record: TransactionRecord {
                hash,
                transaction: raw,
                credits: vec![CreditRecord {
                    index: 0,
                    account,
                    internal: false,
                    amount,
                    address,
                }],
                debits: Vec::new(),
                fee: FUNDING_FEE,
                timestamp,
                tx_type: TransactionType::Regular,
            },
        });
        OutputKey::new(hash, 0)
    }

    pub fn add_unspent(&self, account: u32, record: UnspentRecord) {
        self.state().unspent.push(MemUnspent { account, record });
    }

    /// Drop an output from the unspent set, as if spent elsewhere
    pub fn remove_unspent(&self, key: &OutputKey) -> bool {
        let mut state = self.state();
        let before = state.unspent.len();
        state
            .unspent
            .retain(|u| !(u.record.hash == key.hash && u.record.index == key.index));
        state.unspent.len() != before
    }

    pub fn add_transaction(&self, height: i32, record: TransactionRecord) {
        self.state().transactions.push(MemTransaction { height, record });
    }

    /// Mine every unmined transaction and output at `height`
    pub fn mine_pending(&self, height: u32) {
        let mut state = self.state();
        let timestamp = block_time(self.network, height as i32);
        for tx in state.transactions.iter_mut().filter(|t| t.height < 0) {
            tx.height = height as i32;
        }
        for u in state.unspent.iter_mut().filter(|u| u.record.block_height < 0) {
            u.record.block_height = height as i32;
            u.record.receive_time = timestamp;
        }
        if height > state.best_height {
            state.best_height = height;
        }
    }

    // ========================================================================
    // Scripting and inspection
    // ========================================================================

    /// Every call for `stage` fails with `error` until cleared
    pub fn fail_at(&self, stage: Stage, error: BackendError) {
        self.state().failures.insert(stage, error);
    }

    pub fn clear_failure(&self, stage: Stage) {
        self.state().failures.remove(&stage);
    }

    /// The stream opened for `stage` yields `after` items, then `error`
    pub fn fail_stream_at(&self, stage: Stage, after: usize, error: BackendError) {
        self.state().stream_faults.insert(stage, (after, error));
    }

    /// Stream `extra` more outputs than needed to cover a positive target
    pub fn set_unspent_surplus(&self, extra: usize) {
        self.state().unspent_surplus = extra;
    }

    pub fn script_sync(&self, events: Vec<SyncNotification>, ending: StreamEnding) {
        self.state().sync_script = Some(Script { items: events, ending });
    }

    pub fn script_rescan(&self, updates: Vec<RescanUpdate>, ending: StreamEnding) {
        self.state().rescan_script = Some(Script { items: updates, ending });
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        self.state().calls.get(&stage).copied().unwrap_or(0)
    }

    /// Signed transactions accepted by `publish_transaction`, in order
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state().published.clone()
    }

    pub fn unspent_keys(&self, account: u32) -> Vec<OutputKey> {
        self.state()
            .unspent
            .iter()
            .filter(|u| u.account == account)
            .map(|u| OutputKey::new(u.record.hash, u.record.index))
            .collect()
    }

    /// Count the call and return any injected failure for `stage`
    fn enter(&self, stage: Stage) -> BackendResult<MutexGuard<'_, State>> {
        let mut state = self.state();
        *state.calls.entry(stage).or_insert(0) += 1;
        if let Some(err) = state.failures.get(&stage) {
            return Err(err.clone());
        }
        Ok(state)
    }

    fn confirmations(best: u32, height: i32) -> i32 {
        if height < 0 {
            0
        } else {
            (best as i32 - height + 1).max(0)
        }
    }

    fn balance_of(state: &State, account: u32, required_confirmations: i32) -> Balance {
        let mut balance = Balance::default();
        for u in state.unspent.iter().filter(|u| u.account == account) {
            let confs = Self::confirmations(state.best_height, u.record.block_height);
            balance.total += u.record.amount;
            if confs == 0 {
                balance.unconfirmed += u.record.amount;
            }
            let immature = u.record.from_coinbase && confs < COINBASE_MATURITY;
            if confs >= required_confirmations && !immature {
                balance.spendable += u.record.amount;
            }
        }
        if let Some(locked) = state.locked_by_tickets.get(&account) {
            balance.locked_by_tickets = *locked;
            balance.total += *locked;
        }
        balance
    }

    fn eligible_unspent(
        state: &State,
        account: u32,
        required_confirmations: i32,
        include_immature_coinbases: bool,
    ) -> Vec<UnspentRecord> {
        state
            .unspent
            .iter()
            .filter(|u| u.account == account)
            .filter(|u| {
                let confs = Self::confirmations(state.best_height, u.record.block_height);
                let immature = u.record.from_coinbase && confs < COINBASE_MATURITY;
                confs >= required_confirmations && (include_immature_coinbases || !immature)
            })
            .map(|u| u.record.clone())
            .collect()
    }

    fn check_address(&self, address: &str) -> BackendResult<()> {
        if is_valid_address(self.network, address) {
            Ok(())
        } else {
            Err(BackendError::invalid_argument(format!("invalid address {}", address)))
        }
    }

    fn finish_stream<T: Send + 'static>(state: &mut State, stage: Stage, items: Vec<T>) -> BackendStream<T> {
        match state.stream_faults.get(&stage).cloned() {
            Some((after, err)) => stream::iter(items.into_iter().take(after).map(Ok))
                .chain(stream::once(async move { Err(err) }))
                .boxed(),
            None => stream::iter(items.into_iter().map(Ok)).boxed(),
        }
    }

    fn scripted<T: Send + 'static>(script: Script<T>) -> BackendStream<T> {
        let items = stream::iter(script.items.into_iter().map(Ok));
        match script.ending {
            StreamEnding::Close => items.boxed(),
            StreamEnding::Fail(err) => items.chain(stream::once(async move { Err(err) })).boxed(),
            StreamEnding::Hang => items.chain(stream::pending()).boxed(),
        }
    }

    fn block_stamp(&self, state: &State) -> BlockStamp {
        BlockStamp {
            hash: block_hash(state.best_height as i32),
            height: state.best_height,
        }
    }
}

#[async_trait]
impl WalletBackend for MemoryBackend {
    async fn accounts(&self) -> BackendResult<Vec<AccountRecord>> {
        let state = self.enter(Stage::FetchingAccounts)?;
        Ok(state
            .accounts
            .iter()
            .map(|a| AccountRecord {
                number: a.number,
                name: a.name.clone(),
                balance: Self::balance_of(&state, a.number, 1),
            })
            .collect())
    }

    async fn account_balance(&self, account: u32, required_confirmations: i32) -> BackendResult<Balance> {
        let state = self.enter(Stage::FetchingBalance)?;
        if !state.accounts.iter().any(|a| a.number == account) {
            return Err(BackendError::not_found(format!("account {}", account)));
        }
        Ok(Self::balance_of(&state, account, required_confirmations))
    }

    async fn account_number(&self, name: &str) -> BackendResult<u32> {
        let state = self.enter(Stage::FetchingAccounts)?;
        state
            .accounts
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.number)
            .ok_or_else(|| BackendError::not_found(format!("account {}", name)))
    }

    async fn next_account(&self, name: &str, passphrase: &str) -> BackendResult<u32> {
        let mut state = self.enter(Stage::CreatingAccount)?;
        if state.passphrase != passphrase {
            return Err(BackendError::invalid_argument("invalid passphrase"));
        }
        if state.accounts.iter().any(|a| a.name == name) {
            return Err(BackendError::invalid_argument(format!("account {} already exists", name)));
        }
        let number = next_account_number(&state);
        state.accounts.push(MemAccount {
            number,
            name: name.to_string(),
            next_index: 0,
        });
        Ok(number)
    }

    async fn validate_address(&self, address: &str) -> BackendResult<AddressValidation> {
        let state = self.enter(Stage::ValidatingAddress)?;
        if !is_valid_address(self.network, address) {
            return Ok(AddressValidation {
                valid: false,
                is_mine: false,
                account: None,
                script: Vec::new(),
                script_version: 0,
            });
        }
        let owner = state.addresses.get(address);
        Ok(AddressValidation {
            valid: true,
            is_mine: owner.is_some(),
            account: owner.map(|o| o.account),
            script: address_script(address),
            script_version: 0,
        })
    }

    async fn next_address(&self, account: u32) -> BackendResult<String> {
        let mut state = self.enter(Stage::GeneratingAddress)?;
        if !state.accounts.iter().any(|a| a.number == account) {
            return Err(BackendError::not_found(format!("account {}", account)));
        }
        Ok(derive_address(&mut state, self.network, account, false))
    }

    async fn unspent_outputs(&self, request: UnspentRequest) -> BackendResult<BackendStream<UnspentRecord>> {
        let mut state = self.enter(Stage::ListingUnspent)?;
        let eligible = Self::eligible_unspent(
            &state,
            request.account,
            request.required_confirmations,
            request.include_immature_coinbases,
        );

        let items = if request.target_amount.is_positive() {
            let mut total = Amount::ZERO;
            let mut surplus = state.unspent_surplus;
            let mut picked = Vec::new();
            for record in eligible {
                if total >= request.target_amount {
                    if surplus == 0 {
                        break;
                    }
                    surplus -= 1;
                }
                total += record.amount;
                picked.push(record);
            }
            picked
        } else {
            eligible
        };

        Ok(Self::finish_stream(&mut state, Stage::ListingUnspent, items))
    }

    async fn construct_transaction(&self, request: ConstructRequest) -> BackendResult<Vec<u8>> {
        let mut state = self.enter(Stage::Constructing)?;
        for output in &request.outputs {
            self.check_address(&output.address)?;
            if !output.amount.is_positive() {
                return Err(BackendError::invalid_argument("output amount must be positive"));
            }
        }
        if let Some(change) = &request.change_destination {
            self.check_address(change)?;
        }

        let candidates = Self::eligible_unspent(
            &state,
            request.source_account,
            request.required_confirmations,
            false,
        );
        let target = Amount::checked_sum(request.outputs.iter().map(|o| o.amount))
            .ok_or_else(|| BackendError::invalid_argument("output amounts overflow"))?;
        let n_out = request.outputs.len();
        let required = |inputs: usize| {
            target
                .checked_add(self.fees.fee_for(inputs, n_out + 1))
                .ok_or_else(|| BackendError::invalid_argument("output amounts overflow"))
        };

        let mut selected = Vec::new();
        let mut total = Amount::ZERO;
        match request.selection {
            OutputSelection::All => {
                total = candidates.iter().map(|c| c.amount).sum();
                selected = candidates;
            }
            OutputSelection::Unspecified => {
                for candidate in candidates {
                    if total >= required(selected.len())? {
                        break;
                    }
                    total += candidate.amount;
                    selected.push(candidate);
                }
            }
        }

        let needed = required(selected.len())?;
        if selected.is_empty() || total < needed {
            return Err(BackendError::invalid_argument(format!(
                "insufficient balance: need {}, have {}",
                needed, total
            )));
        }

        let mut outputs: Vec<TxOut> = request
            .outputs
            .iter()
            .map(|o| TxOut::new(o.amount, address_script(&o.address)))
            .collect();
        let change = total - needed;
        if change.is_positive() {
            let change_address = match request.change_destination {
                Some(address) => address,
                None => derive_address(&mut state, self.network, request.source_account, true),
            };
            outputs.push(TxOut::new(change, address_script(&change_address)));
        }

        let tx = WireTx {
            inputs: selected
                .iter()
                .map(|u| {
                    TxIn::new(
                        OutPoint {
                            hash: u.hash,
                            index: u.index,
                            tree: u.tree,
                        },
                        u.amount,
                    )
                })
                .collect(),
            outputs,
            ..WireTx::default()
        };
        Ok(tx.serialize())
    }

    async fn sign_transaction(&self, unsigned: Vec<u8>, passphrase: &str) -> BackendResult<Vec<u8>> {
        let state = self.enter(Stage::Signing)?;
        if state.passphrase != passphrase {
            return Err(BackendError::invalid_argument("invalid passphrase"));
        }
        drop(state);

        let mut tx = WireTx::deserialize(&unsigned)
            .map_err(|e| BackendError::invalid_argument(e.to_string()))?;
        for (i, input) in tx.inputs.iter_mut().enumerate() {
            let mut preimage = unsigned.clone();
            preimage.extend_from_slice(&(i as u32).to_le_bytes());
            let digest = sha256d(&preimage);
            input.signature_script = digest.iter().copied().cycle().take(SIGNATURE_SCRIPT_SIZE).collect();
        }
        Ok(tx.serialize())
    }

    async fn publish_transaction(&self, signed: Vec<u8>) -> BackendResult<Hash> {
        let mut state = self.enter(Stage::Publishing)?;
        let tx = WireTx::deserialize(&signed)
            .map_err(|e| BackendError::invalid_argument(e.to_string()))?;

        let mut debits = Vec::new();
        for (i, input) in tx.inputs.iter().enumerate() {
            let op = &input.previous_outpoint;
            let position = state
                .unspent
                .iter()
                .position(|u| u.record.hash == op.hash && u.record.index == op.index)
                .ok_or_else(|| {
                    BackendError::invalid_argument(format!(
                        "transaction spends unknown or spent output {}",
                        OutputKey::new(op.hash, op.index)
                    ))
                })?;
            if input.signature_script.is_empty() {
                return Err(BackendError::invalid_argument("transaction is not signed"));
            }
            let spent = &state.unspent[position];
            debits.push(DebitRecord {
                index: i as u32,
                previous_account: spent.account,
                previous_amount: spent.record.amount,
            });
        }

        let fee = tx.total_in() - tx.total_out();
        if fee < Amount::ZERO {
            return Err(BackendError::invalid_argument("outputs exceed inputs"));
        }

        for input in &tx.inputs {
            let op = input.previous_outpoint;
            state
                .unspent
                .retain(|u| !(u.record.hash == op.hash && u.record.index == op.index));
        }

        let hash = Hash(sha256d(&signed));
        let now = chrono::Utc::now().timestamp();
        let mut credits = Vec::new();
        for (index, output) in tx.outputs.iter().enumerate() {
            let owned = state
                .addresses
                .iter()
                .find(|(address, _)| address_script(address) == output.pk_script)
                .map(|(address, owner)| (address.clone(), owner.clone()));
            if let Some((address, owner)) = owned {
                credits.push(CreditRecord {
                    index: index as u32,
                    account: owner.account,
                    internal: owner.internal,
                    amount: output.value,
                    address: address.clone(),
                });
                state.unspent.push(MemUnspent {
                    account: owner.account,
                    record: UnspentRecord {
                        hash,
                        index: index as u32,
                        amount: output.value,
                        address,
                        receive_time: now,
                        block_height: -1,
                        tree: Tree::Regular,
                        from_coinbase: false,
                    },
                });
            }
        }

        state.transactions.push(MemTransaction {
            height: -1,
            record: TransactionRecord {
                hash,
                transaction: signed.clone(),
                credits,
                debits,
                fee,
                timestamp: now,
                tx_type: TransactionType::Regular,
            },
        });
        state.published.push(signed);
        Ok(hash)
    }

    async fn get_transaction(&self, hash: Hash) -> BackendResult<TransactionLookup> {
        let state = self.enter(Stage::FetchingTransaction)?;
        let tx = state
            .transactions
            .iter()
            .find(|t| t.record.hash == hash)
            .ok_or_else(|| BackendError::not_found(format!("transaction {}", hash)))?;
        Ok(TransactionLookup {
            record: tx.record.clone(),
            block_hash: (tx.height >= 0).then(|| block_hash(tx.height)),
            confirmations: Self::confirmations(state.best_height, tx.height),
        })
    }

    async fn get_transactions(
        &self,
        start_height: i32,
        end_height: i32,
    ) -> BackendResult<BackendStream<TransactionBatch>> {
        let mut state = self.enter(Stage::FetchingTransactions)?;

        let mut by_height: BTreeMap<i32, Vec<TransactionRecord>> = BTreeMap::new();
        for tx in &state.transactions {
            by_height.entry(tx.height).or_default().push(tx.record.clone());
        }

        let mut batches = Vec::new();
        if start_height < 0 {
            if let Some(unmined) = by_height.get(&-1) {
                batches.push(TransactionBatch {
                    mined: Vec::new(),
                    unmined: unmined.clone(),
                });
            }
            let low = end_height.max(0);
            for (_, records) in by_height.range(low..).rev() {
                batches.push(TransactionBatch {
                    mined: records.clone(),
                    unmined: Vec::new(),
                });
            }
        } else {
            let (low, high) = (start_height.min(end_height), start_height.max(end_height));
            let mut ranged: Vec<_> = by_height.range(low.max(0)..=high).collect();
            if start_height > end_height {
                ranged.reverse();
            }
            for (_, records) in ranged {
                batches.push(TransactionBatch {
                    mined: records.clone(),
                    unmined: Vec::new(),
                });
            }
        }

        Ok(Self::finish_stream(&mut state, Stage::FetchingTransactions, batches))
    }

    async fn best_block(&self) -> BackendResult<BlockStamp> {
        let state = self.enter(Stage::ReadingBestBlock)?;
        Ok(self.block_stamp(&state))
    }

    async fn block_info(&self, hash: Hash) -> BackendResult<BlockInfo> {
        let state = self.enter(Stage::ReadingBlockInfo)?;
        let known = std::iter::once(state.best_height as i32)
            .chain(state.transactions.iter().map(|t| t.height).filter(|h| *h >= 0));
        for height in known {
            if block_hash(height) == hash {
                return Ok(BlockInfo {
                    hash,
                    height,
                    timestamp: block_time(self.network, height),
                    confirmations: Self::confirmations(state.best_height, height),
                });
            }
        }
        Err(BackendError::not_found(format!("block {}", hash)))
    }

    async fn spv_sync(&self) -> BackendResult<BackendStream<SyncNotification>> {
        let state = self.enter(Stage::Syncing)?;
        let script = state.sync_script.clone().unwrap_or_else(|| Script {
            items: vec![
                SyncNotification::PeerConnected { peer_count: 1 },
                SyncNotification::FetchedHeadersStarted,
                SyncNotification::FetchedHeadersFinished,
                SyncNotification::DiscoverAddressesStarted,
                SyncNotification::DiscoverAddressesFinished,
                SyncNotification::RescanStarted,
                SyncNotification::RescanProgress {
                    rescanned_through: state.best_height as i32,
                },
                SyncNotification::RescanFinished,
                SyncNotification::Synced,
            ],
            ending: StreamEnding::Hang,
        });
        Ok(Self::scripted(script))
    }

    async fn rescan(&self, begin_height: i32) -> BackendResult<BackendStream<RescanUpdate>> {
        let state = self.enter(Stage::Rescanning)?;
        let best = state.best_height as i32;
        let script = state.rescan_script.clone().unwrap_or_else(|| Script {
            items: (begin_height.max(0)..=best)
                .step_by(100)
                .skip(1)
                .chain(std::iter::once(best))
                .map(|h| RescanUpdate { rescanned_through: h })
                .collect(),
            ending: StreamEnding::Close,
        });
        Ok(Self::scripted(script))
    }
}

// ============================================================================
// Address and hash helpers
// ============================================================================

fn next_account_number(state: &State) -> u32 {
    state
        .accounts
        .iter()
        .map(|a| a.number)
        .filter(|n| *n != IMPORTED_ACCOUNT)
        .max()
        .map_or(0, |n| n + 1)
}

fn derive_address(state: &mut State, network: Network, account: u32, internal: bool) -> String {
    let index = match state.accounts.iter_mut().find(|a| a.number == account) {
        Some(a) => {
            a.next_index += 1;
            a.next_index
        }
        None => state.addresses.len() as u32,
    };
    let mut hasher = Sha256::new();
    hasher.update(network.name().as_bytes());
    hasher.update(account.to_le_bytes());
    hasher.update([internal as u8]);
    hasher.update(index.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    let address = format!("{}{}", network.address_prefix(), &digest[..33]);
    state
        .addresses
        .insert(address.clone(), MemAddress { account, internal });
    address
}

/// Addresses are a two-letter network prefix followed by 33 alphanumerics
pub fn is_valid_address(network: Network, address: &str) -> bool {
    address.len() == 35
        && address.starts_with(network.address_prefix())
        && address[2..].chars().all(|c| c.is_ascii_alphanumeric())
}

/// Pay-to-pubkey-hash script for an address
pub fn address_script(address: &str) -> Vec<u8> {
    let digest = Sha256::digest(address.as_bytes());
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&digest[..20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

pub fn block_hash(height: i32) -> Hash {
    let mut preimage = b"block".to_vec();
    preimage.extend_from_slice(&height.to_le_bytes());
    Hash(sha256d(&preimage))
}

fn block_time(network: Network, height: i32) -> i64 {
    GENESIS_TIME + height as i64 * network.target_block_spacing()
}
