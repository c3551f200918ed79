//! Transaction assembly, signing and publishing
//!
//! Two modes: let the backend pick inputs for an account, or spend an
//! explicit set of outputs with change worked out here. Both end in the
//! same sign then publish chain. Nothing is retried; a failed stage is
//! reported with its name and the caller decides what to do next.

use crate::backend::{ConstructRequest, OutputRequest, OutputSelection, WalletBackend};
use crate::change::compute_change;
use crate::error::{BridgeError, Stage};
use crate::fees::{FeeEstimator, P2PKH_PK_SCRIPT_SIZE};
use crate::types::{Amount, Hash, OutputKey, TransactionDestination};
use crate::utxo::select_by_keys;
use crate::wire::{OutPoint, TxIn, TxOut, WireTx};
use crate::Result;

/// Destination after address validation
#[derive(Debug, Clone)]
struct ResolvedDestination {
    destination: TransactionDestination,
    script: Vec<u8>,
    script_version: u16,
}

pub struct TransactionAssembler<'a> {
    backend: &'a dyn WalletBackend,
    fees: FeeEstimator,
}

impl<'a> TransactionAssembler<'a> {
    pub fn new(backend: &'a dyn WalletBackend, fees: FeeEstimator) -> Self {
        Self { backend, fees }
    }

    /// Send to `destinations`, letting the backend select inputs
    ///
    /// A send-max destination switches the backend to spend every eligible
    /// output with the change routed to that destination.
    pub async fn send_from_account(
        &self,
        source_account: u32,
        required_confirmations: i32,
        destinations: &[TransactionDestination],
        passphrase: &str,
    ) -> Result<Hash> {
        self.resolve_destinations(destinations).await?;

        let max_address = destinations
            .iter()
            .find(|d| d.send_max)
            .map(|d| d.address.clone());
        let outputs = destinations
            .iter()
            .filter(|d| !d.send_max)
            .map(|d| OutputRequest {
                address: d.address.clone(),
                amount: d.amount,
            })
            .collect();

        let selection = if max_address.is_some() {
            OutputSelection::All
        } else {
            OutputSelection::Unspecified
        };
        let request = ConstructRequest {
            source_account,
            required_confirmations,
            outputs,
            selection,
            change_destination: max_address,
        };

        log::info!(
            "Constructing transaction from account {} to {} destination(s)",
            source_account,
            destinations.len()
        );
        let unsigned = self
            .backend
            .construct_transaction(request)
            .await
            .map_err(BridgeError::at(Stage::Constructing))?;

        self.sign_and_publish(unsigned, passphrase).await
    }

    /// Spend exactly the outputs named by `utxo_keys`
    ///
    /// With no `change_destinations` the leftover value goes to a fresh
    /// address of `source_account` (or to the send-max destination). Explicit
    /// change destinations must add up to the computed change; a single one
    /// with a zero amount takes all of it.
    pub async fn send_from_utxos(
        &self,
        source_account: u32,
        required_confirmations: i32,
        utxo_keys: &[OutputKey],
        destinations: &[TransactionDestination],
        change_destinations: &[TransactionDestination],
        passphrase: &str,
    ) -> Result<Hash> {
        if utxo_keys.is_empty() {
            return Err(BridgeError::invalid_input("no outputs selected"));
        }

        let mut resolved = self.resolve_destinations(destinations).await?;
        let explicit_change = self.resolve_change(change_destinations).await?;

        if !explicit_change.is_empty() {
            if let Some(pos) = resolved.iter().position(|r| r.destination.send_max) {
                let dropped = resolved.remove(pos);
                log::warn!(
                    "⚠️  Explicit change destinations given; ignoring send-max destination {}",
                    dropped.destination.address
                );
            }
        }

        let selection = select_by_keys(self.backend, source_account, utxo_keys, required_confirmations).await?;
        if selection.outputs.is_empty() {
            return Err(BridgeError::NoInputsSelected);
        }
        if !selection.is_complete() {
            return Err(BridgeError::StaleState(format!(
                "{} selected output(s) are no longer unspent: {}",
                selection.missing.len(),
                selection
                    .missing
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let input_count = selection.outputs.len();
        let total_input = Amount::checked_sum(selection.outputs.iter().map(|u| u.amount))
            .ok_or_else(|| BridgeError::malformed("selected output amounts overflow"))?;
        let has_max = resolved.iter().any(|r| r.destination.send_max);

        let mut script_sizes: Vec<usize> = resolved.iter().map(|r| r.script.len()).collect();
        if !explicit_change.is_empty() {
            script_sizes.extend(explicit_change.iter().map(|c| c.script.len()));
        } else if !has_max {
            script_sizes.push(P2PKH_PK_SCRIPT_SIZE);
        }
        let fee = self
            .fees
            .estimate_fee(self.fees.estimate_size(input_count, &script_sizes));

        let plain: Vec<TransactionDestination> = resolved.iter().map(|r| r.destination.clone()).collect();
        let outcome = compute_change(input_count, total_input, &plain, fee)?;
        log::debug!(
            "Inputs {} ({}), fee {}, change {}",
            input_count,
            total_input,
            fee,
            outcome.change_amount
        );

        let mut outputs: Vec<TxOut> = resolved
            .iter()
            .map(|r| {
                let amount = if r.destination.send_max {
                    outcome.max_destination_amount.unwrap_or(Amount::ZERO)
                } else {
                    r.destination.amount
                };
                TxOut {
                    value: amount,
                    script_version: r.script_version,
                    pk_script: r.script.clone(),
                }
            })
            .collect();

        if outcome.requires_change_output {
            if explicit_change.is_empty() {
                let address = self
                    .backend
                    .next_address(source_account)
                    .await
                    .map_err(BridgeError::at(Stage::GeneratingAddress))?;
                let change = self.resolve_address(&address).await?;
                outputs.push(TxOut {
                    value: outcome.change_amount,
                    script_version: change.1,
                    pk_script: change.0,
                });
            } else {
                outputs.extend(allocate_change(&explicit_change, outcome.change_amount)?);
            }
        }

        let tx = WireTx {
            inputs: selection
                .outputs
                .iter()
                .map(|u| {
                    TxIn::new(
                        OutPoint {
                            hash: u.key.hash,
                            index: u.key.index,
                            tree: u.tree,
                        },
                        u.amount,
                    )
                })
                .collect(),
            outputs,
            ..WireTx::default()
        };
        let spent = Amount::checked_sum(tx.outputs.iter().map(|o| o.value))
            .and_then(|out| out.checked_add(fee))
            .ok_or_else(|| BridgeError::invalid_input("output amounts overflow"))?;
        let available = Amount::checked_sum(tx.inputs.iter().map(|i| i.value_in))
            .ok_or_else(|| BridgeError::malformed("input amounts overflow"))?;
        if available < spent {
            return Err(BridgeError::InsufficientFunds {
                available,
                required: spent,
            });
        }

        log::info!(
            "Assembled transaction spending {} selected output(s) into {} output(s)",
            tx.inputs.len(),
            tx.outputs.len()
        );
        self.sign_and_publish(tx.serialize(), passphrase).await
    }

    async fn sign_and_publish(&self, unsigned: Vec<u8>, passphrase: &str) -> Result<Hash> {
        let signed = self
            .backend
            .sign_transaction(unsigned, passphrase)
            .await
            .map_err(BridgeError::at(Stage::Signing))?;

        let hash = self
            .backend
            .publish_transaction(signed)
            .await
            .map_err(BridgeError::at(Stage::Publishing))?;

        log::info!("📤 Published transaction {}", hash);
        Ok(hash)
    }

    async fn resolve_address(&self, address: &str) -> Result<(Vec<u8>, u16)> {
        let validation = self
            .backend
            .validate_address(address)
            .await
            .map_err(BridgeError::at(Stage::ValidatingAddress))?;
        if !validation.valid {
            return Err(BridgeError::invalid_input(format!("invalid address {}", address)));
        }
        Ok((validation.script, validation.script_version))
    }

    async fn resolve_destinations(
        &self,
        destinations: &[TransactionDestination],
    ) -> Result<Vec<ResolvedDestination>> {
        if destinations.is_empty() {
            return Err(BridgeError::invalid_input("no destinations given"));
        }
        if destinations.iter().filter(|d| d.send_max).count() > 1 {
            return Err(BridgeError::invalid_input(
                "only one destination can be marked send-max",
            ));
        }

        let mut resolved = Vec::with_capacity(destinations.len());
        for destination in destinations {
            if !destination.send_max && !destination.amount.is_positive() {
                return Err(BridgeError::invalid_input(format!(
                    "amount for {} must be positive",
                    destination.address
                )));
            }
            let (script, script_version) = self.resolve_address(&destination.address).await?;
            resolved.push(ResolvedDestination {
                destination: destination.clone(),
                script,
                script_version,
            });
        }
        Ok(resolved)
    }

    async fn resolve_change(
        &self,
        change_destinations: &[TransactionDestination],
    ) -> Result<Vec<ResolvedDestination>> {
        let mut resolved = Vec::with_capacity(change_destinations.len());
        for change in change_destinations {
            if change.send_max {
                return Err(BridgeError::invalid_input(
                    "change destinations cannot be marked send-max",
                ));
            }
            if change.amount < Amount::ZERO {
                return Err(BridgeError::invalid_input("change amount cannot be negative"));
            }
            let (script, script_version) = self.resolve_address(&change.address).await?;
            resolved.push(ResolvedDestination {
                destination: change.clone(),
                script,
                script_version,
            });
        }
        Ok(resolved)
    }
}

/// Split `change` over explicit change destinations
fn allocate_change(changes: &[ResolvedDestination], change: Amount) -> Result<Vec<TxOut>> {
    if let [single] = changes {
        if single.destination.amount == Amount::ZERO {
            return Ok(vec![TxOut {
                value: change,
                script_version: single.script_version,
                pk_script: single.script.clone(),
            }]);
        }
    }

    if changes.iter().any(|c| !c.destination.amount.is_positive()) {
        return Err(BridgeError::invalid_input(
            "every change destination needs an amount when more than one is given",
        ));
    }
    let allocated = Amount::checked_sum(changes.iter().map(|c| c.destination.amount))
        .ok_or_else(|| BridgeError::invalid_input("change amounts overflow"))?;
    if allocated != change {
        return Err(BridgeError::invalid_input(format!(
            "change destinations total {} but the change is {}",
            allocated, change
        )));
    }
    Ok(changes
        .iter()
        .map(|c| TxOut {
            value: c.destination.amount,
            script_version: c.script_version,
            pk_script: c.script.clone(),
        })
        .collect())
}
