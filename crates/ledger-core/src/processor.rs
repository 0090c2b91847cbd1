//! Pure transformation of submitted transactions into ledger rows.
//!
//! Nothing here touches the store. Inputs must already be resolved to their
//! stored [`OutputRow`]s by the validator.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::LedgerError;
use crate::types::{BalanceDeltaRow, OutputRow, SpentOutputRow, TransactionRequest, TransactionRow};

/// Per-address signed balance changes.
///
/// [`merge`](Self::merge) is plain per-key addition, so merging in any order
/// or grouping yields the same map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalanceDeltas(BTreeMap<String, Decimal>);

impl BalanceDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` (which may be negative) to `address`.
    pub fn add(&mut self, address: &str, amount: Decimal) -> Result<(), LedgerError> {
        let entry = self.0.entry(address.to_string()).or_insert(Decimal::ZERO);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| LedgerError::AmountOverflow(format!("balance delta for address {address}")))?;
        Ok(())
    }

    /// Fold every entry of `other` into `self`.
    pub fn merge(&mut self, other: BalanceDeltas) -> Result<(), LedgerError> {
        for (address, amount) in other.0 {
            self.add(&address, amount)?;
        }
        Ok(())
    }

    /// Accumulated delta for `address`, zero if untouched.
    pub fn get(&self, address: &str) -> Decimal {
        self.0.get(address).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.0.iter().map(|(a, d)| (a.as_str(), *d))
    }

    /// One row per touched address at `height`, ordered by address.
    pub fn into_rows(self, height: u64) -> Vec<BalanceDeltaRow> {
        self.0
            .into_iter()
            .map(|(address, balance_delta)| BalanceDeltaRow {
                address,
                block_height: height,
                balance_delta,
            })
            .collect()
    }
}

/// Builds storage rows and balance contributions for one transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransactionProcessor;

impl TransactionProcessor {
    pub fn new() -> Self {
        Self
    }

    /// One output row per declared output; `index` is the position in the
    /// output list.
    pub fn build_output_rows(&self, tx: &TransactionRequest, height: u64) -> Vec<OutputRow> {
        tx.outputs
            .iter()
            .enumerate()
            .map(|(index, output)| OutputRow {
                tx_id: tx.id.clone(),
                index: index as u64,
                address: output.address.clone(),
                amount: output.value,
                block_height: height,
            })
            .collect()
    }

    pub fn build_transaction_row(&self, tx: &TransactionRequest, height: u64) -> TransactionRow {
        TransactionRow {
            id: tx.id.clone(),
            block_height: height,
        }
    }

    /// One spend marker per consumed output, attributed to `spending_tx_id`.
    pub fn build_spent_output_rows(
        &self,
        consumed: &[OutputRow],
        height: u64,
        spending_tx_id: &str,
    ) -> Vec<SpentOutputRow> {
        consumed
            .iter()
            .map(|output| SpentOutputRow {
                tx_id: output.tx_id.clone(),
                index: output.index,
                spent_at_height: height,
                spent_by_transaction_id: spending_tx_id.to_string(),
            })
            .collect()
    }

    /// Consumed outputs debit their owner, produced outputs credit their
    /// receiver.
    pub fn compute_balance_deltas(
        &self,
        consumed: &[OutputRow],
        produced: &[OutputRow],
    ) -> Result<BalanceDeltas, LedgerError> {
        let mut deltas = BalanceDeltas::new();
        for output in consumed {
            deltas.add(&output.address, -output.amount)?;
        }
        for output in produced {
            deltas.add(&output.address, output.amount)?;
        }
        Ok(deltas)
    }
}
