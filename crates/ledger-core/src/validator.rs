//! Block validation against the committed ledger.
//!
//! Every check is a read: identity and sequencing of the block itself,
//! transaction-id uniqueness, and per-transaction input resolution, value
//! conservation and spend status. Checks fail fast with the first violated
//! invariant and never merge partial results.
//!
//! Inputs are resolved against the state **before** the block being
//! validated. Spending an output created earlier in the same block is not
//! permitted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::types::{BlockRequest, OutPoint, OutputRow, TransactionRequest};

/// Read-only checks of a submitted block against a [`LedgerStore`].
pub struct BlockValidator<S> {
    store: Arc<S>,
}

impl<S: LedgerStore> BlockValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Recompute the block id from height and transaction ids and compare it
    /// with the claimed id.
    pub fn validate_block_identity(&self, block: &BlockRequest) -> Result<(), LedgerError> {
        let expected = block.computed_id();
        if expected != block.id {
            return Err(LedgerError::InvalidBlockId {
                expected,
                got: block.id.clone(),
            });
        }
        Ok(())
    }

    /// The block must extend the current tip by exactly one (or be height 1
    /// on an empty ledger), and blocks above height 1 must carry at least one
    /// transaction.
    pub fn validate_height_sequencing(&self, block: &BlockRequest) -> Result<(), LedgerError> {
        let expected = match self.store.highest_height()? {
            Some(tip) => tip
                .checked_add(1)
                .ok_or_else(|| LedgerError::Storage("tip height overflow".into()))?,
            None => 1,
        };
        if block.height != expected {
            return Err(LedgerError::InvalidHeight {
                expected,
                got: block.height,
            });
        }
        if block.height > 1 && block.transactions.is_empty() {
            return Err(LedgerError::MissingTransactions {
                height: block.height,
            });
        }
        Ok(())
    }

    /// Transaction ids must be unique within the block and unknown to the
    /// ledger.
    pub fn validate_transaction_id_uniqueness(
        &self,
        transactions: &[TransactionRequest],
    ) -> Result<(), LedgerError> {
        if transactions.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::with_capacity(transactions.len());
        for tx in transactions {
            if !seen.insert(tx.id.as_str()) {
                return Err(LedgerError::DuplicateTransactionId(tx.id.clone()));
            }
        }

        let ids: Vec<&str> = transactions.iter().map(|tx| tx.id.as_str()).collect();
        let existing: HashSet<String> = self
            .store
            .get_transactions_by_id(&ids)?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if !existing.is_empty() {
            let offending = ids
                .into_iter()
                .filter(|id| existing.contains(*id))
                .map(str::to_string)
                .collect();
            return Err(LedgerError::TransactionAlreadyExists(offending));
        }
        Ok(())
    }

    /// Resolve every input to a stored output and require the input total to
    /// equal the declared output total exactly.
    ///
    /// Returns the resolved outputs in input order. A coinbase (no inputs)
    /// resolves to nothing. An input listed twice is [`LedgerError::AlreadySpent`]
    /// and is never counted twice.
    pub fn validate_output_balance(
        &self,
        tx: &TransactionRequest,
    ) -> Result<Vec<OutputRow>, LedgerError> {
        if tx.inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::with_capacity(tx.inputs.len());
        let mut repeated: Vec<(String, u64)> = tx
            .inputs
            .iter()
            .filter(|input| !seen.insert(*input))
            .map(OutPoint::to_pair)
            .collect();
        if !repeated.is_empty() {
            repeated.sort();
            repeated.dedup();
            return Err(LedgerError::AlreadySpent(repeated));
        }

        let found: HashMap<OutPoint, OutputRow> = self
            .store
            .get_outputs_by_keys(&tx.inputs)?
            .into_iter()
            .map(|row| (row.outpoint(), row))
            .collect();

        let mut resolved = Vec::with_capacity(tx.inputs.len());
        let mut missing = Vec::new();
        for input in &tx.inputs {
            match found.get(input) {
                Some(row) => resolved.push(row.clone()),
                None => missing.push(input.to_pair()),
            }
        }
        if !missing.is_empty() {
            return Err(LedgerError::InputNotFound {
                tx_id: tx.id.clone(),
                missing,
            });
        }

        let total_inputs = resolved
            .iter()
            .try_fold(Decimal::ZERO, |acc, row| acc.checked_add(row.amount))
            .ok_or_else(|| LedgerError::AmountOverflow(format!("inputs of transaction {}", tx.id)))?;
        let total_outputs = tx
            .total_output_value()
            .ok_or_else(|| LedgerError::AmountOverflow(format!("outputs of transaction {}", tx.id)))?;

        if total_inputs != total_outputs {
            return Err(LedgerError::BalanceMismatch {
                tx_id: tx.id.clone(),
                inputs: total_inputs.to_string(),
                outputs: total_outputs.to_string(),
            });
        }

        Ok(resolved)
    }

    /// No input may reference an output that already carries a spend marker.
    pub fn validate_not_already_spent(&self, inputs: &[OutPoint]) -> Result<(), LedgerError> {
        if inputs.is_empty() {
            return Ok(());
        }

        let mut spent: Vec<(String, u64)> = self
            .store
            .get_spent_outputs_by_keys(inputs)?
            .into_iter()
            .map(|row| (row.tx_id, row.index))
            .collect();
        if !spent.is_empty() {
            spent.sort();
            return Err(LedgerError::AlreadySpent(spent));
        }
        Ok(())
    }
}
