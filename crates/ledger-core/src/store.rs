//! Ledger storage interface and in-memory implementation.
//!
//! Provides the [`LedgerStore`] trait over the five ledger relations (blocks,
//! transactions, outputs, spent outputs, balance deltas). The
//! [`MemoryLedgerStore`] is suitable for testing; the production node uses
//! RocksDB (ledger-node).
//!
//! Rows passed to [`LedgerStore::append_block`] must already be validated.
//! The store only enforces its own key and reference constraints, and a
//! constraint violation rejects the whole append.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::error::LedgerError;
use crate::types::{
    BlockRow, BlockRows, OutPoint, OutputRow, RollbackSummary, SpentOutputRow, TransactionRow,
};

/// Durable ledger relations.
///
/// Every multi-row operation is all-or-nothing. Methods take `&self`:
/// implementations synchronize internally so that reads may run
/// concurrently. Serializing writers is the caller's job
/// (see [`BlockService`](crate::service::BlockService)).
pub trait LedgerStore: Send + Sync {
    /// Insert all rows of a block in one atomic write.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Storage`] if any key or reference constraint is
    ///   violated, or the underlying write fails. Nothing is written.
    fn append_block(&self, rows: &BlockRows) -> Result<(), LedgerError>;

    /// Block at `height`, if committed.
    fn get_block(&self, height: u64) -> Result<Option<BlockRow>, LedgerError>;

    /// Height of the most recent block, or `None` if the ledger is empty.
    fn highest_height(&self) -> Result<Option<u64>, LedgerError>;

    /// Persisted transactions whose id is in `ids`.
    fn get_transactions_by_id(&self, ids: &[&str]) -> Result<Vec<TransactionRow>, LedgerError>;

    /// Persisted outputs whose `(tx_id, index)` is in `keys`. Spent outputs
    /// are included; use [`get_spent_outputs_by_keys`](Self::get_spent_outputs_by_keys)
    /// to tell them apart.
    fn get_outputs_by_keys(&self, keys: &[OutPoint]) -> Result<Vec<OutputRow>, LedgerError>;

    /// Spend markers for any of `keys`.
    fn get_spent_outputs_by_keys(
        &self,
        keys: &[OutPoint],
    ) -> Result<Vec<SpentOutputRow>, LedgerError>;

    /// Sum of all balance deltas recorded for `address`. Zero if none.
    fn get_balance(&self, address: &str) -> Result<Decimal, LedgerError>;

    /// Delete every row tied to a height above `height`, in one atomic write.
    ///
    /// Outputs spent by removed transactions become unspent again because
    /// their spend markers go with them.
    fn delete_blocks_above(&self, height: u64) -> Result<RollbackSummary, LedgerError>;

    /// Whether no blocks have been committed.
    ///
    /// Default implementation delegates to [`highest_height`](Self::highest_height).
    fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.highest_height()?.is_none())
    }
}

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<u64, BlockRow>,
    transactions: HashMap<String, TransactionRow>,
    outputs: HashMap<OutPoint, OutputRow>,
    spent_outputs: HashMap<OutPoint, SpentOutputRow>,
    /// Keyed by `(address, block_height)`.
    balance_deltas: BTreeMap<(String, u64), Decimal>,
}

/// In-memory ledger store for testing.
///
/// Stores everything in maps behind a single `RwLock`, with no persistence.
#[derive(Default)]
pub struct MemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl MemoryLedgerStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks stored.
    pub fn block_count(&self) -> usize {
        self.tables.read().blocks.len()
    }

    /// Number of outputs stored, spent or not.
    pub fn output_count(&self) -> usize {
        self.tables.read().outputs.len()
    }

    /// Number of spend markers stored.
    pub fn spent_output_count(&self) -> usize {
        self.tables.read().spent_outputs.len()
    }

    /// Number of balance delta rows stored.
    pub fn balance_delta_count(&self) -> usize {
        self.tables.read().balance_deltas.len()
    }

    /// Check every constraint the append would touch, without mutating.
    fn check_constraints(tables: &Tables, rows: &BlockRows) -> Result<(), LedgerError> {
        let height = rows.block.height;
        if tables.blocks.contains_key(&height) {
            return Err(violation(format!("block at height {height} already exists")));
        }
        if tables.blocks.values().any(|b| b.id == rows.block.id) {
            return Err(violation(format!("block id {} already exists", rows.block.id)));
        }

        let mut new_txs = HashSet::with_capacity(rows.transactions.len());
        for tx in &rows.transactions {
            if tx.block_height != height {
                return Err(violation(format!("transaction {} references height {}", tx.id, tx.block_height)));
            }
            if tables.transactions.contains_key(&tx.id) || !new_txs.insert(tx.id.as_str()) {
                return Err(violation(format!("transaction {} already exists", tx.id)));
            }
        }

        let mut new_outputs = HashSet::with_capacity(rows.outputs.len());
        for output in &rows.outputs {
            let key = output.outpoint();
            if !new_txs.contains(output.tx_id.as_str()) {
                return Err(violation(format!("output {key} references unknown transaction")));
            }
            if tables.outputs.contains_key(&key) || !new_outputs.insert(key.clone()) {
                return Err(violation(format!("output {key} already exists")));
            }
        }

        let mut new_spent = HashSet::with_capacity(rows.spent_outputs.len());
        for spent in &rows.spent_outputs {
            let key = spent.outpoint();
            if !tables.outputs.contains_key(&key) {
                return Err(violation(format!("spent output {key} references unknown output")));
            }
            if !new_txs.contains(spent.spent_by_transaction_id.as_str()) {
                return Err(violation(format!(
                    "spent output {key} references unknown transaction {}",
                    spent.spent_by_transaction_id
                )));
            }
            if tables.spent_outputs.contains_key(&key) || !new_spent.insert(key.clone()) {
                return Err(violation(format!("spent output {key} already exists")));
            }
        }

        let mut new_deltas = HashSet::with_capacity(rows.balance_deltas.len());
        for delta in &rows.balance_deltas {
            if delta.block_height != height || !new_deltas.insert(delta.address.as_str()) {
                return Err(violation(format!(
                    "balance delta ({}, {}) already exists",
                    delta.address, delta.block_height
                )));
            }
        }

        Ok(())
    }
}

fn violation(msg: String) -> LedgerError {
    LedgerError::Storage(format!("constraint violation: {msg}"))
}

impl LedgerStore for MemoryLedgerStore {
    fn append_block(&self, rows: &BlockRows) -> Result<(), LedgerError> {
        let mut tables = self.tables.write();
        Self::check_constraints(&tables, rows)?;

        tables.blocks.insert(rows.block.height, rows.block.clone());
        for tx in &rows.transactions {
            tables.transactions.insert(tx.id.clone(), tx.clone());
        }
        for output in &rows.outputs {
            tables.outputs.insert(output.outpoint(), output.clone());
        }
        for spent in &rows.spent_outputs {
            tables.spent_outputs.insert(spent.outpoint(), spent.clone());
        }
        for delta in &rows.balance_deltas {
            tables
                .balance_deltas
                .insert((delta.address.clone(), delta.block_height), delta.balance_delta);
        }
        Ok(())
    }

    fn get_block(&self, height: u64) -> Result<Option<BlockRow>, LedgerError> {
        Ok(self.tables.read().blocks.get(&height).cloned())
    }

    fn highest_height(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.tables.read().blocks.keys().next_back().copied())
    }

    fn get_transactions_by_id(&self, ids: &[&str]) -> Result<Vec<TransactionRow>, LedgerError> {
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.transactions.get(*id).cloned())
            .collect())
    }

    fn get_outputs_by_keys(&self, keys: &[OutPoint]) -> Result<Vec<OutputRow>, LedgerError> {
        let tables = self.tables.read();
        let unique: HashSet<&OutPoint> = keys.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|key| tables.outputs.get(key).cloned())
            .collect())
    }

    fn get_spent_outputs_by_keys(
        &self,
        keys: &[OutPoint],
    ) -> Result<Vec<SpentOutputRow>, LedgerError> {
        let tables = self.tables.read();
        let unique: HashSet<&OutPoint> = keys.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|key| tables.spent_outputs.get(key).cloned())
            .collect())
    }

    fn get_balance(&self, address: &str) -> Result<Decimal, LedgerError> {
        let tables = self.tables.read();
        let start = (address.to_string(), 0u64);
        let end = (address.to_string(), u64::MAX);
        tables
            .balance_deltas
            .range(start..=end)
            .try_fold(Decimal::ZERO, |acc, (_, delta)| acc.checked_add(*delta))
            .ok_or_else(|| LedgerError::AmountOverflow(format!("balance of address {address}")))
    }

    fn delete_blocks_above(&self, height: u64) -> Result<RollbackSummary, LedgerError> {
        let mut tables = self.tables.write();
        let mut summary = RollbackSummary::default();

        // Dependents first: spend markers, outputs, deltas, transactions, blocks.
        let before = tables.spent_outputs.len();
        tables.spent_outputs.retain(|_, s| s.spent_at_height <= height);
        summary.spent_outputs_removed = before - tables.spent_outputs.len();

        let before = tables.outputs.len();
        tables.outputs.retain(|_, o| o.block_height <= height);
        summary.outputs_removed = before - tables.outputs.len();

        let before = tables.balance_deltas.len();
        tables.balance_deltas.retain(|(_, h), _| *h <= height);
        summary.balance_deltas_removed = before - tables.balance_deltas.len();

        let before = tables.transactions.len();
        tables.transactions.retain(|_, t| t.block_height <= height);
        summary.transactions_removed = before - tables.transactions.len();

        if let Some(first_removed) = height.checked_add(1) {
            summary.blocks_removed = tables.blocks.split_off(&first_removed).len();
        }

        Ok(summary)
    }
}
