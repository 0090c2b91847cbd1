//! RocksDB-backed persistent ledger storage.
//!
//! Implements [`LedgerStore`] using one column family per relation plus an
//! undo index. All mutations use an atomic [`WriteBatch`] for crash safety.
//!
//! Key layout:
//! - `blocks`: height (BE) → `BlockRecord`
//! - `block_ids`: block id → height (BE)
//! - `transactions`: tx id → height (BE)
//! - `outputs`: bincode `(tx_id, index)` → `OutputRecord`
//! - `spent_outputs`: bincode `(tx_id, index)` → `SpentRecord`
//! - `balance_deltas`: address ‖ 0x00 ‖ height (BE) → decimal text
//! - `undo`: height (BE) → `BlockUndo`, every key the block wrote

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use rust_decimal::Decimal;

use ledger_core::error::LedgerError;
use ledger_core::store::LedgerStore;
use ledger_core::types::{
    BlockRow, BlockRows, OutPoint, OutputRow, RollbackSummary, SpentOutputRow, TransactionRow,
};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_BLOCK_IDS: &str = "block_ids";
const CF_TRANSACTIONS: &str = "transactions";
const CF_OUTPUTS: &str = "outputs";
const CF_SPENT_OUTPUTS: &str = "spent_outputs";
const CF_BALANCE_DELTAS: &str = "balance_deltas";
const CF_UNDO: &str = "undo";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_BLOCK_IDS,
    CF_TRANSACTIONS,
    CF_OUTPUTS,
    CF_SPENT_OUTPUTS,
    CF_BALANCE_DELTAS,
    CF_UNDO,
];

/// Separates the address from the height in balance delta keys. Addresses
/// are alphanumeric, so it never occurs inside one.
const DELTA_KEY_SEPARATOR: u8 = 0x00;

#[derive(bincode::Encode, bincode::Decode)]
struct BlockRecord {
    id: String,
    created_at_millis: i64,
}

#[derive(bincode::Encode, bincode::Decode)]
struct OutputRecord {
    address: String,
    /// Exact decimal text.
    amount: String,
    block_height: u64,
}

#[derive(bincode::Encode, bincode::Decode)]
struct SpentRecord {
    spent_at_height: u64,
    spent_by_transaction_id: String,
}

/// Every key written by one block, so rollback can delete them without
/// scanning whole column families.
#[derive(bincode::Encode, bincode::Decode, Default)]
struct BlockUndo {
    block_id: String,
    transactions: Vec<String>,
    outputs: Vec<(String, u64)>,
    spent_outputs: Vec<(String, u64)>,
    delta_addresses: Vec<String>,
}

fn storage_err(e: impl ToString) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn violation(msg: String) -> LedgerError {
    LedgerError::Storage(format!("constraint violation: {msg}"))
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, LedgerError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, LedgerError> {
    let (value, _) =
        bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(storage_err)?;
    Ok(value)
}

fn decode_height(bytes: &[u8]) -> Result<u64, LedgerError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Storage("invalid height length".into()))?;
    Ok(u64::from_be_bytes(raw))
}

fn parse_decimal(bytes: &[u8]) -> Result<Decimal, LedgerError> {
    let text = std::str::from_utf8(bytes).map_err(storage_err)?;
    Decimal::from_str(text).map_err(storage_err)
}

/// RocksDB-backed persistent ledger storage.
///
/// Reads go straight to the database and may run concurrently. Appends and
/// rollbacks hold an internal lock so that the constraint check and the
/// batch write form one unit.
pub struct RocksLedgerStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksLedgerStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush().map_err(storage_err)
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, LedgerError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Storage(format!("missing column family: {name}")))
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    /// Encode an outpoint as a bincode `(tx_id, index)` key.
    fn outpoint_key(tx_id: &str, index: u64) -> Result<Vec<u8>, LedgerError> {
        encode(&(tx_id.to_string(), index))
    }

    /// Prefix shared by every delta key of `address`.
    fn delta_prefix(address: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(address.len() + 1);
        prefix.extend_from_slice(address.as_bytes());
        prefix.push(DELTA_KEY_SEPARATOR);
        prefix
    }

    /// Encode a balance delta key: address ‖ 0x00 ‖ height (BE).
    fn delta_key(address: &str, height: u64) -> Vec<u8> {
        let mut key = Self::delta_prefix(address);
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool, LedgerError> {
        let cf = self.cf_handle(cf_name)?;
        Ok(self.db.get_pinned_cf(cf, key).map_err(storage_err)?.is_some())
    }

    /// Check every constraint the append would touch, without writing.
    fn check_constraints(&self, rows: &BlockRows) -> Result<(), LedgerError> {
        let height = rows.block.height;
        if self.exists(CF_BLOCKS, &Self::height_key(height))? {
            return Err(violation(format!("block at height {height} already exists")));
        }
        if self.exists(CF_BLOCK_IDS, rows.block.id.as_bytes())? {
            return Err(violation(format!("block id {} already exists", rows.block.id)));
        }

        let mut new_txs = HashSet::with_capacity(rows.transactions.len());
        for tx in &rows.transactions {
            if tx.block_height != height {
                return Err(violation(format!(
                    "transaction {} references height {}",
                    tx.id, tx.block_height
                )));
            }
            if !new_txs.insert(tx.id.as_str()) || self.exists(CF_TRANSACTIONS, tx.id.as_bytes())? {
                return Err(violation(format!("transaction {} already exists", tx.id)));
            }
        }

        let mut new_outputs = HashSet::with_capacity(rows.outputs.len());
        for output in &rows.outputs {
            let key = output.outpoint();
            if !new_txs.contains(output.tx_id.as_str()) {
                return Err(violation(format!("output {key} references unknown transaction")));
            }
            if !new_outputs.insert(key.clone())
                || self.exists(CF_OUTPUTS, &Self::outpoint_key(&key.tx_id, key.index)?)?
            {
                return Err(violation(format!("output {key} already exists")));
            }
        }

        let mut new_spent = HashSet::with_capacity(rows.spent_outputs.len());
        for spent in &rows.spent_outputs {
            let key = spent.outpoint();
            let encoded = Self::outpoint_key(&key.tx_id, key.index)?;
            if !self.exists(CF_OUTPUTS, &encoded)? {
                return Err(violation(format!("spent output {key} references unknown output")));
            }
            if !new_txs.contains(spent.spent_by_transaction_id.as_str()) {
                return Err(violation(format!(
                    "spent output {key} references unknown transaction {}",
                    spent.spent_by_transaction_id
                )));
            }
            if !new_spent.insert(key.clone()) || self.exists(CF_SPENT_OUTPUTS, &encoded)? {
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

    /// Heights of every committed block above `height`, ascending.
    fn heights_above(&self, height: u64) -> Result<Vec<u64>, LedgerError> {
        let Some(first) = height.checked_add(1) else {
            return Ok(Vec::new());
        };
        let cf = self.cf_handle(CF_BLOCKS)?;
        let start = Self::height_key(first);
        let mut heights = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, _) = item.map_err(storage_err)?;
            heights.push(decode_height(&key)?);
        }
        Ok(heights)
    }
}

impl LedgerStore for RocksLedgerStore {
    fn append_block(&self, rows: &BlockRows) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock();
        self.check_constraints(rows)?;

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_block_ids = self.cf_handle(CF_BLOCK_IDS)?;
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_outputs = self.cf_handle(CF_OUTPUTS)?;
        let cf_spent = self.cf_handle(CF_SPENT_OUTPUTS)?;
        let cf_deltas = self.cf_handle(CF_BALANCE_DELTAS)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;

        let height = rows.block.height;
        let height_key = Self::height_key(height);
        let mut batch = WriteBatch::default();
        let mut undo = BlockUndo {
            block_id: rows.block.id.clone(),
            ..BlockUndo::default()
        };

        let record = BlockRecord {
            id: rows.block.id.clone(),
            created_at_millis: rows.block.created_at.timestamp_millis(),
        };
        batch.put_cf(cf_blocks, height_key, encode(&record)?);
        batch.put_cf(cf_block_ids, rows.block.id.as_bytes(), height_key);

        for tx in &rows.transactions {
            batch.put_cf(cf_txs, tx.id.as_bytes(), height_key);
            undo.transactions.push(tx.id.clone());
        }

        for output in &rows.outputs {
            let record = OutputRecord {
                address: output.address.clone(),
                amount: output.amount.to_string(),
                block_height: output.block_height,
            };
            batch.put_cf(
                cf_outputs,
                Self::outpoint_key(&output.tx_id, output.index)?,
                encode(&record)?,
            );
            undo.outputs.push((output.tx_id.clone(), output.index));
        }

        for spent in &rows.spent_outputs {
            let record = SpentRecord {
                spent_at_height: spent.spent_at_height,
                spent_by_transaction_id: spent.spent_by_transaction_id.clone(),
            };
            batch.put_cf(
                cf_spent,
                Self::outpoint_key(&spent.tx_id, spent.index)?,
                encode(&record)?,
            );
            undo.spent_outputs.push((spent.tx_id.clone(), spent.index));
        }

        for delta in &rows.balance_deltas {
            batch.put_cf(
                cf_deltas,
                Self::delta_key(&delta.address, delta.block_height),
                delta.balance_delta.to_string().as_bytes(),
            );
            undo.delta_addresses.push(delta.address.clone());
        }

        batch.put_cf(cf_undo, height_key, encode(&undo)?);

        self.db.write(batch).map_err(storage_err)?;

        tracing::debug!(
            height,
            transactions = rows.transactions.len(),
            outputs = rows.outputs.len(),
            spent_outputs = rows.spent_outputs.len(),
            "wrote block batch"
        );
        Ok(())
    }

    fn get_block(&self, height: u64) -> Result<Option<BlockRow>, LedgerError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self
            .db
            .get_cf(cf, Self::height_key(height))
            .map_err(storage_err)?
        {
            Some(data) => {
                let record: BlockRecord = decode(&data)?;
                let created_at = DateTime::<Utc>::from_timestamp_millis(record.created_at_millis)
                    .ok_or_else(|| LedgerError::Storage("invalid block timestamp".into()))?;
                Ok(Some(BlockRow {
                    id: record.id,
                    height,
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    fn highest_height(&self) -> Result<Option<u64>, LedgerError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item.map_err(storage_err)?;
                Ok(Some(decode_height(&key)?))
            }
            None => Ok(None),
        }
    }

    fn get_transactions_by_id(&self, ids: &[&str]) -> Result<Vec<TransactionRow>, LedgerError> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let unique: HashSet<&str> = ids.iter().copied().collect();
        let mut rows = Vec::new();
        for id in unique {
            if let Some(data) = self.db.get_cf(cf, id.as_bytes()).map_err(storage_err)? {
                rows.push(TransactionRow {
                    id: id.to_string(),
                    block_height: decode_height(&data)?,
                });
            }
        }
        Ok(rows)
    }

    fn get_outputs_by_keys(&self, keys: &[OutPoint]) -> Result<Vec<OutputRow>, LedgerError> {
        let cf = self.cf_handle(CF_OUTPUTS)?;
        let unique: HashSet<&OutPoint> = keys.iter().collect();
        let mut rows = Vec::new();
        for key in unique {
            let encoded = Self::outpoint_key(&key.tx_id, key.index)?;
            if let Some(data) = self.db.get_cf(cf, &encoded).map_err(storage_err)? {
                let record: OutputRecord = decode(&data)?;
                rows.push(OutputRow {
                    tx_id: key.tx_id.clone(),
                    index: key.index,
                    address: record.address,
                    amount: parse_decimal(record.amount.as_bytes())?,
                    block_height: record.block_height,
                });
            }
        }
        Ok(rows)
    }

    fn get_spent_outputs_by_keys(
        &self,
        keys: &[OutPoint],
    ) -> Result<Vec<SpentOutputRow>, LedgerError> {
        let cf = self.cf_handle(CF_SPENT_OUTPUTS)?;
        let unique: HashSet<&OutPoint> = keys.iter().collect();
        let mut rows = Vec::new();
        for key in unique {
            let encoded = Self::outpoint_key(&key.tx_id, key.index)?;
            if let Some(data) = self.db.get_cf(cf, &encoded).map_err(storage_err)? {
                let record: SpentRecord = decode(&data)?;
                rows.push(SpentOutputRow {
                    tx_id: key.tx_id.clone(),
                    index: key.index,
                    spent_at_height: record.spent_at_height,
                    spent_by_transaction_id: record.spent_by_transaction_id,
                });
            }
        }
        Ok(rows)
    }

    fn get_balance(&self, address: &str) -> Result<Decimal, LedgerError> {
        let cf = self.cf_handle(CF_BALANCE_DELTAS)?;
        let prefix = Self::delta_prefix(address);
        let mut balance = Decimal::ZERO;

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(storage_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            balance = balance
                .checked_add(parse_decimal(&value)?)
                .ok_or_else(|| LedgerError::AmountOverflow(format!("balance of address {address}")))?;
        }
        Ok(balance)
    }

    fn delete_blocks_above(&self, height: u64) -> Result<RollbackSummary, LedgerError> {
        let _guard = self.write_lock.lock();

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_block_ids = self.cf_handle(CF_BLOCK_IDS)?;
        let cf_txs = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_outputs = self.cf_handle(CF_OUTPUTS)?;
        let cf_spent = self.cf_handle(CF_SPENT_OUTPUTS)?;
        let cf_deltas = self.cf_handle(CF_BALANCE_DELTAS)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;

        let mut summary = RollbackSummary::default();
        let mut batch = WriteBatch::default();

        for removed in self.heights_above(height)? {
            let height_key = Self::height_key(removed);
            let undo_bytes = self
                .db
                .get_cf(cf_undo, height_key)
                .map_err(storage_err)?
                .ok_or_else(|| LedgerError::Storage(format!("missing undo data for height {removed}")))?;
            let undo: BlockUndo = decode(&undo_bytes)?;

            // Dependents first: spend markers, outputs, deltas, transactions, block.
            for (tx_id, index) in &undo.spent_outputs {
                batch.delete_cf(cf_spent, Self::outpoint_key(tx_id, *index)?);
            }
            for (tx_id, index) in &undo.outputs {
                batch.delete_cf(cf_outputs, Self::outpoint_key(tx_id, *index)?);
            }
            for address in &undo.delta_addresses {
                batch.delete_cf(cf_deltas, Self::delta_key(address, removed));
            }
            for tx_id in &undo.transactions {
                batch.delete_cf(cf_txs, tx_id.as_bytes());
            }
            batch.delete_cf(cf_block_ids, undo.block_id.as_bytes());
            batch.delete_cf(cf_blocks, height_key);
            batch.delete_cf(cf_undo, height_key);

            summary.blocks_removed += 1;
            summary.transactions_removed += undo.transactions.len();
            summary.outputs_removed += undo.outputs.len();
            summary.spent_outputs_removed += undo.spent_outputs.len();
            summary.balance_deltas_removed += undo.delta_addresses.len();
        }

        if summary.blocks_removed > 0 {
            self.db.write(batch).map_err(storage_err)?;
            tracing::debug!(height, blocks = summary.blocks_removed, "deleted blocks");
        }
        Ok(summary)
    }
}
