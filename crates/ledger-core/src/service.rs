//! Block orchestration and balance queries.
//!
//! [`BlockService`] runs the validator and processor over a submitted block
//! and commits every resulting row in one atomic store write. It owns the
//! single write gate of the ledger: block creation and rollback never overlap.
//! [`BalanceService`] is read-only and never takes the gate.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::processor::{BalanceDeltas, TransactionProcessor};
use crate::store::LedgerStore;
use crate::types::{
    is_alphanumeric_id, BlockRequest, BlockRow, BlockRows, OutPoint, RollbackSummary,
};
use crate::validator::BlockValidator;

/// Which heights may carry input-less (coinbase) transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinbasePolicy {
    /// Coinbase transactions are accepted in every block.
    #[default]
    AnyHeight,
    /// Only the genesis block may mint value.
    GenesisOnly,
}

impl CoinbasePolicy {
    fn allows(self, height: u64) -> bool {
        match self {
            Self::AnyHeight => true,
            Self::GenesisOnly => height == 1,
        }
    }
}

/// Validates, processes and commits blocks; rolls the ledger back.
pub struct BlockService<S> {
    store: Arc<S>,
    validator: BlockValidator<S>,
    processor: TransactionProcessor,
    coinbase_policy: CoinbasePolicy,
    write_gate: Mutex<()>,
}

impl<S: LedgerStore> BlockService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, CoinbasePolicy::default())
    }

    pub fn with_policy(store: Arc<S>, coinbase_policy: CoinbasePolicy) -> Self {
        Self {
            validator: BlockValidator::new(Arc::clone(&store)),
            store,
            processor: TransactionProcessor::new(),
            coinbase_policy,
            write_gate: Mutex::new(()),
        }
    }

    pub fn coinbase_policy(&self) -> CoinbasePolicy {
        self.coinbase_policy
    }

    /// Validate `request` against the committed ledger and persist it.
    ///
    /// Either every row of the block is written or none is; the first violated
    /// invariant aborts the whole block.
    pub fn create_block(&self, request: &BlockRequest) -> Result<BlockRow, LedgerError> {
        let _gate = self.write_gate.lock();

        let rows = self.build_block_rows(request).inspect_err(|e| {
            warn!(height = request.height, id = %request.id, "rejected block: {e}");
        })?;
        self.store.append_block(&rows)?;

        info!(
            height = rows.block.height,
            id = %rows.block.id,
            transactions = rows.transactions.len(),
            "committed block"
        );
        Ok(rows.block)
    }

    /// Remove every block above `height`, leaving the ledger exactly as it was
    /// right after `height` committed.
    pub fn rollback_block(&self, height: u64) -> Result<RollbackSummary, LedgerError> {
        let _gate = self.write_gate.lock();

        if self.store.get_block(height)?.is_none() {
            return Err(LedgerError::BlockNotFound(height));
        }
        let summary = self.store.delete_blocks_above(height)?;

        info!(
            height,
            blocks = summary.blocks_removed,
            transactions = summary.transactions_removed,
            outputs = summary.outputs_removed,
            spent_outputs = summary.spent_outputs_removed,
            balance_deltas = summary.balance_deltas_removed,
            "rolled back ledger"
        );
        Ok(summary)
    }

    pub fn get_block(&self, height: u64) -> Result<Option<BlockRow>, LedgerError> {
        self.store.get_block(height)
    }

    pub fn highest_height(&self) -> Result<Option<u64>, LedgerError> {
        self.store.highest_height()
    }

    fn build_block_rows(&self, request: &BlockRequest) -> Result<BlockRows, LedgerError> {
        request.validate_shape()?;
        self.validator.validate_block_identity(request)?;
        self.validator.validate_height_sequencing(request)?;
        self.validator
            .validate_transaction_id_uniqueness(&request.transactions)?;

        let height = request.height;
        let mut rows = BlockRows::new(BlockRow {
            id: request.id.clone(),
            height,
            created_at: Utc::now(),
        });
        let mut deltas = BalanceDeltas::new();
        let mut claimed: HashSet<OutPoint> = HashSet::new();

        for tx in &request.transactions {
            let produced = self.processor.build_output_rows(tx, height);

            if tx.is_coinbase() {
                if !self.coinbase_policy.allows(height) {
                    return Err(LedgerError::CoinbaseNotAllowed {
                        tx_id: tx.id.clone(),
                        height,
                    });
                }
                debug!(tx = %tx.id, outputs = produced.len(), "coinbase transaction");
            } else {
                let consumed = self.validator.validate_output_balance(tx)?;
                self.validator.validate_not_already_spent(&tx.inputs)?;

                let reclaimed: Vec<(String, u64)> = tx
                    .inputs
                    .iter()
                    .filter(|input| !claimed.insert((*input).clone()))
                    .map(OutPoint::to_pair)
                    .collect();
                if !reclaimed.is_empty() {
                    return Err(LedgerError::AlreadySpent(reclaimed));
                }

                rows.spent_outputs
                    .extend(self.processor.build_spent_output_rows(&consumed, height, &tx.id));
                deltas.merge(self.processor.compute_balance_deltas(&consumed, &[])?)?;
                debug!(
                    tx = %tx.id,
                    inputs = consumed.len(),
                    outputs = produced.len(),
                    "processed transaction"
                );
            }

            rows.transactions
                .push(self.processor.build_transaction_row(tx, height));
            rows.outputs.extend(produced);
        }

        deltas.merge(self.processor.compute_balance_deltas(&[], &rows.outputs)?)?;
        rows.balance_deltas = deltas.into_rows(height);
        Ok(rows)
    }
}

/// Address balance lookups.
pub struct BalanceService<S> {
    store: Arc<S>,
}

impl<S: LedgerStore> BalanceService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Sum of every committed delta for `address`; zero if it never appeared.
    pub fn get_address_balance(&self, address: &str) -> Result<Decimal, LedgerError> {
        if address.is_empty() {
            return Err(LedgerError::EmptyAddress);
        }
        if !is_alphanumeric_id(address) {
            return Err(LedgerError::InvalidRequest(format!(
                "address {address:?} must match ^[A-Za-z0-9]+$"
            )));
        }
        self.store.get_balance(address)
    }
}
