//! Shared test helpers for integration and property tests.

use std::sync::Arc;

use rust_decimal::Decimal;

use ledger_core::hash::compute_block_id;
use ledger_core::service::{BalanceService, BlockService, CoinbasePolicy};
use ledger_core::store::{LedgerStore, MemoryLedgerStore};
use ledger_core::types::{BlockRequest, OutPoint, OutputRequest, TransactionRequest};
use ledger_node_lib::storage::RocksLedgerStore;

/// Build a transaction from `(tx_id, index)` inputs and `(address, value)` outputs.
pub fn make_tx(id: &str, inputs: &[(&str, u64)], outputs: &[(&str, Decimal)]) -> TransactionRequest {
    TransactionRequest {
        id: id.to_string(),
        inputs: inputs
            .iter()
            .map(|(tx_id, index)| OutPoint::new(*tx_id, *index))
            .collect(),
        outputs: outputs
            .iter()
            .map(|(address, value)| OutputRequest {
                address: address.to_string(),
                value: *value,
            })
            .collect(),
    }
}

/// Build a block carrying its correct id.
pub fn make_block(height: u64, transactions: Vec<TransactionRequest>) -> BlockRequest {
    BlockRequest {
        height,
        id: compute_block_id(height, transactions.iter().map(|tx| tx.id.as_str())),
        transactions,
    }
}

/// Genesis block: coinbase "t1" paying 50 to "1" and 25 to "2".
pub fn genesis_block() -> BlockRequest {
    make_block(
        1,
        vec![make_tx(
            "t1",
            &[],
            &[("1", Decimal::from(50)), ("2", Decimal::from(25))],
        )],
    )
}

/// Block at `height` where `tx_id` spends (t1, 0) into 25 for "3" and 25 for "4".
pub fn spend_t1_0(height: u64, tx_id: &str) -> BlockRequest {
    make_block(
        height,
        vec![make_tx(
            tx_id,
            &[("t1", 0)],
            &[("3", Decimal::from(25)), ("4", Decimal::from(25))],
        )],
    )
}

/// A block service and balance service sharing one store.
pub struct Ledger<S> {
    pub store: Arc<S>,
    pub blocks: BlockService<S>,
    pub balances: BalanceService<S>,
    /// Keeps an on-disk store alive for the lifetime of the ledger.
    _dir: Option<tempfile::TempDir>,
}

impl<S: LedgerStore> Ledger<S> {
    fn with_store(store: Arc<S>, policy: CoinbasePolicy, dir: Option<tempfile::TempDir>) -> Self {
        Self {
            blocks: BlockService::with_policy(Arc::clone(&store), policy),
            balances: BalanceService::new(Arc::clone(&store)),
            store,
            _dir: dir,
        }
    }

    /// Balance of `address`; panics on store failure.
    pub fn balance(&self, address: &str) -> Decimal {
        self.balances.get_address_balance(address).unwrap()
    }

    pub fn height(&self) -> Option<u64> {
        self.store.highest_height().unwrap()
    }
}

impl Ledger<MemoryLedgerStore> {
    pub fn memory() -> Self {
        Self::memory_with_policy(CoinbasePolicy::AnyHeight)
    }

    pub fn memory_with_policy(policy: CoinbasePolicy) -> Self {
        Self::with_store(Arc::new(MemoryLedgerStore::new()), policy, None)
    }
}

impl Ledger<RocksLedgerStore> {
    /// Ledger over a RocksDB store in a fresh temporary directory.
    pub fn rocks() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksLedgerStore::open(dir.path().join("ledgerdata")).unwrap();
        Self::with_store(Arc::new(store), CoinbasePolicy::AnyHeight, Some(dir))
    }
}
