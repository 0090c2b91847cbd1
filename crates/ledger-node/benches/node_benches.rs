//! Criterion benchmarks for ledger-node storage operations.
//!
//! Covers: block creation, balance prefix scans and rollback against the
//! RocksDB-backed store.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal_macros::dec;
use tempfile::TempDir;

use ledger_core::hash::compute_block_id;
use ledger_core::service::BlockService;
use ledger_core::store::LedgerStore;
use ledger_core::types::{BlockRequest, OutPoint, OutputRequest, TransactionRequest};

use ledger_node_lib::storage::RocksLedgerStore;

/// Block at `height` with one coinbase paying 50 to `address`.
fn coinbase_block(height: u64, address: &str) -> BlockRequest {
    let tx = TransactionRequest {
        id: format!("cb{height}"),
        inputs: vec![],
        outputs: vec![OutputRequest {
            address: address.into(),
            value: dec!(50),
        }],
    };
    BlockRequest {
        height,
        id: compute_block_id(height, [tx.id.as_str()]),
        transactions: vec![tx],
    }
}

/// Block at `height` spending the coinbase of `height - 1`.
fn spend_block(height: u64) -> BlockRequest {
    let tx = TransactionRequest {
        id: format!("sp{height}"),
        inputs: vec![OutPoint::new(format!("cb{}", height - 1), 0)],
        outputs: vec![
            OutputRequest { address: "bob".into(), value: dec!(20.5) },
            OutputRequest { address: "carol".into(), value: dec!(29.5) },
        ],
    };
    BlockRequest {
        height,
        id: compute_block_id(height, [tx.id.as_str()]),
        transactions: vec![tx],
    }
}

fn open_service() -> (TempDir, Arc<RocksLedgerStore>, BlockService<RocksLedgerStore>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksLedgerStore::open(dir.path()).unwrap());
    let service = BlockService::new(Arc::clone(&store));
    (dir, store, service)
}

fn bench_create_block(c: &mut Criterion) {
    c.bench_function("create_spend_block", |b| {
        b.iter_with_setup(
            || {
                let (dir, store, service) = open_service();
                service.create_block(&coinbase_block(1, "alice")).unwrap();
                (dir, store, service, spend_block(2))
            },
            |(_dir, _store, service, block)| {
                service.create_block(black_box(&block)).unwrap();
            },
        )
    });
}

fn bench_balance_lookup(c: &mut Criterion) {
    // 200 blocks each crediting "alice", plus noise on a neighbouring address.
    let (_dir, store, service) = open_service();
    for h in 1..=200 {
        let address = if h % 2 == 0 { "alice" } else { "alicf" };
        service.create_block(&coinbase_block(h, address)).unwrap();
    }

    c.bench_function("balance_prefix_scan_100_deltas", |b| {
        b.iter(|| store.get_balance(black_box("alice")).unwrap())
    });
}

fn bench_rollback(c: &mut Criterion) {
    c.bench_function("rollback_50_blocks", |b| {
        b.iter_with_setup(
            || {
                let (dir, store, service) = open_service();
                for h in 1..=51 {
                    service.create_block(&coinbase_block(h, "alice")).unwrap();
                }
                (dir, store, service)
            },
            |(_dir, _store, service)| {
                service.rollback_block(black_box(1)).unwrap();
            },
        )
    });
}

criterion_group!(benches, bench_create_block, bench_balance_lookup, bench_rollback);
criterion_main!(benches);
