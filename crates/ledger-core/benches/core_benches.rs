//! Criterion benchmarks for ledger-core hot paths.
//!
//! Covers: block-id hashing, balance-delta aggregation, request decoding,
//! and end-to-end block creation against the in-memory store.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

use ledger_core::hash::compute_block_id;
use ledger_core::processor::{BalanceDeltas, TransactionProcessor};
use ledger_core::service::BlockService;
use ledger_core::store::MemoryLedgerStore;
use ledger_core::types::{BlockRequest, OutPoint, OutputRequest, OutputRow, TransactionRequest};

fn make_tx_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("tx{i}")).collect()
}

/// `n` outputs spread over 16 addresses.
fn make_outputs(n: usize) -> Vec<OutputRow> {
    (0..n)
        .map(|i| OutputRow {
            tx_id: format!("tx{i}"),
            index: 0,
            address: format!("addr{}", i % 16),
            amount: Decimal::new(i as i64 * 125, 2),
            block_height: 1,
        })
        .collect()
}

/// Genesis block minting one output per transaction.
fn genesis_request(n: usize) -> BlockRequest {
    let transactions: Vec<TransactionRequest> = make_tx_ids(n)
        .into_iter()
        .map(|id| TransactionRequest {
            id,
            inputs: vec![],
            outputs: vec![OutputRequest {
                address: "miner".into(),
                value: Decimal::new(5_000, 2),
            }],
        })
        .collect();
    BlockRequest {
        height: 1,
        id: compute_block_id(1, transactions.iter().map(|t| t.id.as_str())),
        transactions,
    }
}

/// Block at height 2 spending every genesis output.
fn spend_request(n: usize) -> BlockRequest {
    let transactions: Vec<TransactionRequest> = make_tx_ids(n)
        .into_iter()
        .map(|id| TransactionRequest {
            inputs: vec![OutPoint::new(id.clone(), 0)],
            id: format!("s{id}"),
            outputs: vec![OutputRequest {
                address: "shop".into(),
                value: Decimal::new(5_000, 2),
            }],
        })
        .collect();
    BlockRequest {
        height: 2,
        id: compute_block_id(2, transactions.iter().map(|t| t.id.as_str())),
        transactions,
    }
}

fn bench_block_id(c: &mut Criterion) {
    let ids_10 = make_tx_ids(10);
    let ids_1000 = make_tx_ids(1000);

    c.bench_function("block_id_10_txids", |b| {
        b.iter(|| compute_block_id(black_box(7), ids_10.iter().map(String::as_str)))
    });

    c.bench_function("block_id_1000_txids", |b| {
        b.iter(|| compute_block_id(black_box(7), ids_1000.iter().map(String::as_str)))
    });
}

fn bench_balance_deltas(c: &mut Criterion) {
    let processor = TransactionProcessor::new();
    let consumed = make_outputs(500);
    let produced = make_outputs(1000);

    c.bench_function("compute_balance_deltas_1500_outputs", |b| {
        b.iter(|| processor.compute_balance_deltas(black_box(&consumed), black_box(&produced)))
    });

    let left = processor.compute_balance_deltas(&consumed, &[]).expect("deltas");
    let right = processor.compute_balance_deltas(&[], &produced).expect("deltas");
    c.bench_function("merge_balance_deltas", |b| {
        b.iter(|| {
            let mut merged: BalanceDeltas = left.clone();
            merged.merge(black_box(right.clone())).expect("merge");
            merged
        })
    });
}

fn bench_request_decode(c: &mut Criterion) {
    let json = serde_json::to_string(&spend_request(100)).expect("encode");

    c.bench_function("decode_block_request_100_txs", |b| {
        b.iter(|| serde_json::from_str::<BlockRequest>(black_box(&json)).expect("decode"))
    });
}

fn bench_create_block(c: &mut Criterion) {
    let genesis = genesis_request(200);
    let spend = spend_request(200);

    c.bench_function("create_block_200_spends", |b| {
        b.iter_with_setup(
            || {
                let service = BlockService::new(Arc::new(MemoryLedgerStore::new()));
                service.create_block(&genesis).expect("genesis");
                service
            },
            |service| service.create_block(black_box(&spend)).expect("spend"),
        )
    });
}

criterion_group!(
    benches,
    bench_block_id,
    bench_balance_deltas,
    bench_request_decode,
    bench_create_block,
);
criterion_main!(benches);
