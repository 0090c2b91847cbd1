//! Ledger lifecycle scenarios run against both store implementations.
//!
//! - A: genesis coinbase credits its outputs
//! - B: a spend moves value, and re-spending the same output fails
//! - C: rollback restores balances and spendability
//! - D: a block with a forged id is rejected without writing anything

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ledger_core::error::LedgerError;
use ledger_core::service::CoinbasePolicy;
use ledger_core::store::LedgerStore;
use ledger_core::types::OutPoint;
use ledger_tests::helpers::*;

// ---------------------------------------------------------------------------
// Scenario bodies, generic over the store
// ---------------------------------------------------------------------------

fn scenario_a<S: LedgerStore>(ledger: &Ledger<S>) {
    ledger.blocks.create_block(&genesis_block()).unwrap();
    assert_eq!(ledger.balance("1"), dec!(50));
    assert_eq!(ledger.balance("2"), dec!(25));
    assert_eq!(ledger.height(), Some(1));
}

fn scenario_b<S: LedgerStore>(ledger: &Ledger<S>) {
    ledger.blocks.create_block(&spend_t1_0(2, "t2")).unwrap();
    assert_eq!(ledger.balance("1"), Decimal::ZERO);
    assert_eq!(ledger.balance("2"), dec!(25));
    assert_eq!(ledger.balance("3"), dec!(25));
    assert_eq!(ledger.balance("4"), dec!(25));

    assert_eq!(
        ledger.blocks.create_block(&spend_t1_0(3, "t3")),
        Err(LedgerError::AlreadySpent(vec![("t1".into(), 0)]))
    );
    assert_eq!(ledger.height(), Some(2));
}

fn scenario_c<S: LedgerStore>(ledger: &Ledger<S>) {
    ledger.blocks.rollback_block(1).unwrap();
    assert_eq!(ledger.balance("3"), Decimal::ZERO);
    assert_eq!(ledger.balance("4"), Decimal::ZERO);
    assert_eq!(ledger.balance("1"), dec!(50));
    assert_eq!(ledger.height(), Some(1));
    assert!(ledger
        .store
        .get_spent_outputs_by_keys(&[OutPoint::new("t1", 0)])
        .unwrap()
        .is_empty());

    // Spendable again, even under a different transaction id.
    ledger.blocks.create_block(&spend_t1_0(2, "t9")).unwrap();
    assert_eq!(ledger.balance("3"), dec!(25));
}

fn scenario_d<S: LedgerStore>(ledger: &Ledger<S>) {
    let mut forged = genesis_block();
    forged.id = "f".repeat(64);
    assert!(matches!(
        ledger.blocks.create_block(&forged),
        Err(LedgerError::InvalidBlockId { .. })
    ));
    assert_eq!(ledger.height(), None);
    assert!(ledger.store.get_transactions_by_id(&["t1"]).unwrap().is_empty());
    assert!(ledger
        .store
        .get_outputs_by_keys(&[OutPoint::new("t1", 0), OutPoint::new("t1", 1)])
        .unwrap()
        .is_empty());
    assert_eq!(ledger.balance("1"), Decimal::ZERO);
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[test]
fn memory_scenarios_a_b_c() {
    let ledger = Ledger::memory();
    scenario_a(&ledger);
    scenario_b(&ledger);
    scenario_c(&ledger);
}

#[test]
fn memory_scenario_d() {
    let ledger = Ledger::memory();
    scenario_d(&ledger);
    assert_eq!(ledger.store.block_count(), 0);
    assert_eq!(ledger.store.output_count(), 0);
    assert_eq!(ledger.store.spent_output_count(), 0);
    assert_eq!(ledger.store.balance_delta_count(), 0);
}

// ---------------------------------------------------------------------------
// RocksDB store
// ---------------------------------------------------------------------------

#[test]
fn rocks_scenarios_a_b_c() {
    let ledger = Ledger::rocks();
    scenario_a(&ledger);
    scenario_b(&ledger);
    scenario_c(&ledger);
}

#[test]
fn rocks_scenario_d() {
    scenario_d(&Ledger::rocks());
}

// ---------------------------------------------------------------------------
// Edge cases
// ---------------------------------------------------------------------------

#[test]
fn multi_block_rollback_leaves_untouched_addresses_alone() {
    let ledger = Ledger::memory();
    ledger.blocks.create_block(&genesis_block()).unwrap();
    ledger.blocks.create_block(&spend_t1_0(2, "t2")).unwrap();
    let b3 = make_block(3, vec![make_tx("t3", &[("t2", 0)], &[("5", dec!(25))])]);
    ledger.blocks.create_block(&b3).unwrap();
    assert_eq!(ledger.balance("3"), Decimal::ZERO);
    assert_eq!(ledger.balance("5"), dec!(25));

    let summary = ledger.blocks.rollback_block(1).unwrap();
    assert_eq!(summary.blocks_removed, 2);
    assert_eq!(summary.transactions_removed, 2);
    assert_eq!(summary.spent_outputs_removed, 2);

    // "2" never appeared above height 1.
    assert_eq!(ledger.balance("2"), dec!(25));
    assert_eq!(ledger.balance("1"), dec!(50));
    assert_eq!(ledger.balance("5"), Decimal::ZERO);
}

#[test]
fn rollback_to_intermediate_height_keeps_lower_blocks() {
    let ledger = Ledger::rocks();
    ledger.blocks.create_block(&genesis_block()).unwrap();
    ledger.blocks.create_block(&spend_t1_0(2, "t2")).unwrap();
    let b3 = make_block(3, vec![make_tx("t3", &[("t2", 0)], &[("5", dec!(25))])]);
    ledger.blocks.create_block(&b3).unwrap();

    ledger.blocks.rollback_block(2).unwrap();
    assert_eq!(ledger.height(), Some(2));
    assert_eq!(ledger.balance("3"), dec!(25));
    assert_eq!(ledger.balance("5"), Decimal::ZERO);
}

#[test]
fn rollback_to_unknown_height_fails() {
    let ledger = Ledger::memory();
    assert_eq!(ledger.blocks.rollback_block(1), Err(LedgerError::BlockNotFound(1)));
}

#[test]
fn height_gaps_are_rejected() {
    let ledger = Ledger::memory();
    assert_eq!(
        ledger.blocks.create_block(&spend_t1_0(2, "t2")),
        Err(LedgerError::InvalidHeight { expected: 1, got: 2 })
    );
    ledger.blocks.create_block(&genesis_block()).unwrap();
    assert_eq!(
        ledger.blocks.create_block(&spend_t1_0(5, "t2")),
        Err(LedgerError::InvalidHeight { expected: 2, got: 5 })
    );
}

#[test]
fn resubmitting_a_transaction_id_fails() {
    let ledger = Ledger::memory();
    ledger.blocks.create_block(&genesis_block()).unwrap();
    let again = make_block(2, vec![make_tx("t1", &[], &[("9", dec!(1))])]);
    assert_eq!(
        ledger.blocks.create_block(&again),
        Err(LedgerError::TransactionAlreadyExists(vec!["t1".into()]))
    );
}

#[test]
fn genesis_only_policy_blocks_later_minting() {
    let ledger = Ledger::memory_with_policy(CoinbasePolicy::GenesisOnly);
    ledger.blocks.create_block(&genesis_block()).unwrap();
    let mint = make_block(2, vec![make_tx("m", &[], &[("9", dec!(1))])]);
    assert!(matches!(
        ledger.blocks.create_block(&mint),
        Err(LedgerError::CoinbaseNotAllowed { height: 2, .. })
    ));
    ledger.blocks.create_block(&spend_t1_0(2, "t2")).unwrap();
}
