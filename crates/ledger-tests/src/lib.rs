//! Integration and property test suite for the UTXO ledger.
//!
//! Tests drive the block service and the HTTP router end to end against both
//! the in-memory and the RocksDB store, and check ledger invariants under
//! randomized inputs.

pub mod helpers;
