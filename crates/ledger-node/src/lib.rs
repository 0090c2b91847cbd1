//! # ledger-node
//! Persistent storage, configuration and the HTTP boundary of the ledger.
//!
//! - [`storage::RocksLedgerStore`]: ledger relations backed by RocksDB
//! - [`api`]: axum router exposing block submission, balances and rollback
//! - [`config::NodeConfig`]: node configuration

pub mod api;
pub mod config;
pub mod storage;

pub use api::{router, AppState};
pub use config::NodeConfig;
pub use storage::RocksLedgerStore;
