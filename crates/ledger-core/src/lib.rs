//! # ledger-core
//! Types, validation and block processing for a UTXO ledger.
//!
//! A block is accepted only if it extends the tip by one, carries the id
//! derived from its height and transaction ids, and every transaction spends
//! existing unspent outputs whose total equals its declared outputs exactly.
//! Accepted blocks are persisted through a [`store::LedgerStore`] in one
//! atomic write; rollback removes every row above a given height.

pub mod error;
pub mod hash;
pub mod processor;
pub mod service;
pub mod store;
pub mod types;
pub mod validator;
