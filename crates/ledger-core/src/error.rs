//! Error types for the ledger.
use thiserror::Error;

/// Broad classification of a [`LedgerError`], used by the request boundary
/// to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-caused: the submitted block or query violates an invariant or
    /// references something that does not exist.
    Validation,
    /// Store or connection failure.
    Infrastructure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid block id: expected {expected}, got {got}")] InvalidBlockId { expected: String, got: String },
    #[error("invalid block height: expected {expected}, got {got}")] InvalidHeight { expected: u64, got: u64 },
    #[error("transactions are required for blocks above height 1 (height {height})")] MissingTransactions { height: u64 },
    #[error("duplicate transaction id in block: {0}")] DuplicateTransactionId(String),
    #[error("transactions already exist: {}", .0.join(", "))] TransactionAlreadyExists(Vec<String>),
    #[error("input not found in transaction {tx_id}: {}", format_pairs(.missing))] InputNotFound { tx_id: String, missing: Vec<(String, u64)> },
    #[error("balance mismatch in transaction {tx_id}: inputs {inputs}, outputs {outputs}")] BalanceMismatch { tx_id: String, inputs: String, outputs: String },
    #[error("outputs already spent: {}", format_pairs(.0))] AlreadySpent(Vec<(String, u64)>),
    #[error("block not found at height {0}")] BlockNotFound(u64),
    #[error("address is required")] EmptyAddress,
    #[error("coinbase transaction {tx_id} not allowed at height {height}")] CoinbaseNotAllowed { tx_id: String, height: u64 },
    #[error("amount overflow in {0}")] AmountOverflow(String),
    #[error("invalid request: {0}")] InvalidRequest(String),
    #[error("storage: {0}")] Storage(String),
}

impl LedgerError {
    /// Classify this error for the request boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Validation,
        }
    }

    /// Whether the caller, not the ledger, is at fault.
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Infrastructure
    }
}

fn format_pairs(pairs: &[(String, u64)]) -> String {
    pairs
        .iter()
        .map(|(tx_id, index)| format!("({tx_id}, {index})"))
        .collect::<Vec<_>>()
        .join(", ")
}
