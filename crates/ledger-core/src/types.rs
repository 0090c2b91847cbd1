//! Ledger types: block requests as submitted, and the rows persisted per block.
//!
//! All monetary values are [`Decimal`]. Amounts never pass through binary
//! floating point, and comparisons between them are exact.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::hash;

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct OutPoint {
    /// Transaction that produced the output.
    pub tx_id: String,
    /// Position of the output in that transaction's output list.
    pub index: u64,
}

impl OutPoint {
    pub fn new(tx_id: impl Into<String>, index: u64) -> Self {
        Self {
            tx_id: tx_id.into(),
            index,
        }
    }

    /// `(tx_id, index)` pair as carried by error values.
    pub fn to_pair(&self) -> (String, u64) {
        (self.tx_id.clone(), self.index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.tx_id, self.index)
    }
}

// ------------------------------------------------------------------
// Requests
// ------------------------------------------------------------------

/// An input of a submitted transaction.
pub type InputRef = OutPoint;

/// An output declared by a submitted transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutputRequest {
    /// Receiving address.
    pub address: String,
    /// Amount, decoded from the JSON number without rounding.
    #[serde(with = "exact_amount")]
    pub value: Decimal,
}

/// Serde adapter for request amounts. Decoding fails instead of rounding when
/// the JSON number has more digits than a [`Decimal`] can hold.
mod exact_amount {
    use rust_decimal::Decimal;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    pub use rust_decimal::serde::arbitrary_precision::serialize;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let number = serde_json::Number::deserialize(deserializer)?;
        let text = number.to_string();
        super::parse_exact_decimal(&text).ok_or_else(|| {
            D::Error::custom(format!(
                "amount {text} cannot be represented exactly (at most 28 fractional digits and 96-bit precision)"
            ))
        })
    }
}

/// Parse a JSON number literal into a [`Decimal`], or `None` if any digit
/// would be lost.
pub fn parse_exact_decimal(text: &str) -> Option<Decimal> {
    let (mantissa, exponent) = match text.find(['e', 'E']) {
        Some(pos) => (&text[..pos], text[pos + 1..].parse::<i64>().ok()?),
        None => (text, 0),
    };
    let mut value = Decimal::from_str_exact(mantissa).ok()?;
    if value.is_zero() {
        return Some(Decimal::ZERO);
    }
    if exponent < 0 {
        let shift = u32::try_from(exponent.unsigned_abs()).ok()?;
        value.set_scale(value.scale().checked_add(shift)?).ok()?;
    } else {
        for _ in 0..exponent {
            value = value.checked_mul(Decimal::TEN)?;
        }
    }
    Some(value)
}

/// A transaction as submitted inside a block.
///
/// A transaction with no inputs is a coinbase and creates value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransactionRequest {
    pub id: String,
    pub inputs: Vec<InputRef>,
    pub outputs: Vec<OutputRequest>,
}

impl TransactionRequest {
    /// Whether this transaction has no inputs.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Sum of declared output values, or `None` on overflow.
    pub fn total_output_value(&self) -> Option<Decimal> {
        self.outputs
            .iter()
            .try_fold(Decimal::ZERO, |acc, o| acc.checked_add(o.value))
    }
}

/// A block as submitted by a client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockRequest {
    pub height: u64,
    /// Claimed block id; must equal [`hash::compute_block_id`] over
    /// `height` and the transaction ids.
    pub id: String,
    pub transactions: Vec<TransactionRequest>,
}

impl BlockRequest {
    /// Transaction ids in submission order.
    pub fn transaction_ids(&self) -> Vec<&str> {
        self.transactions.iter().map(|tx| tx.id.as_str()).collect()
    }

    /// The id this block must carry.
    pub fn computed_id(&self) -> String {
        hash::compute_block_id(self.height, self.transactions.iter().map(|tx| tx.id.as_str()))
    }

    /// Check request shape: height at least 1, alphanumeric transaction ids
    /// and addresses, non-negative output values.
    ///
    /// Runs once at the request boundary. Ledger invariants (id hash,
    /// sequencing, balances) are checked by the validator, not here.
    pub fn validate_shape(&self) -> Result<(), LedgerError> {
        if self.height == 0 {
            return Err(LedgerError::InvalidRequest("height must be at least 1".into()));
        }
        for tx in &self.transactions {
            if !is_alphanumeric_id(&tx.id) {
                return Err(LedgerError::InvalidRequest(format!(
                    "transaction id {:?} must match ^[A-Za-z0-9]+$",
                    tx.id
                )));
            }
            for input in &tx.inputs {
                if input.tx_id.is_empty() {
                    return Err(LedgerError::InvalidRequest(format!(
                        "transaction {} has an input with an empty txId",
                        tx.id
                    )));
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                if !is_alphanumeric_id(&output.address) {
                    return Err(LedgerError::InvalidRequest(format!(
                        "address {:?} of output {index} in transaction {} must match ^[A-Za-z0-9]+$",
                        output.address, tx.id
                    )));
                }
                if output.value < Decimal::ZERO {
                    return Err(LedgerError::InvalidRequest(format!(
                        "value of output {index} in transaction {} is negative",
                        tx.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Non-empty and ASCII alphanumeric only.
pub fn is_alphanumeric_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

// ------------------------------------------------------------------
// Persisted rows
// ------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockRow {
    pub id: String,
    pub height: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub id: String,
    pub block_height: u64,
}

/// A produced output. Unspent until a [`SpentOutputRow`] with the same key exists.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputRow {
    pub tx_id: String,
    pub index: u64,
    pub address: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub block_height: u64,
}

impl OutputRow {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_id.clone(), self.index)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpentOutputRow {
    pub tx_id: String,
    pub index: u64,
    pub spent_at_height: u64,
    pub spent_by_transaction_id: String,
}

impl SpentOutputRow {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_id.clone(), self.index)
    }
}

/// Signed change to an address's holdings contributed by one block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDeltaRow {
    pub address: String,
    pub block_height: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance_delta: Decimal,
}

/// Every row a committed block adds, written in one atomic append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRows {
    pub block: BlockRow,
    pub transactions: Vec<TransactionRow>,
    pub outputs: Vec<OutputRow>,
    pub spent_outputs: Vec<SpentOutputRow>,
    pub balance_deltas: Vec<BalanceDeltaRow>,
}

impl BlockRows {
    /// Rows for `block` with no transactions yet.
    pub fn new(block: BlockRow) -> Self {
        Self {
            block,
            transactions: Vec::new(),
            outputs: Vec::new(),
            spent_outputs: Vec::new(),
            balance_deltas: Vec::new(),
        }
    }
}

/// Row counts removed by a rollback.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSummary {
    pub blocks_removed: usize,
    pub transactions_removed: usize,
    pub outputs_removed: usize,
    pub spent_outputs_removed: usize,
    pub balance_deltas_removed: usize,
}
