//! Content-addressed block ids.
//!
//! A block id is the lowercase-hex SHA-256 of the UTF-8 string formed by the
//! decimal height followed by every transaction id in order, with no
//! separators. Other implementations of the ledger compute the same bytes.

use sha2::{Digest, Sha256};

/// Compute the id of a block at `height` containing `tx_ids` in order.
pub fn compute_block_id<'a, I>(height: u64, tx_ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    hasher.update(height.to_string().as_bytes());
    for id in tx_ids {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}
