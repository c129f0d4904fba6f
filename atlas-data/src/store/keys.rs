//! Fixed-width key encoding.
//!
//! Ids are stored as 8-byte big-endian blobs so SQLite's `memcmp` ordering
//! of BLOB keys matches unsigned numeric order.

use super::StoreError;

/// Encode an id as an order-preserving key.
#[expect(
    clippy::big_endian_bytes,
    reason = "big-endian bytes make blob order equal numeric order"
)]
pub(crate) const fn encode(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Decode a key written by [`encode`].
#[expect(
    clippy::big_endian_bytes,
    reason = "big-endian bytes make blob order equal numeric order"
)]
pub(crate) fn decode(table: &'static str, bytes: &[u8]) -> Result<u64, StoreError> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| StoreError::CorruptKey {
        table,
        len: bytes.len(),
    })?;
    Ok(u64::from_be_bytes(array))
}
