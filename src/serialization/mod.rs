//! Bit-exact wire encoding of transactions and blocks
//!
//! Anything that depends on serialized size (weight, size limits) goes through
//! `serialized_size` here rather than an estimate.

pub mod block;
pub mod transaction;
pub mod varint;

use crate::types::Hash;
use bitcoin_hashes::{sha256d, Hash as _};

pub use varint::{encode_varint, varint_size, write_varint, Reader};

/// SHA256(SHA256(data)) in internal byte order.
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}
