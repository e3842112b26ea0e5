//! Block header and block encoding

use super::double_sha256;
use super::transaction::{read_transaction, write_transaction};
use super::varint::{varint_size, write_varint, Reader};
use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Encoded header size.
pub const HEADER_SIZE: usize = 80;

pub fn serialize_header(header: &BlockHeader) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes[0..4].copy_from_slice(&header.version.to_le_bytes());
    bytes[4..36].copy_from_slice(&header.prev_block_hash);
    bytes[36..68].copy_from_slice(&header.merkle_root);
    bytes[68..72].copy_from_slice(&header.timestamp.to_le_bytes());
    bytes[72..76].copy_from_slice(&header.bits.to_le_bytes());
    bytes[76..80].copy_from_slice(&header.nonce.to_le_bytes());
    bytes
}

pub fn read_header(reader: &mut Reader<'_>) -> Result<BlockHeader> {
    Ok(BlockHeader {
        version: reader.read_u32()?,
        prev_block_hash: reader.read_array()?,
        merkle_root: reader.read_array()?,
        timestamp: reader.read_u32()?,
        bits: reader.read_u32()?,
        nonce: reader.read_u32()?,
    })
}

pub fn deserialize_header(bytes: &[u8]) -> Result<BlockHeader> {
    if bytes.len() != HEADER_SIZE {
        return Err(ConsensusError::Serialization(format!(
            "header must be {HEADER_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    read_header(&mut Reader::new(bytes))
}

/// Block hash (internal byte order).
pub fn header_hash(header: &BlockHeader) -> Hash {
    double_sha256(&serialize_header(header))
}

pub fn serialize_block(block: &Block, with_witness: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(serialized_size(block, with_witness));
    out.extend_from_slice(&serialize_header(&block.header));
    write_varint(&mut out, block.transactions().len() as u64);
    for tx in block.transactions() {
        write_transaction(&mut out, tx, with_witness);
    }
    out
}

pub fn serialized_size(block: &Block, with_witness: bool) -> usize {
    HEADER_SIZE
        + varint_size(block.transactions().len() as u64)
        + block
            .transactions()
            .iter()
            .map(|tx| super::transaction::serialized_size(tx, with_witness))
            .sum::<usize>()
}

pub fn deserialize_block(bytes: &[u8]) -> Result<Block> {
    let mut reader = Reader::new(bytes);
    let header = read_header(&mut reader)?;
    let count = reader.read_length()?;
    let mut transactions = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        transactions.push(read_transaction(&mut reader)?);
    }
    if !reader.is_exhausted() {
        return Err(ConsensusError::Serialization(
            "trailing bytes after block".to_string(),
        ));
    }
    Ok(Block::new(header, transactions))
}
