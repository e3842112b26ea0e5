//! Compact-size ("varint") integers and a bounds-checked byte reader
//!
//! Encoding rules:
//! - If value < 0xfd: single byte
//! - If value <= 0xffff: 0xfd prefix + 2 bytes (little-endian)
//! - If value <= 0xffffffff: 0xfe prefix + 4 bytes (little-endian)
//! - Otherwise: 0xff prefix + 8 bytes (little-endian)

use crate::error::{ConsensusError, Result};

/// Largest length prefix accepted when decoding.
pub const MAX_SIZE: u64 = 0x0200_0000;

pub fn varint_size(value: u64) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint_size(value));
    write_varint(&mut out, value);
    out
}

/// Reads little-endian values from a byte slice, failing instead of panicking
/// on truncated input.
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.position == self.data.len()
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or_else(|| truncated("byte"))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| truncated("bytes"))?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Canonical compact size; non-minimal encodings are rejected.
    pub fn read_varint(&mut self) -> Result<u64> {
        let value = match self.read_u8()? {
            0xfd => {
                let value = self.read_u16()? as u64;
                if value < 0xfd {
                    return Err(non_canonical());
                }
                value
            }
            0xfe => {
                let value = self.read_u32()? as u64;
                if value <= 0xffff {
                    return Err(non_canonical());
                }
                value
            }
            0xff => {
                let value = self.read_u64()?;
                if value <= 0xffff_ffff {
                    return Err(non_canonical());
                }
                value
            }
            byte => byte as u64,
        };
        Ok(value)
    }

    /// Length-prefixed byte string bounded by [`MAX_SIZE`].
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_length()?;
        Ok(self.read_bytes(length)?.to_vec())
    }

    /// Element count bounded by [`MAX_SIZE`].
    pub fn read_length(&mut self) -> Result<usize> {
        let length = self.read_varint()?;
        if length > MAX_SIZE {
            return Err(ConsensusError::Serialization(format!(
                "length {length} exceeds maximum"
            )));
        }
        Ok(length as usize)
    }
}

fn truncated(what: &str) -> ConsensusError {
    ConsensusError::Serialization(format!("unexpected end of data reading {what}"))
}

fn non_canonical() -> ConsensusError {
    ConsensusError::Serialization("non-canonical compact size".to_string())
}
