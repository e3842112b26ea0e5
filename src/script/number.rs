//! Script numbers
//!
//! Little-endian sign-magnitude: the high bit of the last byte is the sign,
//! zero is the empty vector, and `[0x80]` is negative zero. Operands are
//! limited to 4 bytes (5 for lock time opcodes); results may be wider and are
//! rejected only when used as an operand again.

use crate::error::ScriptError;

/// Default operand width.
pub const MAX_NUMBER_SIZE: usize = 4;

/// Operand width for CHECKLOCKTIMEVERIFY and CHECKSEQUENCEVERIFY.
pub const MAX_LOCK_TIME_NUMBER_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Number(i64);

impl Number {
    pub fn new(value: i64) -> Self {
        Number(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Decode an operand no wider than `max_size` bytes.
    pub fn from_bytes(bytes: &[u8], max_size: usize) -> Result<Self, ScriptError> {
        if bytes.len() > max_size {
            return Err(ScriptError::NumberOverflow);
        }
        let Some((&last, _)) = bytes.split_last() else {
            return Ok(Number(0));
        };

        let mut magnitude: i64 = 0;
        for (i, byte) in bytes.iter().enumerate() {
            magnitude |= (*byte as i64) << (8 * i);
        }

        if last & 0x80 != 0 {
            let sign = 0x80i64 << (8 * (bytes.len() - 1));
            Ok(Number(-(magnitude & !sign)))
        } else {
            Ok(Number(magnitude))
        }
    }

    /// Minimal encoding.
    pub fn to_bytes(self) -> Vec<u8> {
        if self.0 == 0 {
            return Vec::new();
        }

        let negative = self.0 < 0;
        let mut magnitude = self.0.unsigned_abs();
        let mut bytes = Vec::with_capacity(9);
        while magnitude > 0 {
            bytes.push((magnitude & 0xff) as u8);
            magnitude >>= 8;
        }

        // Make room for the sign bit when the top byte already uses it.
        match bytes.last_mut() {
            Some(last) if *last & 0x80 != 0 => bytes.push(if negative { 0x80 } else { 0x00 }),
            Some(last) if negative => *last |= 0x80,
            _ => {}
        }
        bytes
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number(value)
    }
}

/// Truthiness of a stack element: false when every byte is zero, allowing a
/// trailing sign bit (negative zero).
pub fn is_true(bytes: &[u8]) -> bool {
    match bytes.split_last() {
        None => false,
        Some((&last, rest)) => rest.iter().any(|&b| b != 0) || (last != 0 && last != 0x80),
    }
}

pub fn from_bool(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}
