//! Script machine
//!
//! Scripts are parsed once into [`Operation`]s that remember their byte range,
//! so signature hashing can work on the exact serialized subscript. A
//! [`program::Program`] holds the stacks for one evaluation and
//! [`interpreter`] runs it.

pub mod interpreter;
pub mod number;
pub mod opcodes;
pub mod program;
pub mod sighash;

use crate::constants::MAX_SCRIPT_ELEMENT_SIZE;
use crate::error::ScriptError;
use opcodes::*;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

pub use interpreter::{execute, verify_input, verify_script};
pub use program::{InputContext, Program, SigVersion};

/// One parsed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub code: u8,
    /// Pushed bytes for push operations, empty otherwise.
    pub data: Vec<u8>,
    /// Byte offset of the opcode within the script.
    pub start: usize,
    /// Byte offset just past the operation.
    pub end: usize,
}

impl Operation {
    pub fn is_push(&self) -> bool {
        is_push(self.code)
    }

    /// Whether the pushed data exceeds the element size limit.
    pub fn is_oversized(&self) -> bool {
        self.data.len() > MAX_SCRIPT_ELEMENT_SIZE
    }
}

/// Read the operation starting at `start`.
pub fn read_operation(bytes: &[u8], start: usize) -> Result<Operation, ScriptError> {
    let code = *bytes.get(start).ok_or(ScriptError::InvalidScript)?;
    let mut cursor = start + 1;

    let length = match code {
        0x01..=OP_PUSHBYTES_75 => code as usize,
        OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
            let width = match code {
                OP_PUSHDATA1 => 1,
                OP_PUSHDATA2 => 2,
                _ => 4,
            };
            let prefix = bytes
                .get(cursor..cursor + width)
                .ok_or(ScriptError::InvalidScript)?;
            cursor += width;
            prefix
                .iter()
                .rev()
                .fold(0usize, |length, byte| (length << 8) | *byte as usize)
        }
        _ => 0,
    };

    let end = cursor
        .checked_add(length)
        .filter(|end| *end <= bytes.len())
        .ok_or(ScriptError::InvalidScript)?;

    Ok(Operation {
        code,
        data: bytes[cursor..end].to_vec(),
        start,
        end,
    })
}

/// Parse a whole script.
pub fn parse(bytes: &[u8]) -> Result<Vec<Operation>, ScriptError> {
    let mut operations = Vec::new();
    let mut position = 0;
    while position < bytes.len() {
        let operation = read_operation(bytes, position)?;
        position = operation.end;
        operations.push(operation);
    }
    Ok(operations)
}

/// Operations up to the first parse failure.
pub fn parse_prefix(bytes: &[u8]) -> Vec<Operation> {
    let mut operations = Vec::new();
    let mut position = 0;
    while position < bytes.len() {
        match read_operation(bytes, position) {
            Ok(operation) => {
                position = operation.end;
                operations.push(operation);
            }
            Err(_) => break,
        }
    }
    operations
}

/// Minimal push encoding of `data`, as a signature appears in a script.
pub fn encode_push(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 5);
    match data.len() {
        length if length < OP_PUSHDATA1 as usize => out.push(length as u8),
        length if length <= 0xff => {
            out.push(OP_PUSHDATA1);
            out.push(length as u8);
        }
        length if length <= 0xffff => {
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(length as u16).to_le_bytes());
        }
        length => {
            out.push(OP_PUSHDATA4);
            out.extend_from_slice(&(length as u32).to_le_bytes());
        }
    }
    out.extend_from_slice(data);
    out
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> Vec<u8> {
    Ripemd160::digest(Sha256::digest(data)).to_vec()
}

/// `HASH160 <20 bytes> EQUAL`
pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Witness version and program of a `<version> <2..=40 bytes>` script.
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if !(4..=42).contains(&script.len()) {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        code @ OP_1..=OP_16 => code - OP_1 + 1,
        _ => return None,
    };
    if script[1] as usize + 2 != script.len() {
        return None;
    }
    Some((version, &script[2..]))
}

/// Only push operations, and fully parsable.
pub fn is_push_only(script: &[u8]) -> bool {
    parse(script)
        .map(|operations| operations.iter().all(Operation::is_push))
        .unwrap_or(false)
}

/// Remove every occurrence of `pattern` that starts on an operation
/// boundary. Bytes after a parse failure are kept verbatim.
pub fn find_and_delete(script: &[u8], pattern: &[u8]) -> Vec<u8> {
    if pattern.is_empty() {
        return script.to_vec();
    }

    let mut result = Vec::with_capacity(script.len());
    let mut position = 0;
    let mut kept = 0;
    loop {
        result.extend_from_slice(&script[kept..position]);
        while script[position..].starts_with(pattern) {
            position += pattern.len();
        }
        kept = position;
        if position >= script.len() {
            break;
        }
        match read_operation(script, position) {
            Ok(operation) => position = operation.end,
            Err(_) => {
                position = script.len();
                result.extend_from_slice(&script[kept..position]);
                kept = position;
                break;
            }
        }
    }
    result.extend_from_slice(&script[kept..]);
    result
}

/// Script code for legacy signature hashing: CODESEPARATORs removed.
pub fn strip_codeseparators(script: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(script.len());
    let mut position = 0;
    for operation in parse_prefix(script) {
        if operation.code != OP_CODESEPARATOR {
            result.extend_from_slice(&script[operation.start..operation.end]);
        }
        position = operation.end;
    }
    result.extend_from_slice(&script[position..]);
    result
}
