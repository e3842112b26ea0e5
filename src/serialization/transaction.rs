//! Transaction encoding, legacy and BIP144 witness formats

use super::double_sha256;
use super::varint::{varint_size, write_varint, Reader};
use crate::error::{ConsensusError, Result};
use crate::types::*;

/// BIP144 marker and flag following the version field.
const WITNESS_MARKER: u8 = 0x00;
const WITNESS_FLAG: u8 = 0x01;

/// Serialize a transaction. Witness data is written only when requested and
/// at least one input carries some.
pub fn serialize_transaction(tx: &Transaction, with_witness: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(serialized_size(tx, with_witness));
    write_transaction(&mut out, tx, with_witness);
    out
}

pub fn write_transaction(out: &mut Vec<u8>, tx: &Transaction, with_witness: bool) {
    let witness = with_witness && tx.has_witness();

    out.extend_from_slice(&tx.version.to_le_bytes());
    if witness {
        out.push(WITNESS_MARKER);
        out.push(WITNESS_FLAG);
    }

    write_varint(out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        out.extend_from_slice(&input.prevout.hash);
        out.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_varint(out, input.script_sig.len() as u64);
        out.extend_from_slice(&input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }

    write_varint(out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        write_varint(out, output.script_pubkey.len() as u64);
        out.extend_from_slice(&output.script_pubkey);
    }

    if witness {
        for input in &tx.inputs {
            write_varint(out, input.witness.len() as u64);
            for element in &input.witness {
                write_varint(out, element.len() as u64);
                out.extend_from_slice(element);
            }
        }
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
}

/// Exact encoded size without allocating.
pub fn serialized_size(tx: &Transaction, with_witness: bool) -> usize {
    let witness = with_witness && tx.has_witness();
    let var_bytes = |bytes: &[u8]| varint_size(bytes.len() as u64) + bytes.len();

    let mut size = 4 + 4;
    size += varint_size(tx.inputs.len() as u64);
    size += tx
        .inputs
        .iter()
        .map(|input| 32 + 4 + var_bytes(&input.script_sig) + 4)
        .sum::<usize>();
    size += varint_size(tx.outputs.len() as u64);
    size += tx
        .outputs
        .iter()
        .map(|output| 8 + var_bytes(&output.script_pubkey))
        .sum::<usize>();

    if witness {
        size += 2;
        size += tx
            .inputs
            .iter()
            .map(|input| {
                varint_size(input.witness.len() as u64)
                    + input.witness.iter().map(|e| var_bytes(e)).sum::<usize>()
            })
            .sum::<usize>();
    }

    size
}

pub fn read_transaction(reader: &mut Reader<'_>) -> Result<Transaction> {
    let version = reader.read_u32()?;

    let mut witness = false;
    let mut input_count = reader.read_length()?;
    if input_count == 0 {
        // Either an empty input list or the BIP144 marker.
        let flag = reader.read_u8()?;
        if flag != WITNESS_FLAG {
            return Err(ConsensusError::Serialization(format!(
                "unsupported witness flag {flag:#04x}"
            )));
        }
        witness = true;
        input_count = reader.read_length()?;
    }

    let mut inputs = Vec::with_capacity(input_count.min(1024));
    for _ in 0..input_count {
        let hash = reader.read_array::<32>()?;
        let index = reader.read_u32()?;
        let script_sig = reader.read_var_bytes()?;
        let sequence = reader.read_u32()?;
        inputs.push(TransactionInput {
            prevout: OutPoint { hash, index },
            script_sig,
            sequence,
            witness: Vec::new(),
        });
    }

    let output_count = reader.read_length()?;
    let mut outputs = Vec::with_capacity(output_count.min(1024));
    for _ in 0..output_count {
        let value = reader.read_i64()?;
        let script_pubkey = reader.read_var_bytes()?;
        outputs.push(TransactionOutput {
            value,
            script_pubkey,
        });
    }

    if witness {
        for input in &mut inputs {
            let count = reader.read_length()?;
            let mut stack = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                stack.push(reader.read_var_bytes()?);
            }
            input.witness = stack;
        }
        // A witness-format encoding with no witness data is not canonical.
        if inputs.iter().all(|input| input.witness.is_empty()) {
            return Err(ConsensusError::Serialization(
                "superfluous witness record".to_string(),
            ));
        }
    }

    let lock_time = reader.read_u32()?;

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

/// Decode a single transaction occupying all of `bytes`.
pub fn deserialize_transaction(bytes: &[u8]) -> Result<Transaction> {
    let mut reader = Reader::new(bytes);
    let tx = read_transaction(&mut reader)?;
    if !reader.is_exhausted() {
        return Err(ConsensusError::Serialization(
            "trailing bytes after transaction".to_string(),
        ));
    }
    Ok(tx)
}

/// Transaction identifier: hash of the encoding without witness data.
pub fn txid(tx: &Transaction) -> Hash {
    double_sha256(&serialize_transaction(tx, false))
}

/// Witness transaction identifier (BIP141). The coinbase wtxid is zero by
/// convention; callers building the witness merkle tree substitute it.
pub fn wtxid(tx: &Transaction) -> Hash {
    double_sha256(&serialize_transaction(tx, true))
}
