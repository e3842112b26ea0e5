//! Signature hashes and ECDSA signature checking

use super::program::SigVersion;
use crate::serialization::double_sha256;
use crate::serialization::transaction::serialize_transaction;
use crate::serialization::varint::write_varint;
use crate::types::*;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};
use std::sync::OnceLock;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Hash signed when SIGHASH_SINGLE has no matching output or the input
/// index is out of range.
const ONE: Hash = {
    let mut one = [0u8; 32];
    one[0] = 1;
    one
};

fn base_type(sighash_type: u32) -> u32 {
    sighash_type & 0x1f
}

/// Legacy signature hash over a copy of the transaction.
///
/// `script_code` must already have CODESEPARATORs and the signature removed.
pub fn legacy_sighash(tx: &Transaction, index: usize, script_code: &[u8], sighash_type: u32) -> Hash {
    if index >= tx.inputs.len() {
        return ONE;
    }

    let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;
    let none = base_type(sighash_type) == SIGHASH_NONE;
    let single = base_type(sighash_type) == SIGHASH_SINGLE;

    if single && index >= tx.outputs.len() {
        return ONE;
    }

    let inputs = tx
        .inputs
        .iter()
        .enumerate()
        .filter(|(i, _)| !anyone_can_pay || *i == index)
        .map(|(i, input)| TransactionInput {
            prevout: input.prevout,
            script_sig: if i == index {
                script_code.to_vec()
            } else {
                Vec::new()
            },
            sequence: if i != index && (none || single) {
                0
            } else {
                input.sequence
            },
            witness: Vec::new(),
        })
        .collect();

    let outputs = if none {
        Vec::new()
    } else if single {
        tx.outputs[..=index]
            .iter()
            .enumerate()
            .map(|(i, output)| {
                if i == index {
                    output.clone()
                } else {
                    TransactionOutput {
                        value: -1,
                        script_pubkey: Vec::new(),
                    }
                }
            })
            .collect()
    } else {
        tx.outputs.clone()
    };

    let copy = Transaction {
        version: tx.version,
        inputs,
        outputs,
        lock_time: tx.lock_time,
    };

    let mut preimage = serialize_transaction(&copy, false);
    preimage.extend_from_slice(&sighash_type.to_le_bytes());
    double_sha256(&preimage)
}

/// BIP143 signature hash for witness version 0 scripts.
pub fn witness_v0_sighash(
    tx: &Transaction,
    index: usize,
    script_code: &[u8],
    value: i64,
    sighash_type: u32,
) -> Hash {
    let Some(input) = tx.inputs.get(index) else {
        return ONE;
    };

    let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;
    let base = base_type(sighash_type);

    let hash_prevouts = if anyone_can_pay {
        [0u8; 32]
    } else {
        let mut data = Vec::with_capacity(tx.inputs.len() * 36);
        for input in &tx.inputs {
            data.extend_from_slice(&input.prevout.hash);
            data.extend_from_slice(&input.prevout.index.to_le_bytes());
        }
        double_sha256(&data)
    };

    let hash_sequence = if anyone_can_pay || base == SIGHASH_SINGLE || base == SIGHASH_NONE {
        [0u8; 32]
    } else {
        let data: Vec<u8> = tx
            .inputs
            .iter()
            .flat_map(|input| input.sequence.to_le_bytes())
            .collect();
        double_sha256(&data)
    };

    let serialize_output = |data: &mut Vec<u8>, output: &TransactionOutput| {
        data.extend_from_slice(&output.value.to_le_bytes());
        write_varint(data, output.script_pubkey.len() as u64);
        data.extend_from_slice(&output.script_pubkey);
    };

    let hash_outputs = if base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        let mut data = Vec::new();
        for output in &tx.outputs {
            serialize_output(&mut data, output);
        }
        double_sha256(&data)
    } else if base == SIGHASH_SINGLE && index < tx.outputs.len() {
        let mut data = Vec::new();
        serialize_output(&mut data, &tx.outputs[index]);
        double_sha256(&data)
    } else {
        [0u8; 32]
    };

    let mut preimage = Vec::with_capacity(160 + script_code.len());
    preimage.extend_from_slice(&tx.version.to_le_bytes());
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    preimage.extend_from_slice(&input.prevout.hash);
    preimage.extend_from_slice(&input.prevout.index.to_le_bytes());
    write_varint(&mut preimage, script_code.len() as u64);
    preimage.extend_from_slice(script_code);
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    preimage.extend_from_slice(&sighash_type.to_le_bytes());
    double_sha256(&preimage)
}

/// Signature hash for `version`.
pub fn sighash(
    version: SigVersion,
    tx: &Transaction,
    index: usize,
    script_code: &[u8],
    value: i64,
    sighash_type: u32,
) -> Hash {
    match version {
        SigVersion::Base => legacy_sighash(tx, index, script_code, sighash_type),
        SigVersion::WitnessV0 => witness_v0_sighash(tx, index, script_code, value, sighash_type),
    }
}

/// BIP66 strict DER encoding of a signature including its sighash byte.
pub fn is_valid_signature_encoding(signature: &[u8]) -> bool {
    let length = signature.len();
    if !(9..=73).contains(&length) {
        return false;
    }
    if signature[0] != 0x30 || signature[1] as usize != length - 3 {
        return false;
    }

    let r_length = signature[3] as usize;
    if 5 + r_length >= length {
        return false;
    }
    let s_length = signature[5 + r_length] as usize;
    if r_length + s_length + 7 != length {
        return false;
    }

    if signature[2] != 0x02 || r_length == 0 || signature[4] & 0x80 != 0 {
        return false;
    }
    if r_length > 1 && signature[4] == 0 && signature[5] & 0x80 == 0 {
        return false;
    }

    let s = r_length + 6;
    if signature[s - 2] != 0x02 || s_length == 0 || signature[s] & 0x80 != 0 {
        return false;
    }
    if s_length > 1 && signature[s] == 0 && signature[s + 1] & 0x80 == 0 {
        return false;
    }

    true
}

fn secp() -> &'static Secp256k1<VerifyOnly> {
    static CONTEXT: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();
    CONTEXT.get_or_init(Secp256k1::verification_only)
}

/// Verify a DER signature (without sighash byte) over `hash`.
///
/// Parsing is always lax; strict encoding is a separate rule checked by the
/// caller. Unparsable keys or signatures simply fail, and high-S signatures
/// are normalized first.
pub fn verify_signature(public_key: &[u8], der: &[u8], hash: &Hash) -> bool {
    let Ok(public_key) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(mut signature) = Signature::from_der_lax(der) else {
        return false;
    };
    signature.normalize_s();

    let Ok(message) = Message::from_digest_slice(hash) else {
        return false;
    };
    secp()
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok()
}
