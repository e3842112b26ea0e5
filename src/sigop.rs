//! Signature operation counting
//!
//! Legacy counting charges every CHECKMULTISIG the maximum key count; accurate
//! counting (P2SH redeem scripts, witness scripts) reads the key count from
//! the preceding small-number push. Counting stops at the first unparsable
//! operation.

use crate::constants::{MULTISIG_DEFAULT_SIGOPS, WITNESS_SCALE_FACTOR};
use crate::forks::Forks;
use crate::script::opcodes::*;
use crate::script::{is_pay_to_script_hash, is_push_only, parse, parse_prefix, witness_program};
use crate::types::*;

/// GetSigOpCount: 𝕊 × {accurate, legacy} → ℕ
pub fn script_signature_operations(script: &[u8], accurate: bool) -> usize {
    let mut count = 0;
    let mut previous = None;
    for operation in parse_prefix(script) {
        match operation.code {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                count += match previous {
                    Some(code @ OP_1..=OP_16) if accurate => (code - OP_1 + 1) as usize,
                    _ => MULTISIG_DEFAULT_SIGOPS,
                };
            }
            _ => {}
        }
        previous = Some(operation.code);
    }
    count
}

/// Last push of a push-only script, the P2SH redeem script.
fn redeem_script(script_sig: &[u8]) -> Option<Vec<u8>> {
    if !is_push_only(script_sig) {
        return None;
    }
    parse(script_sig).ok()?.pop().map(|operation| operation.data)
}

/// Legacy sigops over every input and output script of `tx`.
pub fn legacy_signature_operations(tx: &Transaction) -> usize {
    let inputs: usize = tx
        .inputs
        .iter()
        .map(|input| script_signature_operations(&input.script_sig, false))
        .sum();
    let outputs: usize = tx
        .outputs
        .iter()
        .map(|output| script_signature_operations(&output.script_pubkey, false))
        .sum();
    inputs + outputs
}

/// Accurate sigops of the redeem script for a P2SH spend.
pub fn pay_to_script_hash_signature_operations(script_sig: &[u8], script_pubkey: &[u8]) -> usize {
    if !is_pay_to_script_hash(script_pubkey) {
        return 0;
    }
    redeem_script(script_sig)
        .map(|redeem| script_signature_operations(&redeem, true))
        .unwrap_or(0)
}

fn witness_program_signature_operations(version: u8, program: &[u8], witness: &[ByteString]) -> usize {
    match (version, program.len()) {
        (0, 20) => 1,
        (0, 32) => witness
            .last()
            .map(|script| script_signature_operations(script, true))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Witness sigops for one input, including P2SH-wrapped programs.
pub fn witness_signature_operations(input: &TransactionInput, script_pubkey: &[u8]) -> usize {
    if let Some((version, program)) = witness_program(script_pubkey) {
        return witness_program_signature_operations(version, program, &input.witness);
    }

    if is_pay_to_script_hash(script_pubkey) {
        if let Some(redeem) = redeem_script(&input.script_sig) {
            if let Some((version, program)) = witness_program(&redeem) {
                return witness_program_signature_operations(version, program, &input.witness);
            }
        }
    }
    0
}

/// Signature operation cost of `tx`, scaled by the witness factor when BIP141
/// is active. Inputs whose previous outputs are unknown contribute only their
/// legacy count.
pub fn transaction_signature_operations(
    tx: &Transaction,
    prevouts: Option<&dyn PrevoutLookup>,
    forks: Forks,
) -> usize {
    let scale = if forks.contains(Forks::BIP141) {
        WITNESS_SCALE_FACTOR
    } else {
        1
    };
    let mut count = legacy_signature_operations(tx) * scale;

    let Some(prevouts) = prevouts else {
        return count;
    };
    if tx.is_coinbase() {
        return count;
    }

    for input in &tx.inputs {
        let Some(prevout) = prevouts.prevout(&input.prevout) else {
            continue;
        };
        let script_pubkey = &prevout.output.script_pubkey;
        if forks.contains(Forks::BIP16) {
            count += pay_to_script_hash_signature_operations(&input.script_sig, script_pubkey) * scale;
        }
        if forks.contains(Forks::BIP141) {
            count += witness_signature_operations(input, script_pubkey);
        }
    }
    count
}
