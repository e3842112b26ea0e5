//! Script evaluation
//!
//! EvalScript: (Program) → {Succeeded, Failed(ScriptError)}
//!
//! 1. Every operation is size checked and counted, executed or not
//! 2. Disabled opcodes fail wherever they appear
//! 3. Only flow control runs inside an unexecuted branch
//! 4. Required stack depth is checked before an opcode touches the stack
//! 5. Combined stack size is checked after every operation

use super::number::{from_bool, is_true, Number, MAX_LOCK_TIME_NUMBER_SIZE, MAX_NUMBER_SIZE};
use super::opcodes::*;
use super::program::{InputContext, Program, SigVersion};
use super::sighash::{is_valid_signature_encoding, sighash, verify_signature};
use super::{
    encode_push, find_and_delete, hash160, is_pay_to_script_hash, is_push_only, strip_codeseparators,
    witness_program, Operation,
};
use crate::chain_state::ValidationContext;
use crate::constants::*;
use crate::error::ScriptError;
use crate::forks::Forks;
use crate::types::{ByteString, Transaction, TransactionOutput};
use bitcoin_hashes::{sha1, Hash as _};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use tracing::trace;

/// Run every operation of `program`.
pub fn execute(program: &mut Program<'_>) -> Result<(), ScriptError> {
    let operations = program.shared_operations();

    for operation in operations.iter() {
        if operation.is_oversized() {
            return Err(ScriptError::PushSize);
        }
        program.increment_operation_count(operation.code)?;
        if is_disabled(operation.code) {
            return Err(ScriptError::DisabledOpcode);
        }

        if program.is_executing() || is_conditional(operation.code) {
            run_operation(program, operation)?;
        }

        program.check_stack_size()?;
    }

    if !program.is_balanced() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

/// Stack elements an executed opcode consumes before it can run.
fn required_depth(code: u8) -> usize {
    match code {
        OP_VERIFY | OP_TOALTSTACK | OP_IFDUP | OP_DROP | OP_DUP | OP_SIZE => 1,
        OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => 1,
        OP_RIPEMD160 | OP_SHA1 | OP_SHA256 | OP_HASH160 | OP_HASH256 => 1,
        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => 1,
        OP_2DROP | OP_2DUP | OP_NIP | OP_OVER | OP_PICK | OP_ROLL | OP_SWAP | OP_TUCK => 2,
        OP_EQUAL | OP_EQUALVERIFY | OP_CHECKSIG | OP_CHECKSIGVERIFY => 2,
        OP_ADD..=OP_MAX => 2,
        OP_3DUP | OP_ROT | OP_WITHIN => 3,
        OP_2OVER | OP_2SWAP => 4,
        OP_2ROT => 6,
        _ => 0,
    }
}

fn run_operation(program: &mut Program<'_>, operation: &Operation) -> Result<(), ScriptError> {
    let code = operation.code;
    if program.is_executing() {
        program.require(required_depth(code))?;
    }

    match code {
        OP_0..=OP_PUSHDATA4 => program.push(operation.data.clone()),
        OP_1NEGATE => program.push(Number::new(-1).to_bytes()),
        OP_1..=OP_16 => program.push(vec![code - OP_1 + 1]),

        OP_NOP | OP_NOP1 | OP_NOP4..=OP_NOP10 => {}
        OP_CHECKLOCKTIMEVERIFY => {
            if program.is_enabled(Forks::BIP65) {
                check_lock_time_verify(program)?;
            }
        }
        OP_CHECKSEQUENCEVERIFY => {
            if program.is_enabled(Forks::BIP112) {
                check_sequence_verify(program)?;
            }
        }

        OP_IF | OP_NOTIF => {
            let mut value = false;
            if program.is_executing() {
                let top = program.pop().map_err(|_| ScriptError::UnbalancedConditional)?;
                value = is_true(&top) == (code == OP_IF);
            }
            program.open_condition(value);
        }
        OP_ELSE => program.negate_condition()?,
        OP_ENDIF => program.close_condition()?,
        OP_VERIFY => {
            if !is_true(&program.pop()?) {
                return Err(ScriptError::Verify);
            }
        }
        OP_RETURN => return Err(ScriptError::OpReturn),

        OP_TOALTSTACK => {
            let value = program.pop()?;
            program.push_alternate(value);
        }
        OP_FROMALTSTACK => {
            let value = program.pop_alternate()?;
            program.push(value);
        }
        OP_2DROP => {
            program.pop()?;
            program.pop()?;
        }
        OP_2DUP => {
            program.duplicate(1)?;
            program.duplicate(1)?;
        }
        OP_3DUP => {
            program.duplicate(2)?;
            program.duplicate(2)?;
            program.duplicate(2)?;
        }
        OP_2OVER => {
            program.duplicate(3)?;
            program.duplicate(3)?;
        }
        OP_2ROT => {
            let first = program.erase(5)?;
            let second = program.erase(4)?;
            program.push(first);
            program.push(second);
        }
        OP_2SWAP => {
            program.swap(3, 1)?;
            program.swap(2, 0)?;
        }
        OP_IFDUP => {
            if is_true(program.item(0)?) {
                program.duplicate(0)?;
            }
        }
        OP_DEPTH => {
            let depth = program.stack_size() as i64;
            program.push(Number::new(depth).to_bytes());
        }
        OP_DROP => {
            program.pop()?;
        }
        OP_DUP => program.duplicate(0)?,
        OP_NIP => {
            program.erase(1)?;
        }
        OP_OVER => program.duplicate(1)?,
        OP_PICK | OP_ROLL => {
            let index = Number::from_bytes(&program.pop()?, MAX_NUMBER_SIZE)?.value();
            if index < 0 || index as usize >= program.stack_size() {
                return Err(ScriptError::InvalidStackOperation);
            }
            if code == OP_PICK {
                program.duplicate(index as usize)?;
            } else {
                let value = program.erase(index as usize)?;
                program.push(value);
            }
        }
        OP_ROT => {
            program.swap(2, 1)?;
            program.swap(1, 0)?;
        }
        OP_SWAP => program.swap(0, 1)?,
        OP_TUCK => {
            let top = program.pop()?;
            let second = program.pop()?;
            program.push(top.clone());
            program.push(second);
            program.push(top);
        }
        OP_SIZE => {
            let size = program.item(0)?.len() as i64;
            program.push(Number::new(size).to_bytes());
        }

        OP_EQUAL | OP_EQUALVERIFY => {
            let first = program.pop()?;
            let second = program.pop()?;
            let equal = first == second;
            if code == OP_EQUALVERIFY {
                if !equal {
                    return Err(ScriptError::EqualVerify);
                }
            } else {
                program.push(from_bool(equal));
            }
        }

        OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
            let value = Number::from_bytes(&program.pop()?, MAX_NUMBER_SIZE)?.value();
            let result = match code {
                OP_1ADD => value + 1,
                OP_1SUB => value - 1,
                OP_NEGATE => -value,
                OP_ABS => value.abs(),
                OP_NOT => (value == 0) as i64,
                _ => (value != 0) as i64,
            };
            program.push(Number::new(result).to_bytes());
        }
        OP_ADD..=OP_MAX => {
            let right = Number::from_bytes(&program.pop()?, MAX_NUMBER_SIZE)?.value();
            let left = Number::from_bytes(&program.pop()?, MAX_NUMBER_SIZE)?.value();
            let result = match code {
                OP_ADD => left + right,
                OP_SUB => left - right,
                OP_BOOLAND => (left != 0 && right != 0) as i64,
                OP_BOOLOR => (left != 0 || right != 0) as i64,
                OP_NUMEQUAL | OP_NUMEQUALVERIFY => (left == right) as i64,
                OP_NUMNOTEQUAL => (left != right) as i64,
                OP_LESSTHAN => (left < right) as i64,
                OP_GREATERTHAN => (left > right) as i64,
                OP_LESSTHANOREQUAL => (left <= right) as i64,
                OP_GREATERTHANOREQUAL => (left >= right) as i64,
                OP_MIN => left.min(right),
                // OP_MAX; the disabled arithmetic in this range never executes.
                _ => left.max(right),
            };
            if code == OP_NUMEQUALVERIFY {
                if result == 0 {
                    return Err(ScriptError::NumEqualVerify);
                }
            } else {
                program.push(Number::new(result).to_bytes());
            }
        }
        OP_WITHIN => {
            let maximum = Number::from_bytes(&program.pop()?, MAX_NUMBER_SIZE)?.value();
            let minimum = Number::from_bytes(&program.pop()?, MAX_NUMBER_SIZE)?.value();
            let value = Number::from_bytes(&program.pop()?, MAX_NUMBER_SIZE)?.value();
            program.push(from_bool(minimum <= value && value < maximum));
        }

        OP_RIPEMD160 => {
            let value = program.pop()?;
            program.push(Ripemd160::digest(&value).to_vec());
        }
        OP_SHA1 => {
            let value = program.pop()?;
            program.push(sha1::Hash::hash(&value).into_inner().to_vec());
        }
        OP_SHA256 => {
            let value = program.pop()?;
            program.push(Sha256::digest(&value).to_vec());
        }
        OP_HASH160 => {
            let value = program.pop()?;
            program.push(hash160(&value));
        }
        OP_HASH256 => {
            let value = program.pop()?;
            program.push(Sha256::digest(Sha256::digest(&value)).to_vec());
        }
        OP_CODESEPARATOR => program.set_jump(operation.end),
        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
            let valid = check_sig(program)?;
            if code == OP_CHECKSIGVERIFY {
                if !valid {
                    return Err(ScriptError::CheckSigVerify);
                }
            } else {
                program.push(from_bool(valid));
            }
        }
        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
            let valid = check_multisig(program)?;
            if code == OP_CHECKMULTISIGVERIFY {
                if !valid {
                    return Err(ScriptError::CheckMultisigVerify);
                }
            } else {
                program.push(from_bool(valid));
            }
        }

        // OP_RESERVED, OP_VER, OP_VERIF, OP_VERNOTIF, OP_RESERVED1/2 and
        // everything above OP_NOP10.
        _ => return Err(ScriptError::BadOpcode),
    }

    Ok(())
}

// Signatures.
// ----------------------------------------------------------------------------

/// Check one signature (with trailing sighash byte) against `script_code`.
///
/// An empty signature is simply false. Encoding failures under BIP66 fail the
/// whole script.
fn check_signature(
    program: &Program<'_>,
    signature: &[u8],
    public_key: &[u8],
    script_code: &[u8],
) -> Result<bool, ScriptError> {
    let Some((&sighash_type, der)) = signature.split_last() else {
        return Ok(false);
    };
    if program.is_enabled(Forks::BIP66) && !is_valid_signature_encoding(signature) {
        return Err(ScriptError::SigDer);
    }

    let script_code = match program.version() {
        SigVersion::Base => strip_codeseparators(script_code),
        SigVersion::WitnessV0 => script_code.to_vec(),
    };
    let input = program.input();
    let hash = sighash(
        program.version(),
        input.transaction,
        input.index,
        &script_code,
        input.value,
        sighash_type as u32,
    );

    Ok(verify_signature(public_key, der, &hash))
}

fn check_sig(program: &mut Program<'_>) -> Result<bool, ScriptError> {
    let public_key = program.pop()?;
    let signature = program.pop()?;

    let mut script_code = program.subscript().to_vec();
    if program.version() == SigVersion::Base {
        script_code = find_and_delete(&script_code, &encode_push(&signature));
    }

    check_signature(program, &signature, &public_key, &script_code)
}

/// Stack, top first: key count, keys, signature count, signatures, dummy.
fn check_multisig(program: &mut Program<'_>) -> Result<bool, ScriptError> {
    let key_count = Number::from_bytes(program.item(0)?, MAX_NUMBER_SIZE)?.value();
    program.increment_multisig_public_key_count(key_count)?;
    let key_count = key_count as usize;

    let signature_count_index = key_count + 1;
    program.require(signature_count_index + 1)?;
    let signature_count =
        Number::from_bytes(program.item(signature_count_index)?, MAX_NUMBER_SIZE)?.value();
    if signature_count < 0 || signature_count as usize > key_count {
        return Err(ScriptError::SigCount);
    }
    let signature_count = signature_count as usize;

    let first_signature = signature_count_index + 1;
    program.require(first_signature + signature_count)?;

    let keys = (0..key_count)
        .map(|k| program.item(1 + k).cloned())
        .collect::<Result<Vec<_>, _>>()?;
    let signatures = (0..signature_count)
        .map(|s| program.item(first_signature + s).cloned())
        .collect::<Result<Vec<_>, _>>()?;

    let mut script_code = program.subscript().to_vec();
    if program.version() == SigVersion::Base {
        for signature in &signatures {
            script_code = find_and_delete(&script_code, &encode_push(signature));
        }
    }

    // Signatures must appear in key order; each key is tried at most once.
    let mut success = true;
    let mut signature = 0;
    let mut key = 0;
    while success && signature < signature_count {
        if check_signature(program, &signatures[signature], &keys[key], &script_code)? {
            signature += 1;
        }
        key += 1;
        if signature_count - signature > key_count - key {
            success = false;
        }
    }

    program.erase_range(0, first_signature + signature_count)?;

    let dummy = program.pop()?;
    if program.is_enabled(Forks::BIP147) && !dummy.is_empty() {
        return Err(ScriptError::SigNullDummy);
    }

    Ok(success)
}

// Lock time.
// ----------------------------------------------------------------------------

fn check_lock_time_verify(program: &Program<'_>) -> Result<(), ScriptError> {
    let lock_time = Number::from_bytes(program.item(0)?, MAX_LOCK_TIME_NUMBER_SIZE)?.value();
    if lock_time < 0 {
        return Err(ScriptError::NegativeLockTime);
    }

    let input = program.input();
    let tx = input.transaction;
    let threshold = LOCKTIME_THRESHOLD as i64;
    let tx_lock_time = tx.lock_time as i64;

    let same_kind = (lock_time < threshold) == (tx_lock_time < threshold);
    if !same_kind || lock_time > tx_lock_time {
        return Err(ScriptError::UnsatisfiedLockTime);
    }

    // A final input would let the transaction bypass its lock time.
    let sequence = tx
        .inputs
        .get(input.index)
        .map(|input| input.sequence)
        .ok_or(ScriptError::InputIndex)?;
    if sequence == SEQUENCE_FINAL {
        return Err(ScriptError::UnsatisfiedLockTime);
    }
    Ok(())
}

fn check_sequence_verify(program: &Program<'_>) -> Result<(), ScriptError> {
    let sequence = Number::from_bytes(program.item(0)?, MAX_LOCK_TIME_NUMBER_SIZE)?.value();
    if sequence < 0 {
        return Err(ScriptError::NegativeLockTime);
    }
    if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 != 0 {
        return Ok(());
    }

    let input = program.input();
    let tx = input.transaction;
    if tx.version < 2 {
        return Err(ScriptError::UnsatisfiedLockTime);
    }
    let tx_sequence = tx
        .inputs
        .get(input.index)
        .map(|input| input.sequence)
        .ok_or(ScriptError::InputIndex)?;
    if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
        return Err(ScriptError::UnsatisfiedLockTime);
    }

    let mask = (SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK) as i64;
    let required = sequence & mask;
    let available = (tx_sequence as i64) & mask;
    let type_flag = SEQUENCE_LOCKTIME_TYPE_FLAG as i64;

    let same_kind = (required < type_flag) == (available < type_flag);
    if !same_kind || required > available {
        return Err(ScriptError::UnsatisfiedLockTime);
    }
    Ok(())
}

// Verification.
// ----------------------------------------------------------------------------

/// VerifyScript: unlocking script, locking script, redeem script, witness.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    witness: &[ByteString],
    input: InputContext<'_>,
) -> Result<(), ScriptError> {
    let segwit = input.is_enabled(Forks::BIP141);
    let p2sh = input.is_enabled(Forks::BIP16) && is_pay_to_script_hash(script_pubkey);

    let mut program = Program::new(script_sig, input, SigVersion::Base, Vec::new())?;
    execute(&mut program)?;
    let stack = program.into_stack();
    let p2sh_stack = if p2sh { stack.clone() } else { Vec::new() };

    let mut program = Program::new(script_pubkey, input, SigVersion::Base, stack)?;
    execute(&mut program)?;
    if !program.stack_result() {
        return Err(ScriptError::EvalFalse);
    }

    let mut has_witness_program = false;
    if segwit {
        if let Some((version, program)) = witness_program(script_pubkey) {
            has_witness_program = true;
            if !script_sig.is_empty() {
                return Err(ScriptError::WitnessMalleated);
            }
            verify_witness_program(witness, version, program, input)?;
        }
    }

    if p2sh {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }

        let mut stack = p2sh_stack;
        let redeem = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        let mut program = Program::new(&redeem, input, SigVersion::Base, stack)?;
        execute(&mut program)?;
        if !program.stack_result() {
            return Err(ScriptError::EvalFalse);
        }

        if segwit {
            if let Some((version, program)) = witness_program(&redeem) {
                has_witness_program = true;
                if script_sig != encode_push(&redeem).as_slice() {
                    return Err(ScriptError::WitnessMalleatedP2sh);
                }
                verify_witness_program(witness, version, program, input)?;
            }
        }
    }

    if segwit && !has_witness_program && !witness.is_empty() {
        return Err(ScriptError::WitnessUnexpected);
    }
    Ok(())
}

/// Version 0 programs are P2WPKH (20 bytes) or P2WSH (32 bytes); later
/// versions are unencumbered.
fn verify_witness_program(
    witness: &[ByteString],
    version: u8,
    program: &[u8],
    input: InputContext<'_>,
) -> Result<(), ScriptError> {
    if version != 0 {
        return Ok(());
    }

    let (script, stack) = match program.len() {
        32 => {
            let (script, stack) = witness
                .split_last()
                .ok_or(ScriptError::WitnessProgramWitnessEmpty)?;
            if Sha256::digest(script).as_slice() != program {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            (script.clone(), stack.to_vec())
        }
        20 => {
            if witness.len() != 2 {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            let mut script = vec![OP_DUP, OP_HASH160, 0x14];
            script.extend_from_slice(program);
            script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            (script, witness.to_vec())
        }
        _ => return Err(ScriptError::WitnessProgramWrongLength),
    };

    if stack.iter().any(|item| item.len() > MAX_SCRIPT_ELEMENT_SIZE) {
        return Err(ScriptError::PushSize);
    }

    let mut program = Program::new(&script, input, SigVersion::WitnessV0, stack)?;
    execute(&mut program)?;
    if program.stack_size() != 1 {
        return Err(ScriptError::CleanStack);
    }
    if !program.stack_result() {
        return Err(ScriptError::EvalFalse);
    }
    Ok(())
}

/// Verify input `index` of `tx` spending `prevout` under the rules of
/// `context`.
pub fn verify_input(
    tx: &Transaction,
    index: usize,
    prevout: &TransactionOutput,
    context: &ValidationContext,
) -> Result<(), ScriptError> {
    let spending = tx.inputs.get(index).ok_or(ScriptError::InputIndex)?;
    let input = InputContext {
        transaction: tx,
        index,
        value: prevout.value,
        forks: context.forks(),
    };

    verify_script(
        &spending.script_sig,
        &prevout.script_pubkey,
        &spending.witness,
        input,
    )
    .inspect_err(|error| trace!(index, %error, "input script failed"))
}
