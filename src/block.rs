//! Block validation
//!
//! Validation is staged and each stage gates the next:
//!
//! Check → Accept → Connect → Confirm
//!
//! Check needs only the block, Accept the chain state at its height, Connect
//! the previous outputs it spends and Confirm their spend state. Missing
//! previous outputs make a block indeterminate, never invalid.

use crate::chain_state::ValidationContext;
use crate::config::Settings;
use crate::constants::*;
use crate::economic::{block_subsidy, checked_total};
use crate::error::{Missing, TransactionError, ValidationError};
use crate::forks::Forks;
use crate::merkle::block_merkle_root;
use crate::pow::check_proof_of_work;
use crate::script::number::Number;
use crate::script::opcodes::{OP_0, OP_1};
use crate::script::{encode_push, verify_input};
use crate::segwit::{block_weight, check_witness_commitment};
use crate::serialization::block::header_hash;
use crate::serialization::transaction::{serialized_size, txid};
use crate::sigop::transaction_signature_operations;
use crate::transaction::{accept_transaction, check_transaction, confirm_transaction, connect_transaction, ConnectError};
use crate::types::*;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

// Malleation.
// ----------------------------------------------------------------------------

/// The transaction list repeats a subtree, so another list has the same
/// merkle root.
pub fn is_malleable32(block: &Block) -> bool {
    block_merkle_root(block).1
}

/// A 64-byte transaction can pose as an inner merkle node.
///
/// Whether a given 64-byte transaction is such a forgery cannot be told from
/// the block alone, so any one makes the block malleable. [`validate_at`]
/// then reports every failure of the block as [`ValidationResult::Malleated`]:
/// the transactions are rejected but the header hash is not marked invalid.
pub fn is_malleable64(block: &Block) -> bool {
    block
        .transactions()
        .iter()
        .any(|tx| serialized_size(tx, false) == MALLEABLE64_SIZE)
}

pub fn is_malleable(block: &Block) -> bool {
    is_malleable32(block) || is_malleable64(block)
}

/// The header claims a time beyond the local clock plus the allowed drift.
pub fn is_futuristic(header: &BlockHeader, now: u32, settings: &Settings) -> bool {
    header.timestamp as u64 > now as u64 + settings.timestamp_limit_seconds as u64
}

/// Script a coinbase must begin with under BIP34.
pub fn coinbase_height_script(height: Natural) -> ByteString {
    match height {
        0 => vec![OP_0],
        1..=16 => vec![OP_1 + (height - 1) as u8],
        _ => encode_push(&Number::new(height as i64).to_bytes()),
    }
}

// Previous outputs.
// ----------------------------------------------------------------------------

/// Supplied previous outputs plus the outputs the block itself creates.
struct BlockPrevouts<'a> {
    outer: &'a dyn PrevoutLookup,
    created: HashMap<OutPoint, (usize, Prevout)>,
}

impl<'a> BlockPrevouts<'a> {
    fn new(block: &Block, context: &ValidationContext, outer: &'a dyn PrevoutLookup) -> Self {
        let mut created = HashMap::new();
        for (position, tx) in block.transactions().iter().enumerate() {
            let hash = txid(tx);
            for (index, output) in tx.outputs.iter().enumerate() {
                let prevout = Prevout {
                    output: output.clone(),
                    height: context.height(),
                    median_time_past: context.median_time_past(),
                    coinbase: position == 0,
                    confirmed: false,
                    spent: false,
                };
                created.insert(
                    OutPoint {
                        hash,
                        index: index as u32,
                    },
                    (position, prevout),
                );
            }
        }
        Self { outer, created }
    }

    /// Lookup for the transaction at `position`, which sees only outputs of
    /// earlier transactions in the block.
    fn prevout(&self, position: usize, outpoint: &OutPoint) -> Option<&Prevout> {
        match self.created.get(outpoint) {
            Some((created_at, prevout)) if *created_at < position => Some(prevout),
            _ => self.outer.prevout(outpoint),
        }
    }

    fn at(&self, position: usize) -> PositionedPrevouts<'_> {
        PositionedPrevouts {
            prevouts: self,
            position,
        }
    }
}

struct PositionedPrevouts<'a> {
    prevouts: &'a BlockPrevouts<'a>,
    position: usize,
}

impl PrevoutLookup for PositionedPrevouts<'_> {
    fn prevout(&self, outpoint: &OutPoint) -> Option<&Prevout> {
        self.prevouts.prevout(self.position, outpoint)
    }
}

// Check.
// ----------------------------------------------------------------------------

/// CheckBlock: ℬ → {valid, invalid}
///
/// 1. At least one transaction, within the size limit
/// 2. Proof of work satisfies the header bits, timestamp not futuristic
/// 3. Exactly one coinbase, first
/// 4. Every transaction passes CheckTransaction
/// 5. No previous output is spent twice within the block
/// 6. The merkle root matches and the tree is not mutated
pub fn check_block(block: &Block, settings: &Settings, now: u32) -> Result<(), ValidationError> {
    let transactions = block.transactions();
    if transactions.is_empty() {
        return Err(ValidationError::EmptyBlock);
    }

    if transactions.len() * WITNESS_SCALE_FACTOR > MAX_BLOCK_WEIGHT
        || block.sizes().base * WITNESS_SCALE_FACTOR > MAX_BLOCK_WEIGHT
    {
        return Err(ValidationError::BlockSizeLimit);
    }

    if !check_proof_of_work(&block.header, settings.proof_of_work_limit).unwrap_or(false) {
        return Err(ValidationError::InvalidProofOfWork);
    }
    if is_futuristic(&block.header, now, settings) {
        return Err(ValidationError::FuturisticTimestamp);
    }

    if !transactions[0].is_coinbase() {
        return Err(ValidationError::FirstNotCoinbase);
    }
    if transactions.iter().skip(1).any(Transaction::is_coinbase) {
        return Err(ValidationError::ExtraCoinbases);
    }

    for (index, tx) in transactions.iter().enumerate() {
        check_transaction(tx).map_err(|error| ValidationError::InvalidTransaction { index, error })?;
    }

    let mut spent = HashSet::new();
    let double_spend = transactions
        .iter()
        .skip(1)
        .flat_map(|tx| tx.inputs.iter())
        .any(|input| !spent.insert(input.prevout));
    if double_spend {
        return Err(ValidationError::InternalDoubleSpend);
    }

    let (root, mutated) = block_merkle_root(block);
    if mutated {
        return Err(ValidationError::MerkleMutation);
    }
    if root != block.header.merkle_root {
        return Err(ValidationError::MerkleMismatch);
    }

    Ok(())
}

// Accept.
// ----------------------------------------------------------------------------

/// AcceptBlock: ℬ × 𝒞 → {valid, invalid}
///
/// 1. No checkpoint conflict, bits equal the required work
/// 2. Timestamp after the median time past, version at least the minimum
/// 3. BIP34 coinbases start with the height
/// 4. Every transaction is final
/// 5. Witness commitment and weight under BIP141, no witness otherwise
/// 6. Signature operations within the limit, counted fully when previous
///    outputs are supplied and legacy-only otherwise
pub fn accept_block(
    block: &Block,
    context: &ValidationContext,
    prevouts: Option<&dyn PrevoutLookup>,
) -> Result<(), ValidationError> {
    let header = &block.header;
    let coinbase = block.transactions().first().ok_or(ValidationError::EmptyBlock)?;

    if let Some(pinned) = context.checkpoint() {
        if *pinned != header_hash(header) {
            return Err(ValidationError::CheckpointConflict);
        }
    }
    if header.bits != context.work_required() {
        return Err(ValidationError::IncorrectProofOfWork);
    }
    if header.timestamp <= context.median_time_past() {
        return Err(ValidationError::TimestampTooEarly);
    }
    if header.version < context.minimum_block_version() {
        return Err(ValidationError::InvalidBlockVersion);
    }

    if context.is_enabled(Forks::BIP34) {
        let prefix = coinbase_height_script(context.height());
        let script = coinbase.inputs.first().map(|input| input.script_sig.as_slice());
        if !script.map_or(false, |script| script.starts_with(&prefix)) {
            return Err(ValidationError::InvalidCoinbaseScript);
        }
    }

    for (index, tx) in block.transactions().iter().enumerate() {
        accept_transaction(tx, context).map_err(|error| ValidationError::InvalidTransaction { index, error })?;
    }

    if context.is_enabled(Forks::BIP141) {
        check_witness_commitment(block)?;
        if block_weight(block) > MAX_BLOCK_WEIGHT {
            return Err(ValidationError::BlockWeightLimit);
        }
    } else if block.transactions().iter().any(Transaction::has_witness) {
        return Err(ValidationError::UnexpectedWitness);
    }

    let forks = context.forks();
    let sigops: usize = match prevouts {
        Some(outer) => {
            let view = BlockPrevouts::new(block, context, outer);
            block
                .transactions()
                .iter()
                .enumerate()
                .map(|(position, tx)| {
                    let positioned = view.at(position);
                    transaction_signature_operations(tx, Some(&positioned as &dyn PrevoutLookup), forks)
                })
                .sum()
        }
        None => block
            .transactions()
            .iter()
            .map(|tx| transaction_signature_operations(tx, None, forks))
            .sum(),
    };
    let limit = if context.is_enabled(Forks::BIP141) {
        MAX_BLOCK_SIGOPS_COST
    } else {
        MAX_BLOCK_SIGOPS
    };
    if sigops > limit {
        return Err(ValidationError::BlockSigopLimit);
    }

    Ok(())
}

// Connect.
// ----------------------------------------------------------------------------

fn missing_prevouts(block: &Block, view: &BlockPrevouts<'_>) -> Vec<OutPoint> {
    let mut missing = Vec::new();
    for (position, tx) in block.transactions().iter().enumerate().skip(1) {
        for input in &tx.inputs {
            if view.prevout(position, &input.prevout).is_none() {
                missing.push(input.prevout);
            }
        }
    }
    missing
}

/// ConnectBlock: ℬ × 𝒰𝒮 × 𝒞 → {valid, invalid, indeterminate}
///
/// 1. Every spent output must be supplied or created earlier in the block
/// 2. Each transaction connects: value ranges, maturity, sequence locks
/// 3. The coinbase claims at most subsidy plus fees
/// 4. Every input script verifies; inputs fan out across threads and the
///    first failure in block order is reported
pub fn connect_block(
    block: &Block,
    context: &ValidationContext,
    prevouts: &dyn PrevoutLookup,
) -> ValidationResult {
    let Some(coinbase) = block.transactions().first() else {
        return ValidationResult::Invalid(ValidationError::EmptyBlock);
    };
    let view = BlockPrevouts::new(block, context, prevouts);

    let missing = missing_prevouts(block, &view);
    if !missing.is_empty() {
        debug!(height = context.height(), missing = missing.len(), "previous outputs missing");
        return ValidationResult::Indeterminate(Missing::PreviousOutputs(missing));
    }

    let mut fees: Integer = 0;
    for (index, tx) in block.transactions().iter().enumerate().skip(1) {
        let fee = match connect_transaction(tx, &view.at(index), context) {
            Ok(fee) => fee,
            Err(ConnectError::Invalid(error)) => {
                return ValidationResult::Invalid(ValidationError::InvalidTransaction { index, error })
            }
            Err(ConnectError::Missing(missing)) => return ValidationResult::Indeterminate(missing),
        };
        fees = match fees.checked_add(fee).filter(|fees| *fees <= MAX_MONEY) {
            Some(fees) => fees,
            None => {
                return ValidationResult::Invalid(ValidationError::InvalidTransaction {
                    index,
                    error: TransactionError::FeeOverflow,
                })
            }
        };
    }

    let subsidy = block_subsidy(
        context.height(),
        context.settings(),
        context.is_enabled(Forks::BIP42),
    );
    let values = coinbase.outputs.iter().map(|output| output.value);
    let claimed = match checked_total(values, TransactionError::TotalOutputValueRange) {
        Ok(claimed) => claimed,
        Err(error) => return ValidationResult::Invalid(ValidationError::InvalidTransaction { index: 0, error }),
    };
    if claimed > subsidy + fees {
        return ValidationResult::Invalid(ValidationError::CoinbaseValueLimit);
    }

    match verify_scripts(block, &view, context) {
        Ok(()) => ValidationResult::Valid,
        Err(error) => ValidationResult::Invalid(error),
    }
}

fn verify_scripts(
    block: &Block,
    view: &BlockPrevouts<'_>,
    context: &ValidationContext,
) -> Result<(), ValidationError> {
    let mut jobs = Vec::new();
    for (transaction, tx) in block.transactions().iter().enumerate().skip(1) {
        for (input, spending) in tx.inputs.iter().enumerate() {
            let prevout = view
                .prevout(transaction, &spending.prevout)
                .ok_or(ValidationError::InvalidTransaction {
                    index: transaction,
                    error: TransactionError::InputValueRange,
                })?;
            jobs.push((transaction, input, &prevout.output));
        }
    }

    let verify = |&(transaction, input, output): &(usize, usize, &TransactionOutput)| {
        verify_input(&block.transactions()[transaction], input, output, context).map_err(|error| {
            trace!(transaction, input, %error, "script failure");
            ValidationError::ScriptFailure {
                transaction,
                input,
                error,
            }
        })
    };

    let results: Vec<Result<(), ValidationError>> = if context.settings().parallel_validation {
        jobs.par_iter().map(verify).collect()
    } else {
        jobs.iter().map(verify).collect()
    };
    results.into_iter().collect()
}

// Confirm.
// ----------------------------------------------------------------------------

/// ConfirmBlock: ℬ × 𝒰𝒮 × 𝒞 → {valid, invalid, indeterminate}
///
/// 1. Under BIP30 the coinbase may not duplicate an unspent confirmed
///    coinbase
/// 2. No spent output was already spent by a confirmed block
pub fn confirm_block(
    block: &Block,
    context: &ValidationContext,
    prevouts: &dyn PrevoutLookup,
) -> ValidationResult {
    let Some(coinbase) = block.transactions().first() else {
        return ValidationResult::Invalid(ValidationError::EmptyBlock);
    };

    if context.is_enabled(Forks::BIP30) {
        let hash = txid(coinbase);
        let collision = (0..coinbase.outputs.len() as u32).any(|index| {
            prevouts
                .prevout(&OutPoint { hash, index })
                .map_or(false, |prevout| prevout.confirmed && !prevout.spent)
        });
        if collision {
            return ValidationResult::Invalid(ValidationError::UnspentCoinbaseCollision);
        }
    }

    let view = BlockPrevouts::new(block, context, prevouts);
    for (index, tx) in block.transactions().iter().enumerate().skip(1) {
        match confirm_transaction(tx, &view.at(index)) {
            Ok(()) => {}
            Err(ConnectError::Invalid(error)) => {
                return ValidationResult::Invalid(ValidationError::InvalidTransaction { index, error })
            }
            Err(ConnectError::Missing(missing)) => return ValidationResult::Indeterminate(missing),
        }
    }

    ValidationResult::Valid
}

// Validate.
// ----------------------------------------------------------------------------

/// All four stages at local time `now`. Invalid results on a malleable block
/// are reported as malleated, whatever the failing rule. A block carrying a
/// 64-byte transaction therefore never yields `Invalid`.
pub fn validate_at(
    block: &Block,
    context: &ValidationContext,
    prevouts: &dyn PrevoutLookup,
    now: u32,
) -> ValidationResult {
    let staged = check_block(block, context.settings(), now)
        .and_then(|()| accept_block(block, context, Some(prevouts)));

    let result = match staged {
        Err(error) => ValidationResult::Invalid(error),
        Ok(()) => match connect_block(block, context, prevouts) {
            ValidationResult::Valid => confirm_block(block, context, prevouts),
            other => other,
        },
    };

    let result = match result {
        ValidationResult::Invalid(error) if is_malleable(block) => ValidationResult::Malleated(error),
        other => other,
    };

    debug!(height = context.height(), ?result, "block validated");
    result
}

/// All four stages against the local clock.
pub fn validate(block: &Block, context: &ValidationContext, prevouts: &dyn PrevoutLookup) -> ValidationResult {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0);
    validate_at(block, context, prevouts, now)
}
