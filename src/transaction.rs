//! Transaction validation
//!
//! Transactions pass through the same stages as blocks: `check_transaction`
//! needs nothing but the transaction, `accept_transaction` needs the chain
//! state, `connect_transaction` needs the previous outputs and
//! `confirm_transaction` needs their spend state.

use crate::chain_state::ValidationContext;
use crate::constants::*;
use crate::economic::checked_total;
use crate::error::{Missing, TransactionError};
use crate::forks::Forks;
use crate::serialization::transaction::serialized_size;
use crate::types::*;
use std::collections::HashSet;

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. 4 × |tx without witness| ≤ maximum block weight
/// 3. ∀o ∈ outs: 0 ≤ o.value ≤ M_max, and Σ o.value ≤ M_max
/// 4. No previous output is spent twice
/// 5. Coinbase scripts are 2 to 100 bytes; other transactions have no null
///    previous outputs
pub fn check_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() {
        return Err(TransactionError::EmptyInputs);
    }
    if tx.outputs.is_empty() {
        return Err(TransactionError::EmptyOutputs);
    }

    if serialized_size(tx, false) * WITNESS_SCALE_FACTOR > MAX_BLOCK_WEIGHT {
        return Err(TransactionError::SizeLimit);
    }

    if tx
        .outputs
        .iter()
        .any(|output| !(0..=MAX_MONEY).contains(&output.value))
    {
        return Err(TransactionError::OutputValueRange);
    }
    checked_total(
        tx.outputs.iter().map(|output| output.value),
        TransactionError::TotalOutputValueRange,
    )?;

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    if !tx.inputs.iter().all(|input| seen.insert(input.prevout)) {
        return Err(TransactionError::DuplicateInputs);
    }

    if tx.is_coinbase() {
        let size = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SIZE..=MAX_COINBASE_SIZE).contains(&size) {
            return Err(TransactionError::CoinbaseScriptSize);
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Err(TransactionError::NullPreviousOutput);
    }

    Ok(())
}

/// IsFinal: 𝒯𝒳 × ℕ × ℕ → {true, false}
///
/// Lock times below the threshold are heights, others are times compared
/// against `clock`. A transaction whose inputs are all final ignores its
/// lock time.
pub fn is_final(tx: &Transaction, height: Natural, clock: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }

    let limit = if tx.lock_time < LOCKTIME_THRESHOLD {
        height
    } else {
        clock as Natural
    };
    if (tx.lock_time as Natural) < limit {
        return true;
    }

    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Contextual rules that need no previous outputs.
pub fn accept_transaction(tx: &Transaction, context: &ValidationContext) -> Result<(), TransactionError> {
    if context.is_pool() && tx.version > context.maximum_transaction_version() {
        return Err(TransactionError::UnexpectedVersion);
    }
    if !is_final(tx, context.height(), context.lock_time_clock()) {
        return Err(TransactionError::NonFinal);
    }
    Ok(())
}

/// Relative lock from BIP68: the block must be above `height` and its median
/// time past above `time`. Either is -1 when unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLock {
    pub height: i64,
    pub time: i64,
}

/// CalculateSequenceLocks
///
/// 1. Only version 2 transactions under BIP68 are constrained
/// 2. Inputs with the disable flag set are skipped
/// 3. Time locks count from the median time past of the block before the
///    one that created the spent output, in units of 512 seconds
pub fn sequence_locks<'a>(
    tx: &Transaction,
    prevouts: impl Fn(&OutPoint) -> Option<&'a Prevout>,
    forks: Forks,
) -> SequenceLock {
    let mut lock = SequenceLock { height: -1, time: -1 };
    if tx.version < 2 || !forks.contains(Forks::BIP68) || tx.is_coinbase() {
        return lock;
    }

    for input in &tx.inputs {
        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            continue;
        }
        let Some(prevout) = prevouts(&input.prevout) else {
            continue;
        };

        let value = (input.sequence & SEQUENCE_LOCKTIME_MASK) as i64;
        if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            let start = prevout.median_time_past as i64;
            lock.time = lock
                .time
                .max(start + (value << SEQUENCE_LOCKTIME_GRANULARITY) - 1);
        } else {
            lock.height = lock.height.max(prevout.height as i64 + value - 1);
        }
    }
    lock
}

impl SequenceLock {
    /// Whether a block at `height` with median time past `median_time_past`
    /// satisfies the lock.
    pub fn is_satisfied(&self, height: Natural, median_time_past: u32) -> bool {
        self.height < height as i64 && self.time < median_time_past as i64
    }
}

/// Outcome of connecting a transaction that could not be judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    Invalid(TransactionError),
    Missing(Missing),
}

impl From<TransactionError> for ConnectError {
    fn from(error: TransactionError) -> Self {
        ConnectError::Invalid(error)
    }
}

/// Previous outputs of `tx`'s inputs, or every outpoint that is missing.
pub fn resolve_prevouts<'a>(
    tx: &Transaction,
    prevouts: &'a dyn PrevoutLookup,
) -> Result<Vec<&'a Prevout>, Missing> {
    let mut found = Vec::with_capacity(tx.inputs.len());
    let mut missing = Vec::new();
    for input in &tx.inputs {
        match prevouts.prevout(&input.prevout) {
            Some(prevout) => found.push(prevout),
            None => missing.push(input.prevout),
        }
    }
    if missing.is_empty() {
        Ok(found)
    } else {
        Err(Missing::PreviousOutputs(missing))
    }
}

/// ConnectTransaction: 𝒯𝒳 × 𝒰𝒮 × ℕ → {valid, invalid, missing} × ℤ
///
/// 1. Every previous output must be supplied
/// 2. Spent values are in range and their total is in range
/// 3. Coinbase outputs are spent only after maturity
/// 4. Inputs cover outputs; the difference is the fee
/// 5. BIP68 sequence locks are satisfied
pub fn connect_transaction(
    tx: &Transaction,
    prevouts: &dyn PrevoutLookup,
    context: &ValidationContext,
) -> Result<Integer, ConnectError> {
    if tx.is_coinbase() {
        return Ok(0);
    }

    let spent = resolve_prevouts(tx, prevouts).map_err(ConnectError::Missing)?;

    if spent
        .iter()
        .any(|prevout| !(0..=MAX_MONEY).contains(&prevout.output.value))
    {
        return Err(TransactionError::InputValueRange.into());
    }
    let value_in = checked_total(
        spent.iter().map(|prevout| prevout.output.value),
        TransactionError::InputValueRange,
    )?;

    let maturity = context.settings().coinbase_maturity;
    if spent
        .iter()
        .any(|prevout| prevout.coinbase && context.height().saturating_sub(prevout.height) < maturity)
    {
        return Err(TransactionError::PrematureCoinbaseSpend.into());
    }

    let value_out = checked_total(
        tx.outputs.iter().map(|output| output.value),
        TransactionError::TotalOutputValueRange,
    )?;
    if value_in < value_out {
        return Err(TransactionError::Overspend.into());
    }

    let lock = sequence_locks(tx, |outpoint| prevouts.prevout(outpoint), context.forks());
    if !lock.is_satisfied(context.height(), context.median_time_past()) {
        return Err(TransactionError::SequenceLocked.into());
    }

    Ok(value_in - value_out)
}

/// A previous output spent by a confirmed block cannot be spent again.
pub fn confirm_transaction(tx: &Transaction, prevouts: &dyn PrevoutLookup) -> Result<(), ConnectError> {
    if tx.is_coinbase() {
        return Ok(());
    }
    let spent = resolve_prevouts(tx, prevouts).map_err(ConnectError::Missing)?;
    if spent.iter().any(|prevout| prevout.spent && prevout.confirmed) {
        return Err(TransactionError::ConfirmedDoubleSpend.into());
    }
    Ok(())
}
