//! Error types for consensus validation

use crate::types::OutPoint;
use thiserror::Error;

/// Malformed input and construction failures.
///
/// These never describe a consensus verdict; they describe data that could
/// not be turned into something a verdict can be given on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid chain state: {0}")]
    InvalidChainState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Why a script evaluation failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptError {
    #[error("script evaluated without error but finished with a false/empty top stack element")]
    EvalFalse,
    #[error("OP_RETURN was encountered")]
    OpReturn,
    #[error("script is too big")]
    ScriptSize,
    #[error("script could not be parsed")]
    InvalidScript,
    #[error("push value size limit exceeded")]
    PushSize,
    #[error("operation limit exceeded")]
    OpCount,
    #[error("stack size limit exceeded")]
    StackSize,
    #[error("signature count negative or greater than public key count")]
    SigCount,
    #[error("public key count negative or limit exceeded")]
    PubkeyCount,
    #[error("script failed an OP_VERIFY operation")]
    Verify,
    #[error("script failed an OP_EQUALVERIFY operation")]
    EqualVerify,
    #[error("script failed an OP_CHECKSIGVERIFY operation")]
    CheckSigVerify,
    #[error("script failed an OP_CHECKMULTISIGVERIFY operation")]
    CheckMultisigVerify,
    #[error("script failed an OP_NUMEQUALVERIFY operation")]
    NumEqualVerify,
    #[error("opcode missing or not understood")]
    BadOpcode,
    #[error("attempted to use a disabled opcode")]
    DisabledOpcode,
    #[error("operation not valid with the current stack size")]
    InvalidStackOperation,
    #[error("operation not valid with the current altstack size")]
    InvalidAltstackOperation,
    #[error("invalid OP_IF construction")]
    UnbalancedConditional,
    #[error("script number overflow")]
    NumberOverflow,
    #[error("negative locktime")]
    NegativeLockTime,
    #[error("locktime requirement not satisfied")]
    UnsatisfiedLockTime,
    #[error("non-canonical DER signature")]
    SigDer,
    #[error("dummy CHECKMULTISIG argument must be zero")]
    SigNullDummy,
    #[error("only push operators allowed in signatures")]
    SigPushOnly,
    #[error("witness program has incorrect length")]
    WitnessProgramWrongLength,
    #[error("witness program was passed an empty witness")]
    WitnessProgramWitnessEmpty,
    #[error("witness program hash mismatch")]
    WitnessProgramMismatch,
    #[error("witness requires empty scriptSig")]
    WitnessMalleated,
    #[error("witness requires only-redeemscript scriptSig")]
    WitnessMalleatedP2sh,
    #[error("witness provided for non-witness script")]
    WitnessUnexpected,
    #[error("stack not clean after witness program execution")]
    CleanStack,
    #[error("input index out of range")]
    InputIndex,
}

/// What an indeterminate result is waiting for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    #[error("{} previous output(s) not supplied", .0.len())]
    PreviousOutputs(Vec<OutPoint>),
}

/// Consensus violations raised by the block and transaction validators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    // check
    #[error("block has no transactions")]
    EmptyBlock,
    #[error("block size limit exceeded")]
    BlockSizeLimit,
    #[error("first transaction is not a coinbase")]
    FirstNotCoinbase,
    #[error("block has more than one coinbase")]
    ExtraCoinbases,
    #[error("merkle root mismatch")]
    MerkleMismatch,
    #[error("merkle tree contains a duplicated subtree")]
    MerkleMutation,
    #[error("block spends the same output twice")]
    InternalDoubleSpend,
    #[error("proof of work does not satisfy the header bits")]
    InvalidProofOfWork,
    #[error("timestamp too far in the future")]
    FuturisticTimestamp,
    #[error("transaction {index}: {error}")]
    InvalidTransaction { index: usize, error: TransactionError },

    // accept
    #[error("block hash conflicts with a checkpoint")]
    CheckpointConflict,
    #[error("header bits do not match the required work")]
    IncorrectProofOfWork,
    #[error("timestamp is not after the median time past")]
    TimestampTooEarly,
    #[error("block version is below the minimum")]
    InvalidBlockVersion,
    #[error("coinbase script does not satisfy the height rule")]
    InvalidCoinbaseScript,
    #[error("witness commitment missing or invalid")]
    InvalidWitnessCommitment,
    #[error("witness data present without a commitment")]
    UnexpectedWitness,
    #[error("block weight limit exceeded")]
    BlockWeightLimit,
    #[error("block signature operation limit exceeded")]
    BlockSigopLimit,

    // connect
    #[error("coinbase claims more than subsidy plus fees")]
    CoinbaseValueLimit,
    #[error("script failure in transaction {transaction} input {input}: {error}")]
    ScriptFailure {
        transaction: usize,
        input: usize,
        error: ScriptError,
    },

    // confirm
    #[error("block coinbase collides with an unspent confirmed coinbase")]
    UnspentCoinbaseCollision,
}

/// Transaction-level consensus violations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction has no inputs")]
    EmptyInputs,
    #[error("transaction has no outputs")]
    EmptyOutputs,
    #[error("transaction size limit exceeded")]
    SizeLimit,
    #[error("output value out of range")]
    OutputValueRange,
    #[error("total output value out of range")]
    TotalOutputValueRange,
    #[error("transaction spends the same output twice")]
    DuplicateInputs,
    #[error("coinbase script size out of range")]
    CoinbaseScriptSize,
    #[error("non-coinbase transaction has a null previous output")]
    NullPreviousOutput,
    #[error("transaction is not final")]
    NonFinal,
    #[error("transaction version is above the maximum")]
    UnexpectedVersion,
    #[error("input value out of range")]
    InputValueRange,
    #[error("outputs exceed inputs")]
    Overspend,
    #[error("fee accumulation overflow")]
    FeeOverflow,
    #[error("coinbase output spent before maturity")]
    PrematureCoinbaseSpend,
    #[error("relative lock time not satisfied")]
    SequenceLocked,
    #[error("previous output already spent in a confirmed block")]
    ConfirmedDoubleSpend,
}
