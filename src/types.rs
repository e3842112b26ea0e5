//! Core Bitcoin types for consensus validation

use crate::error::{Missing, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Natural number type
pub type Natural = u64;

/// Integer type
pub type Integer = i64;

/// Witness stack of one input.
pub type Witness = Vec<ByteString>;

/// Reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The previous output referenced by a coinbase input.
    pub const NULL: OutPoint = OutPoint {
        hash: [0u8; 32],
        index: u32::MAX,
    };

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
    #[serde(default)]
    pub witness: Witness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Integer,
    pub script_pubkey: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }
}

/// 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Serialized sizes of a block, computed once on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizes {
    /// Size without witness data.
    pub base: usize,
    /// Size with witness data.
    pub total: usize,
    /// `base * 3 + total`
    pub weight: usize,
}

/// A block with memoized sizes. The transaction list is only mutable
/// through [`Block::transactions_mut`], which drops the memo, so sizes always
/// describe the current transactions. The header does not affect sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    transactions: Vec<Transaction>,
    #[serde(skip)]
    sizes: OnceLock<BlockSizes>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            sizes: OnceLock::new(),
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Mutable access to the transactions. Sizes are measured again on the
    /// next [`Block::sizes`] call.
    pub fn transactions_mut(&mut self) -> &mut Vec<Transaction> {
        self.sizes = OnceLock::new();
        &mut self.transactions
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }

    /// Memoized serialized sizes. Never part of a verdict on its own.
    pub fn sizes(&self) -> BlockSizes {
        *self.sizes.get_or_init(|| {
            let base = crate::serialization::block::serialized_size(self, false);
            let total = crate::serialization::block::serialized_size(self, true);
            BlockSizes {
                base,
                total,
                weight: base * 3 + total,
            }
        })
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.transactions == other.transactions
    }
}

impl Eq for Block {}

/// Previous output as attached by the caller, with its chain metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prevout {
    pub output: TransactionOutput,
    /// Height of the confirming block.
    pub height: Natural,
    /// Median time past of the block before the confirming block (BIP68).
    #[serde(default)]
    pub median_time_past: u32,
    pub coinbase: bool,
    /// Confirmed in the current chain.
    #[serde(default = "default_true")]
    pub confirmed: bool,
    /// Spent by a confirmed transaction.
    #[serde(default)]
    pub spent: bool,
}

fn default_true() -> bool {
    true
}

/// Previous-output lookup supplied by the caller.
///
/// The validators never fetch anything themselves: whatever is not returned
/// here is reported as missing.
pub trait PrevoutLookup: Sync {
    fn prevout(&self, outpoint: &OutPoint) -> Option<&Prevout>;
}

/// In-memory previous-output set.
pub type UtxoSet = HashMap<OutPoint, Prevout>;

impl PrevoutLookup for UtxoSet {
    fn prevout(&self, outpoint: &OutPoint) -> Option<&Prevout> {
        self.get(outpoint)
    }
}

/// Height pinned to a block hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: Natural,
    pub hash: Hash,
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    /// Definitely invalid, never re-check.
    Invalid(ValidationError),
    /// Unacceptable as received, but the block identity must not be marked
    /// invalid: another serialization of the same header may be valid.
    Malleated(ValidationError),
    /// Not a verdict. Re-check once the missing data is supplied.
    Indeterminate(Missing),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}
