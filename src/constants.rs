//! Bitcoin consensus constants
//!
//! Values that differ between networks live in [`crate::config::Settings`].

/// Maximum money supply: 21,000,000 BTC in satoshis
pub const MAX_MONEY: i64 = 21_000_000 * SATOSHIS_PER_BTC;

/// Satoshis per BTC
pub const SATOSHIS_PER_BTC: i64 = 100_000_000;

/// Maximum block weight (BIP141)
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// Maximum block size without witness data
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Ratio of base size to weight
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Maximum legacy signature operations per block
pub const MAX_BLOCK_SIGOPS: usize = MAX_BLOCK_SIZE / 50;

/// Maximum signature operation cost per block (BIP141)
pub const MAX_BLOCK_SIGOPS_COST: usize = 80_000;

/// Minimum coinbase script length
pub const MIN_COINBASE_SIZE: usize = 2;

/// Maximum coinbase script length
pub const MAX_COINBASE_SIZE: usize = 100;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a single pushed stack element
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum combined primary and alternate stack size during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of counted operations in script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Maximum public keys in one multisig operation
pub const MAX_MULTISIG_PUBLIC_KEYS: usize = 20;

/// Legacy sigop weight of an unparsable or high-count multisig
pub const MULTISIG_DEFAULT_SIGOPS: usize = MAX_MULTISIG_PUBLIC_KEYS;

/// Lock time threshold: transactions with lock time < this are block height
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// BIP68: if set, the sequence number is not a relative lock time
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// BIP68: if set, the relative lock time is in units of 512 seconds
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// BIP68: relative lock time value mask
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000ffff;

/// BIP68: time-based relative lock granularity (log2 of 512)
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;

/// BIP9: version bits top mask and expected value (001)
pub const VERSION_BITS_TOP_MASK: u32 = 0xe000_0000;
pub const VERSION_BITS_TOP_BITS: u32 = 0x2000_0000;

/// BIP141 witness commitment output prefix: OP_RETURN, push 36, 0xaa21a9ed
pub const WITNESS_COMMITMENT_HEADER: [u8; 6] = [0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// Size of a stripped transaction that can be confused with an inner merkle node
pub const MALLEABLE64_SIZE: usize = 64;
