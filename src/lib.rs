//! # Consensus-Core
//!
//! Bitcoin consensus rules as deterministic functions of their inputs.
//!
//! The crate never fetches anything and never stores anything. Callers supply
//! the chain history a height depends on and the previous outputs a block
//! spends; the crate answers with a verdict.
//!
//! ## Architecture
//!
//! - Chain state: which rules apply at a height (forks, median time past,
//!   required work, checkpoints)
//! - Script machine: evaluation of input authorization scripts
//! - Validators: staged Check → Accept → Connect → Confirm
//!
//! ## Verdicts
//!
//! 1. **Valid**
//! 2. **Invalid**: never re-check
//! 3. **Malleated**: invalid as received, but the block identity may still
//!    be valid under another serialization
//! 4. **Indeterminate**: previous outputs are missing
//!
//! ## Usage
//!
//! ```rust
//! use consensus_core::Consensus;
//! use consensus_core::types::*;
//!
//! let consensus = Consensus::mainnet();
//! let tx = Transaction {
//!     version: 1,
//!     inputs: vec![TransactionInput {
//!         prevout: OutPoint { hash: [1; 32], index: 0 },
//!         script_sig: vec![0x51],
//!         sequence: 0xffffffff,
//!         witness: Vec::new(),
//!     }],
//!     outputs: vec![TransactionOutput {
//!         value: 1000,
//!         script_pubkey: vec![0x51],
//!     }],
//!     lock_time: 0,
//! };
//! assert!(consensus.check_transaction(&tx).is_ok());
//! ```

pub mod block;
pub mod chain_state;
pub mod config;
pub mod constants;
pub mod economic;
pub mod error;
pub mod forks;
pub mod merkle;
pub mod pow;
pub mod script;
pub mod segwit;
pub mod serialization;
pub mod sigop;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use chain_state::{ChainState, HeightData, SampleMap, ValidationContext};
pub use config::Settings;
pub use error::{ConsensusError, Missing, Result, ScriptError, TransactionError, ValidationError};
pub use forks::Forks;
pub use types::*;

use std::sync::Arc;

/// Validation entry points bound to one network's settings.
#[derive(Debug, Clone)]
pub struct Consensus {
    settings: Arc<Settings>,
}

impl Default for Consensus {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Consensus {
    /// Bind to `settings`, rejecting combinations chain state cannot use.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
        })
    }

    /// The mainnet preset, which always validates.
    pub fn mainnet() -> Self {
        Self {
            settings: Arc::new(Settings::mainnet()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Samples a chain state at `height` must be built from.
    pub fn sample_map(&self, height: Natural) -> Result<SampleMap> {
        chain_state::get_map(height, self.settings.forks, &self.settings)
    }

    /// Chain state from supplied samples, with the network's checkpoints,
    /// forks and staleness limit.
    pub fn chain_state(&self, data: HeightData) -> Result<ChainState> {
        ChainState::new(
            data,
            Arc::from(self.settings.checkpoints.clone()),
            self.settings.forks,
            self.settings.stale_seconds,
            Arc::clone(&self.settings),
        )
    }

    /// Context-free transaction checks.
    pub fn check_transaction(&self, tx: &Transaction) -> std::result::Result<(), TransactionError> {
        transaction::check_transaction(tx)
    }

    /// Context-free block checks at local time `now`.
    pub fn check_block(&self, block: &Block, now: u32) -> std::result::Result<(), ValidationError> {
        block::check_block(block, &self.settings, now)
    }

    /// Verify one input script of `tx` against the output it spends, under
    /// the rules of `state`.
    pub fn verify_input(
        &self,
        tx: &Transaction,
        index: usize,
        prevout: &TransactionOutput,
        state: &ChainState,
    ) -> std::result::Result<(), ScriptError> {
        script::verify_input(tx, index, prevout, &state.context())
    }

    /// All validation stages for a block whose chain state is `state`.
    pub fn validate(&self, block: &Block, state: &ChainState, prevouts: &dyn PrevoutLookup) -> ValidationResult {
        block::validate(block, &state.context(), prevouts)
    }
}
