//! Consensus rule flags
//!
//! A [`Forks`] value is both what a network is configured to enforce and, after
//! chain state intersects it with activation conditions, what is active at a
//! given height.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Forks: u32 {
        /// Pay to script hash.
        const BIP16 = 1 << 0;
        /// No unspent duplicate transaction ids.
        const BIP30 = 1 << 1;
        /// Coinbase must include height.
        const BIP34 = 1 << 2;
        /// Finite monetary supply (subsidy shift fix).
        const BIP42 = 1 << 3;
        /// OP_CHECKLOCKTIMEVERIFY.
        const BIP65 = 1 << 4;
        /// Strict DER signatures.
        const BIP66 = 1 << 5;
        /// Relative lock time via sequence numbers.
        const BIP68 = 1 << 6;
        /// Buried activation heights for BIP34, BIP65 and BIP66.
        const BIP90 = 1 << 7;
        /// OP_CHECKSEQUENCEVERIFY.
        const BIP112 = 1 << 8;
        /// Median time past as the lock time clock.
        const BIP113 = 1 << 9;
        /// Segregated witness.
        const BIP141 = 1 << 10;
        /// Witness signature hash.
        const BIP143 = 1 << 11;
        /// NULLDUMMY for multisig.
        const BIP147 = 1 << 12;

        /// The csv deployment (BIP68, BIP112, BIP113).
        const CSV = Self::BIP68.bits() | Self::BIP112.bits() | Self::BIP113.bits();
        /// The segwit deployment (BIP141, BIP143, BIP147).
        const SEGWIT = Self::BIP141.bits() | Self::BIP143.bits() | Self::BIP147.bits();
        /// Rules activated by version supermajority.
        const SUPERMAJORITY = Self::BIP34.bits() | Self::BIP65.bits() | Self::BIP66.bits();
    }
}

impl Forks {
    pub const NONE: Forks = Forks::empty();
    pub const ALL: Forks = Forks::all();

    /// Parse a comma separated list such as `"bip16,bip34"`. Group names
    /// (`csv`, `segwit`, `supermajority`) are accepted too.
    pub fn from_names(names: &str) -> Option<Forks> {
        names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Forks::NONE, |forks, name| {
                Forks::from_name(&name.to_ascii_uppercase()).map(|fork| forks | fork)
            })
    }
}

impl fmt::Display for Forks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<String> = self.iter_names().map(|(name, _)| name.to_ascii_lowercase()).collect();
        write!(f, "{}", names.join(","))
    }
}
