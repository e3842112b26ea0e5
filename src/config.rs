//! Network consensus parameters
//!
//! Settings are an explicit value handed to every chain state, so several
//! networks can be validated side by side in one process. They can be built
//! from the network presets, loaded from JSON (omitted fields take mainnet
//! values) and adjusted through `CONSENSUS_*` environment variables.

use crate::error::{ConsensusError, Result};
use crate::forks::Forks;
use crate::types::{Checkpoint, Hash, Natural};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// BIP9 deployment with an optional pinned activation height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    /// Version bit signaled by miners (0..=28).
    pub bit: u8,
    /// Rules enabled when the deployment is active.
    pub forks: Forks,
    /// Height at which the deployment is known to be active. When set, the
    /// version signaling sample is not needed for this deployment.
    #[serde(default)]
    pub activation_height: Option<Natural>,
    /// First height whose retarget period may signal. Without an activation
    /// height every version from the start of that period is sampled.
    #[serde(default)]
    pub start_height: Natural,
}

impl Deployment {
    pub fn signal_mask(&self) -> u32 {
        1u32 << self.bit
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Blocks per retarget period.
    pub retarget_interval: Natural,
    /// Seconds a retarget period is meant to take.
    pub target_timespan: u32,
    /// Seconds between blocks.
    pub target_spacing: u32,
    /// Timespan clamp factor.
    pub retarget_factor: u32,
    /// Compact encoding of the easiest allowed target.
    pub proof_of_work_limit: u32,
    /// When false the parent's bits are always reused.
    pub retarget: bool,
    /// Allow minimum difficulty blocks after a long gap.
    pub easy_blocks: bool,
    /// Multiple of `target_spacing` after which a minimum difficulty block is allowed.
    pub easy_spacing_multiple: u32,

    /// Ancestor timestamps in the median time past window.
    pub median_time_past_interval: usize,
    /// Seconds a block timestamp may run ahead of the local clock.
    pub timestamp_limit_seconds: u32,

    /// Version supermajority needed to enable a rule.
    pub activation_threshold: usize,
    /// Version supermajority needed to reject lower versions.
    pub enforcement_threshold: usize,
    /// Blocks counted for the version supermajority.
    pub activation_sample: usize,

    /// Signaling blocks per retarget period needed to activate a deployment.
    pub bip9_threshold: usize,
    pub deployments: Vec<Deployment>,

    /// BIP16 activation by block timestamp.
    pub bip16_activation_time: u32,
    /// Buried activation heights, used when BIP90 is configured.
    pub bip34_height: Natural,
    pub bip65_height: Natural,
    pub bip66_height: Natural,

    /// Blocks exempt from BIP30.
    pub bip30_exceptions: Vec<Checkpoint>,
    /// Pinned block hashes, ascending by height.
    pub checkpoints: Vec<Checkpoint>,
    /// Rules this network enforces once active.
    pub forks: Forks,
    /// Tip age after which a chain is considered stale.
    pub stale_seconds: u32,

    pub subsidy_interval: Natural,
    pub initial_subsidy: i64,
    pub coinbase_maturity: Natural,

    /// Verify block input scripts across the rayon pool.
    pub parallel_validation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Decode a block hash written in display (reversed) hex order.
const fn display_hash(hex: &str) -> Hash {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => panic!("invalid hex digit"),
        }
    }
    let bytes = hex.as_bytes();
    assert!(bytes.len() == 64, "hash must be 64 hex digits");
    let mut hash = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        hash[31 - i] = (nibble(bytes[2 * i]) << 4) | nibble(bytes[2 * i + 1]);
        i += 1;
    }
    hash
}

const fn checkpoint(height: Natural, hex: &str) -> Checkpoint {
    Checkpoint {
        height,
        hash: display_hash(hex),
    }
}

const MAINNET_CHECKPOINTS: [Checkpoint; 14] = [
    checkpoint(0, "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
    checkpoint(11111, "0000000069e244f73d78e8fd29ba2fd2ed618bd6fa2ee92559f542fdb26e7c1d"),
    checkpoint(33333, "000000002dd5588a74784eaa7ab0507a18ad16a236e7b1ce69f00d7ddfb5d0a6"),
    checkpoint(74000, "0000000000573993a3c9e41ce34471c079dcf5f52a0e824a81e7f953b8661a20"),
    checkpoint(105000, "00000000000291ce28027faea320c8d2b054b2e0fe44a773f3eefb151d6bdc97"),
    checkpoint(134444, "00000000000005b12ffd4cd315cd34ffd4a594f430ac814c91184a0d42d2b0fe"),
    checkpoint(168000, "000000000000099e61ea72015e79632f216fe6cb33d7899acb35b75c8303b763"),
    checkpoint(193000, "000000000000059f452a5f7340de6682a977387c17010ff6e6c3bd83ca8b1317"),
    checkpoint(210000, "000000000000048b95347e83192f69cf0366076336c639f9b7228e9ba171342e"),
    checkpoint(216116, "00000000000001b4f4b433e81ee46494af945cf96014816a4e2370f11b23df4e"),
    checkpoint(225430, "00000000000001c108384350f74090433e7fcf79a606b8e797f065b130575932"),
    checkpoint(250000, "000000000000003887df1f29024b06fc2200b55f8af8f35453d7be294df2d214"),
    checkpoint(279000, "0000000000000001ae8c72a0b0c301f67e3afca10e819efa9041e458e9bd7e40"),
    checkpoint(295000, "00000000000000004d9b4ef50f0f9d686fd69db2e03af35a100370c64632a983"),
];

const MAINNET_BIP30_EXCEPTIONS: [Checkpoint; 2] = [
    checkpoint(91842, "00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec"),
    checkpoint(91880, "00000000000743f190a18c5577a3c2d2a1f610ae9601ac046a38084ccb7cd721"),
];

fn deployments(csv: Option<Natural>, segwit: Option<Natural>) -> Vec<Deployment> {
    vec![
        Deployment {
            name: "csv".to_string(),
            bit: 0,
            forks: Forks::CSV,
            activation_height: csv,
            start_height: 0,
        },
        Deployment {
            name: "segwit".to_string(),
            bit: 1,
            forks: Forks::SEGWIT,
            activation_height: segwit,
            start_height: 0,
        },
    ]
}

impl Settings {
    pub fn mainnet() -> Self {
        Self {
            retarget_interval: 2016,
            target_timespan: 14 * 24 * 60 * 60,
            target_spacing: 10 * 60,
            retarget_factor: 4,
            proof_of_work_limit: 0x1d00ffff,
            retarget: true,
            easy_blocks: false,
            easy_spacing_multiple: 2,
            median_time_past_interval: 11,
            timestamp_limit_seconds: 2 * 60 * 60,
            activation_threshold: 750,
            enforcement_threshold: 950,
            activation_sample: 1000,
            bip9_threshold: 1916,
            deployments: deployments(Some(419_328), Some(481_824)),
            bip16_activation_time: 1_333_238_400,
            bip34_height: 227_931,
            bip65_height: 388_381,
            bip66_height: 363_725,
            bip30_exceptions: MAINNET_BIP30_EXCEPTIONS.to_vec(),
            checkpoints: MAINNET_CHECKPOINTS.to_vec(),
            forks: Forks::ALL,
            stale_seconds: 24 * 60 * 60,
            subsidy_interval: 210_000,
            initial_subsidy: 50 * crate::constants::SATOSHIS_PER_BTC,
            coinbase_maturity: 100,
            parallel_validation: true,
        }
    }

    pub fn testnet() -> Self {
        Self {
            easy_blocks: true,
            activation_threshold: 51,
            enforcement_threshold: 75,
            activation_sample: 100,
            bip9_threshold: 1512,
            deployments: deployments(Some(770_112), Some(834_624)),
            bip34_height: 21_111,
            bip65_height: 581_885,
            bip66_height: 330_776,
            bip30_exceptions: Vec::new(),
            checkpoints: vec![checkpoint(
                0,
                "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
            )],
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        Self {
            proof_of_work_limit: 0x207fffff,
            retarget: false,
            easy_blocks: true,
            activation_threshold: 75,
            enforcement_threshold: 95,
            activation_sample: 100,
            bip9_threshold: 108,
            deployments: deployments(Some(0), Some(0)),
            bip34_height: 100_000_000,
            bip65_height: 1_351,
            bip66_height: 1_251,
            bip30_exceptions: Vec::new(),
            checkpoints: vec![checkpoint(
                0,
                "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
            )],
            subsidy_interval: 150,
            ..Self::mainnet()
        }
    }

    /// Load settings from JSON; fields that are omitted take mainnet values.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| ConsensusError::InvalidConfiguration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConsensusError::InvalidConfiguration(e.to_string()))
    }

    /// Apply `CONSENSUS_*` environment variables.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable values are
    /// logged and ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.trim().parse() {
                Ok(parsed) => {
                    debug!(key, value = %value, "applying consensus override");
                    Some(parsed)
                }
                Err(_) => {
                    warn!(key, value = %value, "ignoring unparsable consensus override");
                    None
                }
            }
        }

        if let Some(value) = lookup("CONSENSUS_FORKS") {
            match Forks::from_names(&value) {
                Some(forks) => self.forks = forks,
                None => warn!(value = %value, "ignoring unknown fork names"),
            }
        }
        if let Some(v) = parse("CONSENSUS_STALE_SECONDS", lookup("CONSENSUS_STALE_SECONDS")) {
            self.stale_seconds = v;
        }
        if let Some(v) = parse("CONSENSUS_RETARGET", lookup("CONSENSUS_RETARGET")) {
            self.retarget = v;
        }
        if let Some(v) = parse("CONSENSUS_EASY_BLOCKS", lookup("CONSENSUS_EASY_BLOCKS")) {
            self.easy_blocks = v;
        }
        if let Some(v) = parse("CONSENSUS_COINBASE_MATURITY", lookup("CONSENSUS_COINBASE_MATURITY")) {
            self.coinbase_maturity = v;
        }
        if let Some(v) = parse(
            "CONSENSUS_PARALLEL_VALIDATION",
            lookup("CONSENSUS_PARALLEL_VALIDATION"),
        ) {
            self.parallel_validation = v;
        }
        self
    }

    /// Reject parameter combinations chain state cannot work with.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| Err(ConsensusError::InvalidConfiguration(message.to_string()));

        if self.retarget_interval == 0 {
            return fail("retarget_interval must be positive");
        }
        if self.target_timespan == 0 || self.target_spacing == 0 || self.retarget_factor == 0 {
            return fail("retarget timespan, spacing and factor must be positive");
        }
        if self.median_time_past_interval == 0 {
            return fail("median_time_past_interval must be positive");
        }
        if self.activation_threshold > self.activation_sample
            || self.enforcement_threshold > self.activation_sample
        {
            return fail("supermajority thresholds exceed the sample size");
        }
        if self.bip9_threshold as Natural > self.retarget_interval {
            return fail("bip9_threshold exceeds the retarget interval");
        }
        if self.deployments.iter().any(|d| d.bit > 28) {
            return fail("deployment bit must be in 0..=28");
        }
        if self.subsidy_interval == 0 {
            return fail("subsidy_interval must be positive");
        }
        if self
            .checkpoints
            .windows(2)
            .any(|pair| pair[0].height >= pair[1].height)
        {
            return fail("checkpoints must be strictly ascending by height");
        }
        Ok(())
    }

    /// Minimum-difficulty spacing for easy-blocks networks.
    pub fn easy_spacing_seconds(&self) -> u32 {
        self.target_spacing.saturating_mul(self.easy_spacing_multiple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_presets_validate() {
        assert!(Settings::mainnet().validate().is_ok());
        assert!(Settings::testnet().validate().is_ok());
        assert!(Settings::regtest().validate().is_ok());
    }

    #[test]
    fn test_regtest_parameters() {
        let regtest = Settings::regtest();
        assert!(!regtest.retarget);
        assert!(regtest.easy_blocks);
        assert_eq!(regtest.proof_of_work_limit, 0x207fffff);
        assert_eq!(regtest.retarget_interval, 2016);
    }

    #[test]
    fn test_display_hash_reverses() {
        let genesis = MAINNET_CHECKPOINTS[0].hash;
        assert_eq!(genesis[31], 0x00);
        assert_eq!(genesis[0], 0x6f);
    }

    #[test]
    fn test_from_json_partial() {
        let settings = Settings::from_json(r#"{ "easy_blocks": true, "stale_seconds": 60 }"#).unwrap();
        assert!(settings.easy_blocks);
        assert_eq!(settings.stale_seconds, 60);
        assert_eq!(settings.retarget_interval, 2016);
        assert_eq!(settings.deployments.len(), 2);
    }

    #[test]
    fn test_from_json_round_trip() {
        let testnet = Settings::testnet();
        let json = testnet.to_json().unwrap();
        assert_eq!(Settings::from_json(&json).unwrap(), testnet);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(Settings::from_json(r#"{ "retarget_interval": 0 }"#).is_err());
        assert!(Settings::from_json("not json").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CONSENSUS_FORKS", "bip16,bip30"),
            ("CONSENSUS_STALE_SECONDS", "120"),
            ("CONSENSUS_PARALLEL_VALIDATION", "false"),
            ("CONSENSUS_COINBASE_MATURITY", "not a number"),
        ]
        .into_iter()
        .collect();
        let settings =
            Settings::mainnet().with_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(settings.forks, Forks::BIP16 | Forks::BIP30);
        assert_eq!(settings.stale_seconds, 120);
        assert!(!settings.parallel_validation);
        assert_eq!(settings.coinbase_maturity, 100);
    }
}
