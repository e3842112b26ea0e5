//! Chain state: fork activation, median time past and required work
//!
//! A [`ChainState`] is derived from a bounded window of ancestor header values.
//! [`get_map`] names exactly which ancestors are needed for a height, the
//! constructors turn the supplied samples into an immutable state, and
//! [`ChainState::context`] hands the validators a [`ValidationContext`].

use crate::config::{Deployment, Settings};
use crate::constants::{VERSION_BITS_TOP_BITS, VERSION_BITS_TOP_MASK};
use crate::error::{ConsensusError, Result};
use crate::forks::Forks;
use crate::pow;
use crate::serialization::block::header_hash;
use crate::types::*;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Contiguous run of ancestor heights ending at `high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub high: Natural,
    pub count: usize,
}

impl Range {
    /// Lowest height in the range, `None` when empty.
    pub fn low(&self) -> Option<Natural> {
        match self.count {
            0 => None,
            n => Some(self.high + 1 - n as Natural),
        }
    }

    pub fn contains(&self, height: Natural) -> bool {
        self.low()
            .map(|low| (low..=self.high).contains(&height))
            .unwrap_or(false)
    }
}

/// Ancestor header values required to build the state at `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleMap {
    pub height: Natural,
    pub bits: Range,
    pub versions: Range,
    pub timestamps: Range,
    /// First block of the parent's retarget period.
    pub timestamp_retarget: Natural,
}

/// Compute the ancestor samples needed for a chain state at `height`.
///
/// The map depends only on the height, the configured forks and the network
/// settings; checkpoints never change what is sampled.
pub fn get_map(height: Natural, forks: Forks, settings: &Settings) -> Result<SampleMap> {
    if height == 0 {
        return Err(ConsensusError::InvalidChainState(
            "genesis has no ancestors to sample".to_string(),
        ));
    }
    if settings.retarget_interval == 0 {
        return Err(ConsensusError::InvalidConfiguration(
            "retarget_interval must be positive".to_string(),
        ));
    }

    let high = height - 1;
    let interval = settings.retarget_interval;
    let capped = |count: Natural| count.min(height) as usize;

    let timestamps = capped(settings.median_time_past_interval as Natural);

    // Easy blocks walk back over the parent's whole period so far.
    let bits = if settings.easy_blocks {
        capped(high % interval + 1)
    } else {
        1
    };

    let supermajority = if forks.intersects(Forks::SUPERMAJORITY) && !forks.contains(Forks::BIP90) {
        capped(settings.activation_sample as Natural)
    } else {
        0
    };

    // Every period since the earliest signaling start decides activation, so
    // a lock-in is never sampled out. The current partial period is carried
    // so the next boundary finds it in the parent.
    let signaling = settings
        .deployments
        .iter()
        .filter(|d| d.activation_height.is_none() && forks.intersects(d.forks))
        .map(|d| d.start_height - d.start_height % interval)
        .min()
        .map_or(0, |first| capped(height.saturating_sub(first)));

    Ok(SampleMap {
        height,
        bits: Range { high, count: bits },
        versions: Range {
            high,
            count: supermajority.max(signaling),
        },
        timestamps: Range {
            high,
            count: timestamps,
        },
        timestamp_retarget: high - high % interval,
    })
}

/// Header values for one height plus its ancestor samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightData {
    pub height: Natural,
    /// Unknown for a candidate (pool) state.
    pub hash: Option<Hash>,
    pub bits: u32,
    pub version: u32,
    pub timestamp: u32,
    /// Ancestor values ascending by height, the parent last.
    pub ancestor_bits: Vec<u32>,
    pub ancestor_versions: Vec<u32>,
    pub ancestor_timestamps: Vec<u32>,
    /// Timestamp of [`SampleMap::timestamp_retarget`].
    pub timestamp_retarget: u32,
}

impl HeightData {
    /// Enough history to derive a state from.
    pub fn is_valid(&self) -> bool {
        self.height > 0 && !self.ancestor_bits.is_empty() && !self.ancestor_timestamps.is_empty()
    }

    /// Whether the samples cover `map`.
    pub fn covers(&self, map: &SampleMap) -> bool {
        self.height == map.height
            && self.ancestor_bits.len() >= map.bits.count
            && self.ancestor_versions.len() >= map.versions.count
            && self.ancestor_timestamps.len() >= map.timestamps.count
    }

    fn trim(&mut self, map: &SampleMap) {
        fn keep_last(window: &mut Vec<u32>, count: usize) {
            let excess = window.len().saturating_sub(count);
            window.drain(..excess);
        }
        keep_last(&mut self.ancestor_bits, map.bits.count);
        keep_last(&mut self.ancestor_versions, map.versions.count);
        keep_last(&mut self.ancestor_timestamps, map.timestamps.count);
    }
}

/// Rules in force at one height, handed to the validators.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    forks: Forks,
    height: Natural,
    median_time_past: u32,
    work_required: u32,
    timestamp: u32,
    minimum_block_version: u32,
    maximum_transaction_version: u32,
    checkpoint: Option<Hash>,
    pool: bool,
    settings: Arc<Settings>,
}

impl ValidationContext {
    pub fn forks(&self) -> Forks {
        self.forks
    }

    pub fn is_enabled(&self, fork: Forks) -> bool {
        self.forks.contains(fork)
    }

    pub fn height(&self) -> Natural {
        self.height
    }

    pub fn median_time_past(&self) -> u32 {
        self.median_time_past
    }

    pub fn work_required(&self) -> u32 {
        self.work_required
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn minimum_block_version(&self) -> u32 {
        self.minimum_block_version
    }

    pub fn maximum_transaction_version(&self) -> u32 {
        self.maximum_transaction_version
    }

    /// Checkpointed hash at this height, if any.
    pub fn checkpoint(&self) -> Option<&Hash> {
        self.checkpoint.as_ref()
    }

    /// Candidate state for transaction pool acceptance.
    pub fn is_pool(&self) -> bool {
        self.pool
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Clock used for lock time finality: median time past under BIP113,
    /// otherwise the block timestamp.
    pub fn lock_time_clock(&self) -> u32 {
        if self.is_enabled(Forks::BIP113) {
            self.median_time_past
        } else {
            self.timestamp
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Activation {
    forks: Forks,
    minimum_block_version: u32,
}

/// Immutable consensus state at one height.
#[derive(Debug, Clone)]
pub struct ChainState {
    data: HeightData,
    configured: Forks,
    checkpoints: Arc<[Checkpoint]>,
    stale_seconds: u32,
    settings: Arc<Settings>,
    activation: Activation,
    median_time_past: u32,
    work_required: u32,
}

impl ChainState {
    /// Build a state from supplied samples. Windows longer than the sample
    /// map are trimmed; shorter ones are an error.
    pub fn new(
        data: HeightData,
        checkpoints: Arc<[Checkpoint]>,
        forks: Forks,
        stale_seconds: u32,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        Self::build(data, checkpoints, forks, stale_seconds, settings)
    }

    /// Candidate state for the block after `top`, at local time `now`.
    /// Its block hash is unknown and its bits are the required work.
    pub fn from_top(top: &ChainState, now: u32) -> Result<Self> {
        let data = top.next_data(None, top.work_required, top.data.version, now);
        let mut state = Self::build_from(top, data)?;
        state.data.bits = state.work_required;
        Ok(state)
    }

    /// State for a header extending `parent`.
    pub fn from_parent(parent: &ChainState, header: &BlockHeader) -> Result<Self> {
        let data = parent.next_data(
            Some(header_hash(header)),
            header.bits,
            header.version,
            header.timestamp,
        );
        Self::build_from(parent, data)
    }

    /// State for a block extending `parent`.
    pub fn from_block(parent: &ChainState, block: &Block) -> Result<Self> {
        Self::from_parent(parent, &block.header)
    }

    fn build_from(parent: &ChainState, data: HeightData) -> Result<Self> {
        Self::build(
            data,
            Arc::clone(&parent.checkpoints),
            parent.configured,
            parent.stale_seconds,
            Arc::clone(&parent.settings),
        )
    }

    fn build(
        mut data: HeightData,
        checkpoints: Arc<[Checkpoint]>,
        forks: Forks,
        stale_seconds: u32,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        settings.validate()?;
        if !data.is_valid() {
            return Err(ConsensusError::InvalidChainState(format!(
                "insufficient history at height {}",
                data.height
            )));
        }

        let map = get_map(data.height, forks, &settings)?;
        if !data.covers(&map) {
            return Err(ConsensusError::InvalidChainState(format!(
                "samples do not cover the map at height {}",
                data.height
            )));
        }
        data.trim(&map);

        let activation = activate(&data, forks, &settings);
        let median_time_past = median_time_past(&data.ancestor_timestamps);
        let work_required = work_required(&data, &settings)?;

        debug!(
            height = data.height,
            median_time_past,
            work_required,
            forks = %activation.forks,
            minimum_block_version = activation.minimum_block_version,
            "chain state"
        );

        Ok(Self {
            data,
            configured: forks,
            checkpoints,
            stale_seconds,
            settings,
            activation,
            median_time_past,
            work_required,
        })
    }

    /// Samples for the next height: push this state's own values and let
    /// the constructor trim to the new map.
    fn next_data(&self, hash: Option<Hash>, bits: u32, version: u32, timestamp: u32) -> HeightData {
        let interval = self.settings.retarget_interval;
        let push = |window: &[u32], value: u32| {
            let mut next = Vec::with_capacity(window.len() + 1);
            next.extend_from_slice(window);
            next.push(value);
            next
        };

        // The parent opens a new period: it becomes the retarget reference.
        let timestamp_retarget = if self.data.height % interval == 0 {
            self.data.timestamp
        } else {
            self.data.timestamp_retarget
        };

        HeightData {
            height: self.data.height + 1,
            hash,
            bits,
            version,
            timestamp,
            ancestor_bits: push(&self.data.ancestor_bits, self.data.bits),
            ancestor_versions: push(&self.data.ancestor_versions, self.data.version),
            ancestor_timestamps: push(&self.data.ancestor_timestamps, self.data.timestamp),
            timestamp_retarget,
        }
    }

    pub fn height(&self) -> Natural {
        self.data.height
    }

    pub fn hash(&self) -> Option<&Hash> {
        self.data.hash.as_ref()
    }

    pub fn data(&self) -> &HeightData {
        &self.data
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Active rules at this height.
    pub fn forks(&self) -> Forks {
        self.activation.forks
    }

    pub fn is_enabled(&self, fork: Forks) -> bool {
        self.activation.forks.contains(fork)
    }

    pub fn median_time_past(&self) -> u32 {
        self.median_time_past
    }

    pub fn work_required(&self) -> u32 {
        self.work_required
    }

    pub fn minimum_block_version(&self) -> u32 {
        self.activation.minimum_block_version
    }

    /// Highest transaction version accepted into the pool.
    pub fn maximum_transaction_version(&self) -> u32 {
        if self.is_enabled(Forks::BIP68) {
            2
        } else {
            1
        }
    }

    /// A constructed state always has enough history.
    pub fn is_valid(&self) -> bool {
        self.data.is_valid()
    }

    /// Whether the represented tip lags the local clock by more than
    /// `stale_seconds`.
    pub fn is_stale(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        self.is_stale_at(now)
    }

    pub fn is_stale_at(&self, now: u32) -> bool {
        if self.stale_seconds == 0 {
            return false;
        }

        // A candidate state has no block of its own; its tip is the parent.
        let tip = match self.data.hash {
            Some(_) => self.data.timestamp,
            None => self.data.ancestor_timestamps.last().copied().unwrap_or(0),
        };
        now.saturating_sub(tip) > self.stale_seconds
    }

    /// A checkpoint pins this height to a different hash.
    pub fn is_checkpoint_conflict(&self, hash: &Hash) -> bool {
        self.checkpoint()
            .map(|pinned| pinned != hash)
            .unwrap_or(false)
    }

    /// At or below the highest checkpoint.
    pub fn is_under_checkpoint(&self) -> bool {
        self.checkpoints
            .last()
            .map(|top| self.data.height <= top.height)
            .unwrap_or(false)
    }

    fn checkpoint(&self) -> Option<&Hash> {
        self.checkpoints
            .binary_search_by_key(&self.data.height, |checkpoint| checkpoint.height)
            .ok()
            .map(|index| &self.checkpoints[index].hash)
    }

    pub fn context(&self) -> ValidationContext {
        ValidationContext {
            forks: self.activation.forks,
            height: self.data.height,
            median_time_past: self.median_time_past,
            work_required: self.work_required,
            timestamp: self.data.timestamp,
            minimum_block_version: self.activation.minimum_block_version,
            maximum_transaction_version: self.maximum_transaction_version(),
            checkpoint: self.checkpoint().copied(),
            pool: self.data.hash.is_none(),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// Median of the trailing timestamp window.
fn median_time_past(timestamps: &[u32]) -> u32 {
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    sorted.get(sorted.len() / 2).copied().unwrap_or(0)
}

/// GetNextWorkRequired
///
/// 1. Without retargeting the parent's bits carry over
/// 2. At a period boundary: retarget over the parent's period
/// 3. Easy blocks: a block more than `multiple × spacing` after its parent
///    may use the proof of work limit
/// 4. Easy blocks: otherwise the last bits in the period that are not the limit
/// 5. Otherwise the parent's bits
fn work_required(data: &HeightData, settings: &Settings) -> Result<u32> {
    let (Some(&parent_bits), Some(&parent_timestamp)) =
        (data.ancestor_bits.last(), data.ancestor_timestamps.last())
    else {
        return Err(ConsensusError::InvalidChainState(
            "missing parent samples".to_string(),
        ));
    };

    if !settings.retarget {
        return Ok(parent_bits);
    }

    if data.height % settings.retarget_interval == 0 {
        let timespan = parent_timestamp as i64 - data.timestamp_retarget as i64;
        return pow::retarget(parent_bits, timespan, settings);
    }

    if !settings.easy_blocks {
        return Ok(parent_bits);
    }

    let limit = settings.proof_of_work_limit;
    let easy_time = parent_timestamp as u64 + settings.easy_spacing_seconds() as u64;
    if data.timestamp as u64 > easy_time {
        return Ok(limit);
    }

    Ok(data
        .ancestor_bits
        .iter()
        .rev()
        .find(|&&bits| bits != limit)
        .copied()
        .unwrap_or(limit))
}

fn activate(data: &HeightData, configured: Forks, settings: &Settings) -> Activation {
    let height = data.height;
    let mut forks = configured & (Forks::BIP42 | Forks::BIP90);
    let mut minimum_block_version = 1;

    if data.timestamp >= settings.bip16_activation_time {
        forks |= configured & Forks::BIP16;
    }

    if configured.contains(Forks::BIP90) {
        let buried = [
            (Forks::BIP34, settings.bip34_height, 2),
            (Forks::BIP66, settings.bip66_height, 3),
            (Forks::BIP65, settings.bip65_height, 4),
        ];
        for (fork, activation_height, version) in buried {
            if configured.contains(fork) && height >= activation_height {
                forks |= fork;
                minimum_block_version = minimum_block_version.max(version);
            }
        }
    } else {
        let sample = &data.ancestor_versions[data
            .ancestor_versions
            .len()
            .saturating_sub(settings.activation_sample)..];
        let count = |version: u32| sample.iter().filter(|&&v| v >= version).count();
        for (fork, version) in [(Forks::BIP34, 2), (Forks::BIP66, 3), (Forks::BIP65, 4)] {
            if !configured.contains(fork) {
                continue;
            }
            let signaled = count(version);
            if signaled >= settings.activation_threshold {
                forks |= fork;
            }
            if signaled >= settings.enforcement_threshold {
                minimum_block_version = minimum_block_version.max(version);
            }
        }
    }

    for deployment in &settings.deployments {
        let rules = configured & deployment.forks;
        if rules.is_empty() {
            continue;
        }
        let active = match deployment.activation_height {
            Some(activation_height) => height >= activation_height,
            None => is_signaled(data, settings, deployment),
        };
        if active {
            forks |= rules;
        }
    }

    // Duplicate transaction ids are impossible once coinbases carry the height.
    let exception = data.hash.map_or(false, |hash| {
        settings
            .bip30_exceptions
            .iter()
            .any(|checkpoint| checkpoint.height == height && checkpoint.hash == hash)
    });
    if !forks.contains(Forks::BIP34) && !exception {
        forks |= configured & Forks::BIP30;
    }

    Activation {
        forks,
        minimum_block_version,
    }
}

/// Whether any complete retarget period from the deployment's start up to the
/// current period reached the signaling threshold for its bit.
fn is_signaled(data: &HeightData, settings: &Settings, deployment: &Deployment) -> bool {
    let interval = settings.retarget_interval;
    let mask = deployment.signal_mask();
    let period_start = data.height - data.height % interval;
    let first_height = data.height - data.ancestor_versions.len() as Natural;
    let signals = |version: &&u32| **version & VERSION_BITS_TOP_MASK == VERSION_BITS_TOP_BITS && **version & mask != 0;

    let mut start = deployment.start_height - deployment.start_height % interval;
    while start + interval <= period_start {
        // Periods before the window are outside the sample map.
        if let Some(offset) = start.checked_sub(first_height) {
            let offset = offset as usize;
            if let Some(period) = data.ancestor_versions.get(offset..offset + interval as usize) {
                if period.iter().filter(signals).count() >= settings.bip9_threshold {
                    return true;
                }
            }
        }
        start += interval;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(f: impl FnOnce(&mut Settings)) -> Arc<Settings> {
        let mut settings = Settings::mainnet();
        f(&mut settings);
        Arc::new(settings)
    }

    /// Data at `height` whose ancestors all carry the same values.
    fn uniform_data(height: Natural, map: &SampleMap, bits: u32, version: u32, timestamp: u32) -> HeightData {
        HeightData {
            height,
            hash: Some([height as u8; 32]),
            bits,
            version,
            timestamp,
            ancestor_bits: vec![bits; map.bits.count],
            ancestor_versions: vec![version; map.versions.count],
            ancestor_timestamps: (0..map.timestamps.count as u32)
                .map(|i| timestamp - 600 * (map.timestamps.count as u32 - i))
                .collect(),
            timestamp_retarget: timestamp - 600 * ((height - 1) % 2016 + 1) as u32,
        }
    }

    fn state(height: Natural, settings: Arc<Settings>, forks: Forks) -> ChainState {
        let map = get_map(height, forks, &settings).unwrap();
        let data = uniform_data(height, &map, 0x1d00ffff, 4, 1_500_000_000);
        ChainState::new(data, Arc::from(Vec::new()), forks, 3600, settings).unwrap()
    }

    // ============================================================================
    // SAMPLE MAP TESTS
    // ============================================================================

    #[test]
    fn test_get_map_genesis_rejected() {
        assert!(get_map(0, Forks::ALL, &Settings::mainnet()).is_err());
    }

    #[test]
    fn test_get_map_early_heights_are_capped() {
        let map = get_map(5, Forks::ALL, &Settings::mainnet()).unwrap();
        assert_eq!(map.timestamps, Range { high: 4, count: 5 });
        assert_eq!(map.bits.count, 1);
        assert_eq!(map.versions.count, 0);
        assert_eq!(map.timestamp_retarget, 0);
    }

    #[test]
    fn test_get_map_supermajority_sample() {
        let settings = Settings::mainnet();
        let forks = Forks::ALL;
        let mut without_bip90 = forks;
        without_bip90.remove(Forks::BIP90);

        let map = get_map(100_000, without_bip90, &settings).unwrap();
        assert_eq!(map.versions.count, 1000);
        assert_eq!(map.versions.low(), Some(99_000));

        let map = get_map(100_000, forks, &settings).unwrap();
        assert_eq!(map.versions.count, 0);
    }

    #[test]
    fn test_get_map_signaling_sample() {
        let settings = settings_with(|s| {
            s.deployments[1].activation_height = None;
            s.deployments[1].start_height = 2016 + 5;
        });
        let map = get_map(4032 + 10, Forks::SEGWIT | Forks::BIP90, &settings).unwrap();
        // Every period since the start period plus the current partial one.
        assert_eq!(map.versions.count, 2016 + 10);
        assert_eq!(map.versions.low(), Some(2016));
        assert_eq!(map.timestamp_retarget, 4032);
    }

    #[test]
    fn test_get_map_easy_blocks_bits() {
        let settings = Settings::testnet();
        let map = get_map(2016 * 3 + 7, Forks::ALL, &settings).unwrap();
        assert_eq!(map.bits.count, 7);
        assert_eq!(map.bits.low(), Some(2016 * 3));
        let map = get_map(2016 * 3 + 1, Forks::ALL, &settings).unwrap();
        assert_eq!(map.bits.count, 1);
    }

    #[test]
    fn test_get_map_ignores_checkpoints() {
        let mainnet = Settings::mainnet();
        let mut no_checkpoints = Settings::mainnet();
        no_checkpoints.checkpoints.clear();
        assert_eq!(
            get_map(250_001, Forks::ALL, &mainnet).unwrap(),
            get_map(250_001, Forks::ALL, &no_checkpoints).unwrap()
        );
    }

    // ============================================================================
    // CONSTRUCTION TESTS
    // ============================================================================

    #[test]
    fn test_new_rejects_missing_samples() {
        let settings = Arc::new(Settings::mainnet());
        let map = get_map(20, Forks::ALL, &settings).unwrap();
        let mut data = uniform_data(20, &map, 0x1d00ffff, 1, 1_400_000_000);
        data.ancestor_timestamps.pop();
        let result = ChainState::new(data, Arc::from(Vec::new()), Forks::ALL, 0, settings);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_trims_long_windows() {
        let settings = Arc::new(Settings::mainnet());
        let map = get_map(20, Forks::ALL, &settings).unwrap();
        let mut data = uniform_data(20, &map, 0x1d00ffff, 1, 1_400_000_000);
        data.ancestor_bits = vec![0x1d00ffff; 30];
        let state = ChainState::new(data, Arc::from(Vec::new()), Forks::ALL, 0, settings).unwrap();
        assert_eq!(state.data().ancestor_bits.len(), 1);
    }

    #[test]
    fn test_median_time_past_window() {
        let settings = Arc::new(Settings::mainnet());
        let map = get_map(100, Forks::ALL, &settings).unwrap();
        let mut data = uniform_data(100, &map, 0x1d00ffff, 1, 1_400_000_000);
        data.ancestor_timestamps = vec![10, 1, 9, 2, 8, 3, 7, 4, 6, 5, 100];
        let state = ChainState::new(data, Arc::from(Vec::new()), Forks::ALL, 0, settings).unwrap();
        assert_eq!(state.median_time_past(), 6);
    }

    #[test]
    fn test_from_parent_matches_new() {
        let settings = Arc::new(Settings::mainnet());
        let parent = state(300_000, Arc::clone(&settings), Forks::ALL);
        let header = BlockHeader {
            version: 4,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp: 1_500_000_600,
            bits: 0x1d00ffff,
            nonce: 0,
        };
        let child = ChainState::from_parent(&parent, &header).unwrap();
        assert_eq!(child.height(), 300_001);
        assert_eq!(child.hash(), Some(&header_hash(&header)));

        let rebuilt = ChainState::new(
            child.data().clone(),
            Arc::from(Vec::new()),
            Forks::ALL,
            3600,
            settings,
        )
        .unwrap();
        assert_eq!(rebuilt.median_time_past(), child.median_time_past());
        assert_eq!(rebuilt.work_required(), child.work_required());
        assert_eq!(rebuilt.forks(), child.forks());
    }

    #[test]
    fn test_from_top_is_pool_state() {
        let settings = Arc::new(Settings::mainnet());
        let top = state(300_000, settings, Forks::ALL);
        let pool = ChainState::from_top(&top, 1_500_001_000).unwrap();
        assert_eq!(pool.height(), 300_001);
        assert!(pool.hash().is_none());
        assert!(pool.context().is_pool());
        assert_eq!(pool.data().bits, pool.work_required());
        assert!(!top.context().is_pool());
    }

    #[test]
    fn test_incremental_retarget_reference() {
        let settings = Arc::new(Settings::mainnet());
        let parent = state(4032, settings, Forks::ALL);
        let header = BlockHeader {
            version: 4,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp: 1_500_000_900,
            bits: 0x1d00ffff,
            nonce: 0,
        };
        let child = ChainState::from_parent(&parent, &header).unwrap();
        // Height 4032 opens the period, so its timestamp is the reference.
        assert_eq!(child.data().timestamp_retarget, parent.data().timestamp);
    }

    // ============================================================================
    // WORK REQUIRED TESTS
    // ============================================================================

    fn retarget_data(height: Natural, timespan: u32, settings: &Settings) -> HeightData {
        let map = get_map(height, Forks::NONE, settings).unwrap();
        let mut data = uniform_data(height, &map, 0x1b0404cb, 1, 1_400_000_000);
        let parent_timestamp = *data.ancestor_timestamps.last().unwrap();
        data.timestamp_retarget = parent_timestamp - timespan;
        data
    }

    #[test]
    fn test_work_required_retarget_clamped_quarter() {
        let settings = Settings::mainnet();
        let fast = retarget_data(2016 * 10, settings.target_timespan / 8, &settings);
        let quarter = retarget_data(2016 * 10, settings.target_timespan / 4, &settings);
        let expected = pow::compress_target(&pow::expand_target(0x1b0404cb).unwrap().div_u64(4));
        assert_eq!(work_required(&fast, &settings).unwrap(), expected);
        assert_eq!(work_required(&quarter, &settings).unwrap(), expected);
    }

    #[test]
    fn test_work_required_within_period() {
        let settings = Settings::mainnet();
        let data = retarget_data(2016 * 10 + 5, 1, &settings);
        assert_eq!(work_required(&data, &settings).unwrap(), 0x1b0404cb);
    }

    #[test]
    fn test_work_required_no_retarget() {
        let settings = Settings::regtest();
        let data = retarget_data(2016 * 10, 1, &settings);
        assert_eq!(work_required(&data, &settings).unwrap(), 0x1b0404cb);
    }

    #[test]
    fn test_work_required_easy_blocks_spacing_boundary() {
        let settings = Settings::testnet();
        let mut data = retarget_data(2016 * 10 + 5, 1, &settings);
        let parent_timestamp = *data.ancestor_timestamps.last().unwrap();

        data.timestamp = parent_timestamp + 1200;
        assert_eq!(work_required(&data, &settings).unwrap(), 0x1b0404cb);

        data.timestamp = parent_timestamp + 1201;
        assert_eq!(work_required(&data, &settings).unwrap(), 0x1d00ffff);
    }

    #[test]
    fn test_work_required_easy_blocks_walk_back() {
        let settings = Settings::testnet();
        let mut data = retarget_data(2016 * 10 + 5, 1, &settings);
        data.ancestor_bits = vec![0x1b0404cb, 0x1c00ffff, 0x1d00ffff, 0x1d00ffff, 0x1d00ffff];
        data.timestamp = *data.ancestor_timestamps.last().unwrap() + 60;
        assert_eq!(work_required(&data, &settings).unwrap(), 0x1c00ffff);

        data.ancestor_bits = vec![0x1d00ffff; 5];
        assert_eq!(work_required(&data, &settings).unwrap(), 0x1d00ffff);
    }

    #[test]
    fn test_work_required_easy_blocks_not_at_boundary() {
        let settings = Settings::testnet();
        let mut data = retarget_data(2016 * 10, settings.target_timespan, &settings);
        data.timestamp = *data.ancestor_timestamps.last().unwrap() + 100_000;
        assert_eq!(work_required(&data, &settings).unwrap(), 0x1b0404cb);
    }

    // ============================================================================
    // ACTIVATION TESTS
    // ============================================================================

    #[test]
    fn test_buried_activation() {
        let settings = Arc::new(Settings::mainnet());
        let before = state(227_930, Arc::clone(&settings), Forks::ALL);
        assert!(!before.is_enabled(Forks::BIP34));
        assert!(before.is_enabled(Forks::BIP30));
        assert_eq!(before.minimum_block_version(), 1);

        let after = state(400_000, settings, Forks::ALL);
        assert!(after.is_enabled(Forks::BIP34 | Forks::BIP65 | Forks::BIP66));
        assert!(!after.is_enabled(Forks::BIP30));
        assert_eq!(after.minimum_block_version(), 4);
    }

    #[test]
    fn test_supermajority_activation() {
        let settings = Arc::new(Settings::mainnet());
        let mut forks = Forks::ALL;
        forks.remove(Forks::BIP90);
        let map = get_map(200_000, forks, &settings).unwrap();

        let mut data = uniform_data(200_000, &map, 0x1d00ffff, 1, 1_300_000_000);
        for version in data.ancestor_versions.iter_mut().rev().take(800) {
            *version = 2;
        }
        let state = ChainState::new(data.clone(), Arc::from(Vec::new()), forks, 0, Arc::clone(&settings)).unwrap();
        assert!(state.is_enabled(Forks::BIP34));
        assert_eq!(state.minimum_block_version(), 1);

        for version in data.ancestor_versions.iter_mut().rev().take(950) {
            *version = 2;
        }
        let state = ChainState::new(data, Arc::from(Vec::new()), forks, 0, settings).unwrap();
        assert_eq!(state.minimum_block_version(), 2);
        assert!(!state.is_enabled(Forks::BIP66));
    }

    #[test]
    fn test_bip16_by_timestamp() {
        let settings = Arc::new(Settings::mainnet());
        let map = get_map(170_000, Forks::ALL, &settings).unwrap();
        let early = uniform_data(170_000, &map, 0x1d00ffff, 1, 1_333_238_399);
        let state = ChainState::new(early, Arc::from(Vec::new()), Forks::ALL, 0, Arc::clone(&settings)).unwrap();
        assert!(!state.is_enabled(Forks::BIP16));

        let late = uniform_data(170_000, &map, 0x1d00ffff, 1, 1_333_238_400);
        let state = ChainState::new(late, Arc::from(Vec::new()), Forks::ALL, 0, settings).unwrap();
        assert!(state.is_enabled(Forks::BIP16));
    }

    #[test]
    fn test_deployment_by_activation_height() {
        let settings = Arc::new(Settings::mainnet());
        assert!(!state(481_823, Arc::clone(&settings), Forks::ALL).is_enabled(Forks::BIP141));
        assert!(state(481_824, settings, Forks::ALL).is_enabled(Forks::SEGWIT));
    }

    #[test]
    fn test_deployment_by_signaling() {
        let settings = settings_with(|s| {
            s.deployments[1].activation_height = None;
            s.deployments[1].start_height = 2016;
        });
        let forks = Forks::SEGWIT;
        let height = 4032 + 3;
        let map = get_map(height, forks, &settings).unwrap();

        let signaling = VERSION_BITS_TOP_BITS | 0b10;
        let mut data = uniform_data(height, &map, 0x1d00ffff, signaling, 1_500_000_000);
        let active = ChainState::new(data.clone(), Arc::from(Vec::new()), forks, 0, Arc::clone(&settings)).unwrap();
        assert!(active.is_enabled(Forks::SEGWIT));

        // Below threshold in the previous period.
        for version in data.ancestor_versions.iter_mut().take(2016 - 1900) {
            *version = 4;
        }
        let inactive = ChainState::new(data.clone(), Arc::from(Vec::new()), forks, 0, Arc::clone(&settings)).unwrap();
        assert!(!inactive.is_enabled(Forks::SEGWIT));

        // Wrong top bits do not count.
        data.ancestor_versions = vec![0x4000_0002; map.versions.count];
        let wrong = ChainState::new(data, Arc::from(Vec::new()), forks, 0, settings).unwrap();
        assert!(!wrong.is_enabled(Forks::SEGWIT));
    }

    #[test]
    fn test_signaled_deployment_does_not_depend_on_construction() {
        let settings = settings_with(|s| {
            s.deployments[1].activation_height = None;
            s.deployments[1].start_height = 2016;
        });
        let forks = Forks::SEGWIT;
        let signaling = VERSION_BITS_TOP_BITS | 0b10;
        let height = 4032 + 3;
        let map = get_map(height, forks, &settings).unwrap();
        let data = uniform_data(height, &map, 0x1d00ffff, signaling, 1_500_000_000);
        let mut incremental = ChainState::new(data, Arc::from(Vec::new()), forks, 0, Arc::clone(&settings)).unwrap();

        // Stop signaling for well over a period.
        let quiet = 2100u32;
        for i in 0..quiet {
            let header = BlockHeader {
                version: 4,
                prev_block_hash: [0; 32],
                merkle_root: [0; 32],
                timestamp: 1_500_000_000 + 600 * (i + 1),
                bits: 0x1d00ffff,
                nonce: i,
            };
            incremental = ChainState::from_parent(&incremental, &header).unwrap();
        }
        let height = height + quiet as Natural;
        assert_eq!(incremental.height(), height);

        let map = get_map(height, forks, &settings).unwrap();
        let mut data = uniform_data(height, &map, 0x1d00ffff, signaling, 1_500_000_000);
        // The starting state's own version is the first signaling ancestor.
        let tail = data.ancestor_versions.len() - (quiet as usize - 1);
        for version in &mut data.ancestor_versions[tail..] {
            *version = 4;
        }
        let fresh = ChainState::new(data.clone(), Arc::from(Vec::new()), forks, 0, Arc::clone(&settings)).unwrap();

        assert!(incremental.is_enabled(Forks::SEGWIT));
        assert_eq!(fresh.forks(), incremental.forks());

        // Without the locked-in period the samples decide the same way for both.
        for version in &mut data.ancestor_versions[..tail] {
            *version = 4;
        }
        let never = ChainState::new(data, Arc::from(Vec::new()), forks, 0, settings).unwrap();
        assert!(!never.is_enabled(Forks::SEGWIT));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let settings = settings_with(|s| s.retarget_interval = 0);
        let data = HeightData {
            height: 10,
            hash: None,
            bits: 0x1d00ffff,
            version: 4,
            timestamp: 1_500_000_000,
            ancestor_bits: vec![0x1d00ffff; 10],
            ancestor_versions: vec![4; 10],
            ancestor_timestamps: vec![1_500_000_000; 10],
            timestamp_retarget: 1_500_000_000,
        };
        assert!(matches!(
            get_map(10, Forks::ALL, &settings),
            Err(ConsensusError::InvalidConfiguration(_))
        ));
        let result = ChainState::new(data.clone(), Arc::from(Vec::new()), Forks::ALL, 0, settings);
        assert!(matches!(result, Err(ConsensusError::InvalidConfiguration(_))));

        let settings = settings_with(|s| s.retarget_factor = 0);
        let result = ChainState::new(data, Arc::from(Vec::new()), Forks::ALL, 0, settings);
        assert!(matches!(result, Err(ConsensusError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_bip30_exception() {
        let settings = Arc::new(Settings::mainnet());
        let mut forks = Forks::ALL;
        forks.remove(Forks::BIP90);
        let exception = settings.bip30_exceptions[0];
        let map = get_map(exception.height, forks, &settings).unwrap();
        let mut data = uniform_data(exception.height, &map, 0x1d00ffff, 1, 1_290_000_000);

        let state = ChainState::new(data.clone(), Arc::from(Vec::new()), forks, 0, Arc::clone(&settings)).unwrap();
        assert!(state.is_enabled(Forks::BIP30));

        data.hash = Some(exception.hash);
        let state = ChainState::new(data, Arc::from(Vec::new()), forks, 0, settings).unwrap();
        assert!(!state.is_enabled(Forks::BIP30));
    }

    #[test]
    fn test_configured_forks_bound_activation() {
        let settings = Arc::new(Settings::mainnet());
        let state = state(500_000, settings, Forks::BIP90 | Forks::BIP34);
        assert!(state.is_enabled(Forks::BIP34));
        assert!(!state.is_enabled(Forks::BIP65));
        assert!(!state.is_enabled(Forks::SEGWIT));
        assert_eq!(state.minimum_block_version(), 2);
    }

    #[test]
    fn test_maximum_transaction_version() {
        let settings = Arc::new(Settings::mainnet());
        assert_eq!(state(400_000, Arc::clone(&settings), Forks::ALL).maximum_transaction_version(), 1);
        assert_eq!(state(500_000, settings, Forks::ALL).maximum_transaction_version(), 2);
    }

    // ============================================================================
    // CHECKPOINT AND STALENESS TESTS
    // ============================================================================

    #[test]
    fn test_checkpoints() {
        let settings = Arc::new(Settings::mainnet());
        let map = get_map(11111, Forks::ALL, &settings).unwrap();
        let data = uniform_data(11111, &map, 0x1d00ffff, 1, 1_240_000_000);
        let checkpoints: Arc<[Checkpoint]> = Arc::from(settings.checkpoints.clone());
        let state = ChainState::new(data, checkpoints, Forks::ALL, 0, Arc::clone(&settings)).unwrap();

        let pinned = settings.checkpoints[1];
        assert!(!state.is_checkpoint_conflict(&pinned.hash));
        assert!(state.is_checkpoint_conflict(&[0xab; 32]));
        assert!(state.is_under_checkpoint());
        assert_eq!(state.context().checkpoint(), Some(&pinned.hash));
    }

    #[test]
    fn test_no_checkpoint_no_conflict() {
        let state = state(12_345, Arc::new(Settings::mainnet()), Forks::ALL);
        assert!(!state.is_checkpoint_conflict(&[0xab; 32]));
        assert!(!state.is_under_checkpoint());
    }

    #[test]
    fn test_is_stale_at() {
        let state = state(300_000, Arc::new(Settings::mainnet()), Forks::ALL);
        assert!(!state.is_stale_at(1_500_000_000 + 3600));
        assert!(state.is_stale_at(1_500_000_000 + 3601));
    }

    #[test]
    fn test_context_snapshot() {
        let state = state(500_000, Arc::new(Settings::mainnet()), Forks::ALL);
        let context = state.context();
        assert_eq!(context.height(), 500_000);
        assert_eq!(context.forks(), state.forks());
        assert_eq!(context.median_time_past(), state.median_time_past());
        assert_eq!(context.work_required(), state.work_required());
        assert_eq!(context.lock_time_clock(), state.median_time_past());
    }
}
