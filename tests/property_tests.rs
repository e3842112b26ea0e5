//! Property tests and byte fixtures

use consensus_core::economic::block_subsidy;
use consensus_core::pow::check_proof_of_work;
use consensus_core::serialization::block::{deserialize_header, header_hash};
use consensus_core::constants::MAX_MONEY;
use consensus_core::types::*;
use consensus_core::{ChainState, Consensus, HeightData, Settings};
use proptest::prelude::*;

const GENESIS_HEADER: &str = concat!(
    "01000000",
    "0000000000000000000000000000000000000000000000000000000000000000",
    "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a",
    "29ab5f49",
    "ffff001d",
    "1dac2b7c",
);

#[test]
fn test_genesis_header_fixture() {
    let bytes = hex::decode(GENESIS_HEADER).unwrap();
    assert_eq!(bytes.len(), 80);

    let header = deserialize_header(&bytes).unwrap();
    assert_eq!(header.version, 1);
    assert_eq!(header.bits, 0x1d00ffff);
    assert_eq!(header.nonce, 2_083_236_893);

    let settings = Settings::mainnet();
    assert_eq!(header_hash(&header), settings.checkpoints[0].hash);
    assert!(check_proof_of_work(&header, settings.proof_of_work_limit).unwrap());
}

fn regtest_state(height: Natural, timestamp: u32) -> (Consensus, ChainState) {
    let consensus = Consensus::new(Settings::regtest()).unwrap();
    let map = consensus.sample_map(height).unwrap();
    let data = HeightData {
        height,
        hash: None,
        bits: 0x207fffff,
        version: 4,
        timestamp,
        ancestor_bits: vec![0x207fffff; map.bits.count],
        ancestor_versions: vec![4; map.versions.count],
        ancestor_timestamps: vec![timestamp.saturating_sub(1); map.timestamps.count],
        timestamp_retarget: 0,
    };
    let state = consensus.chain_state(data).unwrap();
    (consensus, state)
}

fn spending(script_sig: Vec<u8>) -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![TransactionInput {
            prevout: OutPoint {
                hash: [4; 32],
                index: 0,
            },
            script_sig,
            sequence: 0xffffffff,
            witness: Vec::new(),
        }],
        outputs: vec![TransactionOutput {
            value: 1,
            script_pubkey: Vec::new(),
        }],
        lock_time: 0,
    }
}

proptest! {
    #[test]
    fn prop_script_evaluation_is_deterministic(
        script_sig in proptest::collection::vec(any::<u8>(), 0..64),
        script_pubkey in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let (consensus, state) = regtest_state(10, 1_600_000_000);
        let tx = spending(script_sig);
        let prevout = TransactionOutput { value: 1, script_pubkey };

        let first = consensus.verify_input(&tx, 0, &prevout, &state);
        let second = consensus.verify_input(&tx, 0, &prevout, &state);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_chain_state_is_deterministic(height in 1u64..5000, timestamp in 1u32..2_000_000_000) {
        let (_, first) = regtest_state(height, timestamp);
        let (_, second) = regtest_state(height, timestamp);
        prop_assert_eq!(first.forks(), second.forks());
        prop_assert_eq!(first.median_time_past(), second.median_time_past());
        prop_assert_eq!(first.work_required(), second.work_required());
        prop_assert_eq!(first.minimum_block_version(), second.minimum_block_version());
    }

    #[test]
    fn prop_subsidy_never_increases(height in 0u64..20_000_000) {
        let settings = Settings::mainnet();
        let next = height + settings.subsidy_interval;
        prop_assert!(block_subsidy(next, &settings, true) <= block_subsidy(height, &settings, true));
    }

    #[test]
    fn prop_output_values_outside_money_range_are_rejected(value in prop_oneof![
        i64::MIN..0i64,
        (MAX_MONEY + 1)..i64::MAX,
    ]) {
        let mut tx = spending(vec![0x51]);
        tx.outputs[0].value = value;
        prop_assert!(Consensus::mainnet().check_transaction(&tx).is_err());
    }
}
