//! Segregated witness block rules
//!
//! Weight(b) = 3 × |Serialize(b ∖ witness)| + |Serialize(b)|

use crate::constants::*;
use crate::error::ValidationError;
use crate::merkle::witness_merkle_root;
use crate::serialization::double_sha256;
use crate::serialization::transaction::serialized_size;
use crate::types::*;

/// Weight of a single transaction.
pub fn transaction_weight(tx: &Transaction) -> usize {
    let base = serialized_size(tx, false);
    let total = serialized_size(tx, true);
    base * (WITNESS_SCALE_FACTOR - 1) + total
}

/// Weight of a block, from its memoized sizes.
pub fn block_weight(block: &Block) -> usize {
    block.sizes().weight
}

/// The commitment carried by the last coinbase output that matches the
/// commitment header.
pub fn witness_commitment(coinbase: &Transaction) -> Option<Hash> {
    coinbase.outputs.iter().rev().find_map(|output| {
        let script = &output.script_pubkey;
        if script.len() >= 38 && script.starts_with(&WITNESS_COMMITMENT_HEADER) {
            let mut commitment = [0u8; 32];
            commitment.copy_from_slice(&script[6..38]);
            Some(commitment)
        } else {
            None
        }
    })
}

/// CheckWitnessCommitment: ℬ → {valid, invalid}
///
/// 1. With a commitment, the coinbase witness is one 32-byte reserved value
///    and the commitment is SHA256d(witness root ‖ reserved value)
/// 2. Without one, no transaction may carry witness data
pub fn check_witness_commitment(block: &Block) -> Result<(), ValidationError> {
    let Some(coinbase) = block.transactions().first() else {
        return Err(ValidationError::EmptyBlock);
    };

    match witness_commitment(coinbase) {
        Some(commitment) => {
            let reserved = match coinbase.inputs.first().map(|input| input.witness.as_slice()) {
                Some([reserved]) if reserved.len() == 32 => reserved,
                _ => return Err(ValidationError::InvalidWitnessCommitment),
            };

            let mut preimage = witness_merkle_root(block).to_vec();
            preimage.extend_from_slice(reserved);
            if double_sha256(&preimage) != commitment {
                return Err(ValidationError::InvalidWitnessCommitment);
            }
            Ok(())
        }
        None if block.transactions().iter().any(Transaction::has_witness) => {
            Err(ValidationError::UnexpectedWitness)
        }
        None => Ok(()),
    }
}

/// Coinbase output script committing to `witness_root` with `reserved`.
pub fn commitment_script(witness_root: &Hash, reserved: &[u8; 32]) -> ByteString {
    let mut preimage = witness_root.to_vec();
    preimage.extend_from_slice(reserved);
    let mut script = WITNESS_COMMITMENT_HEADER.to_vec();
    script.extend_from_slice(&double_sha256(&preimage));
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(witness: Witness, prevout: OutPoint) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout,
                script_sig: vec![0x51, 0x51],
                sequence: u32::MAX,
                witness,
            }],
            outputs: vec![TransactionOutput {
                value: 1,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn header() -> BlockHeader {
        BlockHeader {
            version: 4,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp: 0,
            bits: 0x207fffff,
            nonce: 0,
        }
    }

    fn committed_block() -> Block {
        let coinbase = transaction(vec![vec![0; 32]], OutPoint::NULL);
        let spend = transaction(
            vec![vec![1, 2, 3]],
            OutPoint {
                hash: [9; 32],
                index: 0,
            },
        );
        let mut block = Block::new(header(), vec![coinbase, spend]);
        let root = witness_merkle_root(&block);
        block.transactions_mut()[0].outputs.push(TransactionOutput {
            value: 0,
            script_pubkey: commitment_script(&root, &[0; 32]),
        });
        // Coinbase contributes zero to the witness root, so the push above
        // leaves the root unchanged.
        block
    }

    #[test]
    fn test_transaction_weight() {
        let plain = transaction(Vec::new(), OutPoint::NULL);
        assert_eq!(transaction_weight(&plain), serialized_size(&plain, false) * 4);

        let witnessed = transaction(vec![vec![1; 10]], OutPoint::NULL);
        let base = serialized_size(&witnessed, false);
        // marker, flag, item count, item length, item
        assert_eq!(transaction_weight(&witnessed), base * 4 + 2 + 1 + 1 + 10);
    }

    #[test]
    fn test_valid_commitment() {
        assert_eq!(check_witness_commitment(&committed_block()), Ok(()));
    }

    #[test]
    fn test_commitment_mismatch() {
        let mut block = committed_block();
        block.transactions_mut()[1].inputs[0].witness = vec![vec![4]];
        assert_eq!(
            check_witness_commitment(&block),
            Err(ValidationError::InvalidWitnessCommitment)
        );
    }

    #[test]
    fn test_reserved_value_shape() {
        let mut block = committed_block();
        block.transactions_mut()[0].inputs[0].witness = vec![vec![0; 31]];
        assert_eq!(
            check_witness_commitment(&block),
            Err(ValidationError::InvalidWitnessCommitment)
        );
    }

    #[test]
    fn test_witness_without_commitment() {
        let coinbase = transaction(Vec::new(), OutPoint::NULL);
        let spend = transaction(vec![vec![1]], OutPoint { hash: [9; 32], index: 0 });
        let block = Block::new(header(), vec![coinbase.clone(), spend]);
        assert_eq!(check_witness_commitment(&block), Err(ValidationError::UnexpectedWitness));

        let block = Block::new(header(), vec![coinbase]);
        assert_eq!(check_witness_commitment(&block), Ok(()));
    }
}
