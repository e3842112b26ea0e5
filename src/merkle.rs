//! Merkle roots
//!
//! The tree duplicates the last hash of an odd level, so a transaction list
//! whose tail repeats an identical subtree hashes to the same root as the
//! list without it (CVE-2012-2459). Roots are computed together with a
//! mutation flag that detects this.

use crate::serialization::double_sha256;
use crate::serialization::transaction::{txid, wtxid};
use crate::types::*;

/// ComputeMerkleRoot: [ℍ] → ℍ × {mutated}
///
/// 1. An empty list has the zero root
/// 2. Each level pairs adjacent hashes, duplicating an odd last hash
/// 3. Two equal hashes in one pair mark the tree as mutated
pub fn merkle_root(mut hashes: Vec<Hash>) -> (Hash, bool) {
    if hashes.is_empty() {
        return ([0u8; 32], false);
    }

    let mut mutated = false;
    while hashes.len() > 1 {
        mutated |= hashes
            .chunks_exact(2)
            .any(|pair| pair[0] == pair[1]);

        if hashes.len() % 2 == 1 {
            if let Some(&last) = hashes.last() {
                hashes.push(last);
            }
        }

        hashes = hashes
            .chunks_exact(2)
            .map(|pair| {
                let mut concatenated = [0u8; 64];
                concatenated[..32].copy_from_slice(&pair[0]);
                concatenated[32..].copy_from_slice(&pair[1]);
                double_sha256(&concatenated)
            })
            .collect();
    }

    (hashes[0], mutated)
}

/// Root over transaction ids and whether the list is mutated.
pub fn block_merkle_root(block: &Block) -> (Hash, bool) {
    merkle_root(block.transactions().iter().map(txid).collect())
}

/// Root over witness transaction ids; the coinbase contributes zero.
pub fn witness_merkle_root(block: &Block) -> Hash {
    let hashes = block
        .transactions()
        .iter()
        .enumerate()
        .map(|(index, tx)| if index == 0 { [0u8; 32] } else { wtxid(tx) })
        .collect();
    merkle_root(hashes).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Hash {
        [byte; 32]
    }

    fn pair(left: Hash, right: Hash) -> Hash {
        let mut data = left.to_vec();
        data.extend_from_slice(&right);
        double_sha256(&data)
    }

    #[test]
    fn test_single_leaf_is_the_root() {
        assert_eq!(merkle_root(vec![leaf(1)]), (leaf(1), false));
        assert_eq!(merkle_root(Vec::new()), ([0u8; 32], false));
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let expected = pair(pair(a, b), pair(c, c));
        assert_eq!(merkle_root(vec![a, b, c]), (expected, false));
    }

    #[test]
    fn test_duplicated_tail_is_detected() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let (root, mutated) = merkle_root(vec![a, b, c]);
        let (mutated_root, detected) = merkle_root(vec![a, b, c, c]);
        assert!(!mutated);
        assert!(detected);
        assert_eq!(root, mutated_root);
    }

    #[test]
    fn test_duplicated_subtree_is_detected() {
        let leaves: Vec<Hash> = (1..=6).map(leaf).collect();
        let (root, _) = merkle_root(leaves.clone());

        let mut extended = leaves.clone();
        extended.extend_from_slice(&leaves[4..6]);
        let (extended_root, mutated) = merkle_root(extended);
        assert_eq!(root, extended_root);
        assert!(mutated);
    }
}
