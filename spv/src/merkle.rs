//! Bitcoin Merkle trees over double-SHA-256.
//!
//! A level with odd cardinality duplicates its last node. All hashes are
//! in internal byte order; callers convert display txids before building.

use thiserror::Error;

use crate::hash::{sha256d, Hash256};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot build a Merkle tree over zero leaves")]
    EmptyLeaves,
    #[error("leaf index {index} out of range for {leaves} leaves")]
    IndexOutOfRange { index: u32, leaves: usize },
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut concat = [0u8; 64];
    concat[..32].copy_from_slice(left.as_bytes());
    concat[32..].copy_from_slice(right.as_bytes());
    Hash256::from_internal(sha256d(&concat))
}

/// Merkle root of `leaves`.
pub fn compute_merkle_root(leaves: &[Hash256]) -> Result<Hash256, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyLeaves);
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    Ok(level[0])
}

/// Sibling path for the leaf at `index`, leaf to root.
///
/// Returns `(proof, root)`. A single-leaf tree yields an empty proof and
/// the leaf itself as root.
pub fn generate_merkle_proof(
    leaves: &[Hash256],
    index: u32,
) -> Result<(Vec<Hash256>, Hash256), MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyLeaves);
    }
    if index as usize >= leaves.len() {
        return Err(MerkleError::IndexOutOfRange {
            index,
            leaves: leaves.len(),
        });
    }

    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut index = index as usize;

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        proof.push(level[index ^ 1]);
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
        index /= 2;
    }

    Ok((proof, level[0]))
}

/// Replay a proof from `leaf` at `index` and compare against `root`.
///
/// Bit `k` of the index decides whether the accumulator sits left (0) or
/// right (1) of the k-th sibling. An index that does not fit the proof
/// depth can never have been produced by the generator.
pub fn verify_merkle_proof(leaf: Hash256, root: Hash256, proof: &[Hash256], index: u32) -> bool {
    if proof.len() < 32 && (index as u64) >> proof.len() != 0 {
        return false;
    }
    let mut current = leaf;
    let mut index = index;
    for sibling in proof {
        current = if index & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        index >>= 1;
    }
    current == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Hash256 {
        Hash256::from_internal([n; 32])
    }

    #[test]
    fn empty_tree_is_an_error() {
        assert_eq!(compute_merkle_root(&[]), Err(MerkleError::EmptyLeaves));
        assert_eq!(
            generate_merkle_proof(&[], 0),
            Err(MerkleError::EmptyLeaves)
        );
    }

    #[test]
    fn single_leaf_tree() {
        let a = leaf(1);
        assert_eq!(compute_merkle_root(&[a]).unwrap(), a);
        let (proof, root) = generate_merkle_proof(&[a], 0).unwrap();
        assert!(proof.is_empty());
        assert_eq!(root, a);
        assert!(verify_merkle_proof(a, a, &[], 0));
        // an empty proof only matches position zero
        assert!(!verify_merkle_proof(a, a, &[], 1));
    }

    #[test]
    fn two_leaf_tree() {
        let (a, b) = (leaf(1), leaf(2));
        let root = compute_merkle_root(&[a, b]).unwrap();
        assert_eq!(root, super::hash_pair(&a, &b));

        let (proof_a, root_a) = generate_merkle_proof(&[a, b], 0).unwrap();
        assert_eq!(proof_a, vec![b]);
        assert_eq!(root_a, root);
        let (proof_b, _) = generate_merkle_proof(&[a, b], 1).unwrap();
        assert_eq!(proof_b, vec![a]);

        assert!(verify_merkle_proof(a, root, &proof_a, 0));
        assert!(verify_merkle_proof(b, root, &proof_b, 1));
        // swapped positions must fail
        assert!(!verify_merkle_proof(a, root, &proof_a, 1));
        assert!(!verify_merkle_proof(b, root, &proof_b, 0));
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let expected = super::hash_pair(&super::hash_pair(&a, &b), &super::hash_pair(&c, &c));
        assert_eq!(compute_merkle_root(&[a, b, c]).unwrap(), expected);
    }

    #[test]
    fn proof_inverts_generator() {
        let leaves: Vec<Hash256> = (0..7).map(leaf).collect();
        for count in 1..=leaves.len() {
            let subset = &leaves[..count];
            let root = compute_merkle_root(subset).unwrap();
            for index in 0..count as u32 {
                let (proof, proof_root) = generate_merkle_proof(subset, index).unwrap();
                assert_eq!(proof_root, root);
                assert!(verify_merkle_proof(subset[index as usize], root, &proof, index));
            }
        }
    }

    #[test]
    fn index_out_of_range() {
        assert_eq!(
            generate_merkle_proof(&[leaf(1), leaf(2)], 2),
            Err(MerkleError::IndexOutOfRange {
                index: 2,
                leaves: 2
            })
        );
    }
}
