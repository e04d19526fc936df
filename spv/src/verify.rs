//! Local replay of the on-chain verifier's non-PoW checks.
//!
//! Run before every submission so a malformed proof is caught off-chain.
//! Proof-of-work is deliberately left to the contract.

use thiserror::Error;

use crate::hash::Hash256;
use crate::merkle::verify_merkle_proof;
use crate::proof::SpvProof;
use crate::wire::{BlockHeader, CodecError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("proof carries no headers")]
    EmptyHeaders,
    #[error("tx block index {index} out of range for {headers} headers")]
    TxBlockIndexOutOfRange { index: u32, headers: usize },
    #[error("insufficient confirmations: {got} < {required}")]
    InsufficientConfirmations { got: u32, required: u32 },
    #[error("header chain of {len} blocks exceeds the limit of {max}")]
    HeaderChainTooLong { len: u32, max: u32 },
    #[error("header chain broken at index {0}: prev-hash does not link")]
    BrokenLinkage(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("merkle proof does not reach the target block's root")]
    MerkleMismatch,
}

/// Check header linkage, confirmation depth and Merkle inclusion, exactly
/// as `BtcSpvVerifier` will.
pub fn verify_proof(
    proof: &SpvProof,
    min_confirmations: u32,
    max_header_chain: u32,
) -> Result<(), VerifyError> {
    if proof.headers.is_empty() {
        return Err(VerifyError::EmptyHeaders);
    }
    if proof.tx_block_index as usize >= proof.headers.len() {
        return Err(VerifyError::TxBlockIndexOutOfRange {
            index: proof.tx_block_index,
            headers: proof.headers.len(),
        });
    }

    let confirmations = proof.headers.len() as u32 - proof.tx_block_index;
    if confirmations < min_confirmations {
        return Err(VerifyError::InsufficientConfirmations {
            got: confirmations,
            required: min_confirmations,
        });
    }
    if proof.headers.len() as u32 > max_header_chain {
        return Err(VerifyError::HeaderChainTooLong {
            len: proof.headers.len() as u32,
            max: max_header_chain,
        });
    }

    // Linkage: each header commits to the hash of its predecessor.
    let mut prev_hash: Option<Hash256> = None;
    for (i, raw) in proof.headers.iter().enumerate() {
        let header = BlockHeader::parse(raw)?;
        if let Some(prev) = prev_hash {
            if header.prev_hash != prev {
                return Err(VerifyError::BrokenLinkage(i));
            }
        }
        prev_hash = Some(header.block_hash());
    }

    let tx_block_header = BlockHeader::parse(&proof.headers[proof.tx_block_index as usize])?;
    let txid = Hash256::digest(&proof.raw_tx);
    if !verify_merkle_proof(
        txid,
        tx_block_header.merkle_root,
        &proof.merkle_proof,
        proof.tx_index,
    ) {
        return Err(VerifyError::MerkleMismatch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{p2wpkh_payout_tx, seed_header_chain, MockChain};
    use crate::proof::{ProofBuilder, ProofRequest, MAX_HEADER_CHAIN, MIN_CONFIRMATIONS};
    use std::collections::HashMap;

    async fn build_valid_proof() -> SpvProof {
        let raw_tx = p2wpkh_payout_tx(100_000, [0x55; 20]);
        let txid = Hash256::digest(&raw_tx).to_display_hex();
        let chain = MockChain::new();
        let mut tx_blocks = HashMap::new();
        tx_blocks.insert(800_006, vec![txid.clone()]);
        seed_header_chain(&chain, 800_000, 800_011, &tx_blocks);
        chain.add_raw_tx(&txid, raw_tx);

        ProofBuilder::new(&chain)
            .build_proof(&ProofRequest {
                txid,
                output_index: 0,
                checkpoint_height: 800_000,
                target_height: 800_006,
                borrower: "0x00000000000000000000000000000000000000a1"
                    .parse()
                    .unwrap(),
                tip_height: Some(800_011),
            })
            .await
            .unwrap()
            .proof
    }

    #[tokio::test]
    async fn accepts_a_freshly_built_proof() {
        let proof = build_valid_proof().await;
        verify_proof(&proof, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN).unwrap();
    }

    #[tokio::test]
    async fn corrupting_any_header_breaks_linkage_at_the_next_block() {
        let proof = build_valid_proof().await;
        for corrupt_at in 0..proof.headers.len() - 1 {
            let mut tampered = proof.clone();
            // flip a byte in the nonce so only the hash changes
            tampered.headers[corrupt_at][76] ^= 0xFF;
            let err =
                verify_proof(&tampered, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN).unwrap_err();
            assert_eq!(err, VerifyError::BrokenLinkage(corrupt_at + 1));
        }
    }

    #[tokio::test]
    async fn rejects_wrong_merkle_binding() {
        let mut proof = build_valid_proof().await;
        proof.raw_tx[0] ^= 0x01;
        assert_eq!(
            verify_proof(&proof, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN).unwrap_err(),
            VerifyError::MerkleMismatch
        );
    }

    #[tokio::test]
    async fn rejects_out_of_range_index_and_shallow_chains() {
        let proof = build_valid_proof().await;

        let mut bad = proof.clone();
        bad.tx_block_index = bad.headers.len() as u32;
        assert!(matches!(
            verify_proof(&bad, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN).unwrap_err(),
            VerifyError::TxBlockIndexOutOfRange { .. }
        ));

        let mut shallow = proof.clone();
        shallow.headers.truncate(shallow.tx_block_index as usize + 3);
        assert!(matches!(
            verify_proof(&shallow, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN).unwrap_err(),
            VerifyError::InsufficientConfirmations { got: 3, .. }
        ));

        let mut empty = proof;
        empty.headers.clear();
        assert_eq!(
            verify_proof(&empty, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN).unwrap_err(),
            VerifyError::EmptyHeaders
        );
    }

    #[tokio::test]
    async fn rejects_over_long_chain() {
        let proof = build_valid_proof().await;
        assert!(matches!(
            verify_proof(&proof, MIN_CONFIRMATIONS, 10).unwrap_err(),
            VerifyError::HeaderChainTooLong { len: 11, max: 10 }
        ));
    }
}
