//! Test doubles for the EVM side.
//!
//! The Bitcoin mock lives in `hashcredit_spv::mock` (re-exported here);
//! [`MockEvmBridge`] mimics the contract's replay guard so exactly-once
//! tests exercise both halves of the dedupe story.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::evm::{EvmBridge, EvmError, TxOutcome};

pub use hashcredit_spv::mock::{p2pkh_payout_tx, p2wpkh_payout_tx, seed_header_chain, MockChain};

/// In-memory stand-in for `CheckpointManager` + `HashCreditManager`.
#[derive(Default)]
pub struct MockEvmBridge {
    latest_checkpoint: AtomicU32,
    accepted: Mutex<Vec<Vec<u8>>>,
    seen: Mutex<HashSet<Vec<u8>>>,
}

impl MockEvmBridge {
    pub fn new(latest_checkpoint: u32) -> Self {
        Self {
            latest_checkpoint: AtomicU32::new(latest_checkpoint),
            ..Self::default()
        }
    }

    pub fn set_latest_checkpoint(&self, height: u32) {
        self.latest_checkpoint.store(height, Ordering::Relaxed);
    }

    /// Proofs that made it past the replay guard, in submission order.
    pub fn accepted_proofs(&self) -> Vec<Vec<u8>> {
        self.accepted.lock().expect("mock state poisoned").clone()
    }
}

#[async_trait]
impl EvmBridge for MockEvmBridge {
    async fn latest_checkpoint_height(&self) -> Result<u32, EvmError> {
        Ok(self.latest_checkpoint.load(Ordering::Relaxed))
    }

    async fn submit_payout(&self, proof: Vec<u8>) -> Result<TxOutcome, EvmError> {
        // Replay guard: the real contract rejects a (txid, vout) it has
        // already credited; byte-identical proofs are close enough here.
        let mut seen = self.seen.lock().expect("mock state poisoned");
        if !seen.insert(proof.clone()) {
            return Err(EvmError::Revert {
                tx_hash: B256::from([0xEE; 32]),
                gas_used: 21_000,
            });
        }
        drop(seen);

        let mut accepted = self.accepted.lock().expect("mock state poisoned");
        accepted.push(proof);
        let count = accepted.len() as u64;
        Ok(TxOutcome {
            tx_hash: B256::with_last_byte(count as u8),
            block_number: Some(count),
            gas_used: 100_000,
        })
    }
}
