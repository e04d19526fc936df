//! In-memory chain adapter and synthetic-chain fixtures.
//!
//! This is the backbone of the unit and integration tests: every query is
//! served from maps populated up front, and the fixture helpers produce
//! header chains whose linkage and Merkle roots are genuinely valid.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::adapter::{ChainAdapter, ChainError, HeaderInfo, VerboseBlock};
use crate::hash::Hash256;
use crate::merkle::compute_merkle_root;
use crate::wire::{write_varint, BlockHeader, HEADER_LEN};

#[derive(Default)]
struct MockState {
    height_to_hash: HashMap<u32, String>,
    headers: HashMap<String, [u8; HEADER_LEN]>,
    header_infos: HashMap<String, HeaderInfo>,
    txids: HashMap<String, Vec<String>>,
    raw_txs: HashMap<String, Vec<u8>>,
    verbose: HashMap<String, VerboseBlock>,
}

/// Chain adapter backed by in-memory maps.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
    header_fetches: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block; the display hash is derived from the header bytes.
    pub fn add_block(&self, height: u32, header: [u8; HEADER_LEN], txids: Vec<String>) -> String {
        let hash = Hash256::digest(&header).to_display_hex();
        let mut state = self.state.lock().expect("mock state poisoned");
        state.height_to_hash.insert(height, hash.clone());
        state.headers.insert(hash.clone(), header);
        state.txids.insert(hash.clone(), txids);
        hash
    }

    pub fn add_header_info(&self, block_hash: &str, info: HeaderInfo) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.header_infos.insert(block_hash.to_string(), info);
    }

    pub fn add_raw_tx(&self, txid: &str, raw: Vec<u8>) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.raw_txs.insert(txid.to_string(), raw);
    }

    pub fn add_verbose_block(&self, block_hash: &str, block: VerboseBlock) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.verbose.insert(block_hash.to_string(), block);
    }

    /// How many raw headers have been served; lets tests pin down how much
    /// chain traffic an operation produced.
    pub fn header_fetch_count(&self) -> usize {
        self.header_fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn get_tip_height(&self) -> Result<u32, ChainError> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .height_to_hash
            .keys()
            .max()
            .copied()
            .ok_or(ChainError::HeightNotFound(0))
    }

    async fn get_block_hash(&self, height: u32) -> Result<String, ChainError> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .height_to_hash
            .get(&height)
            .cloned()
            .ok_or(ChainError::HeightNotFound(height))
    }

    async fn get_block_header_bytes(&self, block_hash: &str) -> Result<[u8; 80], ChainError> {
        self.header_fetches.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock().expect("mock state poisoned");
        state
            .headers
            .get(block_hash)
            .copied()
            .ok_or_else(|| ChainError::BlockNotFound(block_hash.to_string()))
    }

    async fn get_block_header_info(&self, block_hash: &str) -> Result<HeaderInfo, ChainError> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .header_infos
            .get(block_hash)
            .cloned()
            .ok_or_else(|| ChainError::BlockNotFound(block_hash.to_string()))
    }

    async fn get_block_txids(&self, block_hash: &str) -> Result<Vec<String>, ChainError> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .txids
            .get(block_hash)
            .cloned()
            .ok_or_else(|| ChainError::BlockNotFound(block_hash.to_string()))
    }

    async fn get_raw_tx(&self, txid: &str) -> Result<Vec<u8>, ChainError> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .raw_txs
            .get(txid)
            .cloned()
            .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))
    }

    async fn get_block_verbose(&self, block_hash: &str) -> Result<Option<VerboseBlock>, ChainError> {
        let state = self.state.lock().expect("mock state poisoned");
        Ok(state.verbose.get(block_hash).cloned())
    }
}

// ===================== Synthetic fixtures =====================

/// A minimal transaction paying `value_sats` to a single P2WPKH output.
pub fn p2wpkh_payout_tx(value_sats: u64, pubkey_hash: [u8; 20]) -> Vec<u8> {
    let script: Vec<u8> = [vec![0x00, 0x14], pubkey_hash.to_vec()].concat();
    single_output_tx(value_sats, &script)
}

/// A minimal transaction paying `value_sats` to a single P2PKH output.
pub fn p2pkh_payout_tx(value_sats: u64, pubkey_hash: [u8; 20]) -> Vec<u8> {
    let script: Vec<u8> = [vec![0x76, 0xA9, 0x14], pubkey_hash.to_vec(), vec![0x88, 0xAC]].concat();
    single_output_tx(value_sats, &script)
}

fn single_output_tx(value_sats: u64, script: &[u8]) -> Vec<u8> {
    let mut tx = vec![0x02, 0x00, 0x00, 0x00];
    tx.push(0x01);
    tx.extend_from_slice(&[0u8; 36]);
    tx.push(0x00);
    tx.extend_from_slice(&[0xFF; 4]);
    tx.push(0x01);
    tx.extend_from_slice(&value_sats.to_le_bytes());
    tx.extend_from_slice(&write_varint(script.len() as u64));
    tx.extend_from_slice(script);
    tx.extend_from_slice(&[0u8; 4]);
    tx
}

/// Populate `chain` with a linked header chain over `start..=end`.
///
/// `tx_blocks` maps heights to the display txids that block should carry;
/// the Merkle root of those heights is computed for real, other blocks get
/// a height-derived placeholder root. Returns the display hash per height.
pub fn seed_header_chain(
    chain: &MockChain,
    start: u32,
    end: u32,
    tx_blocks: &HashMap<u32, Vec<String>>,
) -> HashMap<u32, String> {
    let mut prev_hash = Hash256::from_internal([0u8; 32]);
    let mut hashes = HashMap::new();

    for height in start..=end {
        let txids = tx_blocks.get(&height).cloned().unwrap_or_default();
        let merkle_root = if txids.is_empty() {
            let mut filler = [0u8; 32];
            filler[..4].copy_from_slice(&height.to_le_bytes());
            Hash256::from_internal(filler)
        } else {
            let leaves: Vec<Hash256> = txids
                .iter()
                .map(|t| Hash256::from_display_hex(t).expect("fixture txid"))
                .collect();
            compute_merkle_root(&leaves).expect("fixture leaves")
        };

        let header = BlockHeader {
            version: 0x2000_0000,
            prev_hash,
            merkle_root,
            time: 1_700_000_000 + height,
            bits: 0x1D00_FFFF,
            nonce: height,
        };
        let raw = header.serialize();
        prev_hash = header.block_hash();
        let display = chain.add_block(height, raw, txids);
        hashes.insert(height, display);
    }

    hashes
}
