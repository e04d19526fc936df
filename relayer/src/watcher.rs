//! Scans block ranges for outputs paying watched borrower addresses.
//!
//! Watched addresses are decoded to pubkey hashes once at construction;
//! per-block matching is a map lookup. The watcher only discovers and
//! records payouts; confirmation policy belongs to the relayer loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use thiserror::Error;
use tracing::{debug, info};

use hashcredit_spv::adapter::{ChainAdapter, ChainError, VerboseBlock};
use hashcredit_spv::amount::{btc_to_sats, AmountError};
use hashcredit_spv::address::decode_btc_address;
use hashcredit_spv::wire::{extract_pubkey_hash, parse_tx_outputs, CodecError};

use crate::store::{PayoutStore, PendingPayout, StoreError};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("invalid watched bitcoin address `{0}`")]
    InvalidAddress(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A borrower's payout address under watch.
#[derive(Debug, Clone)]
pub struct WatchedAddress {
    pub btc_address: String,
    pub borrower: Address,
    pub enabled: bool,
}

pub struct AddressWatcher {
    chain: Arc<dyn ChainAdapter>,
    store: Arc<dyn PayoutStore>,
    by_pubkey_hash: HashMap<[u8; 20], WatchedAddress>,
}

impl std::fmt::Debug for AddressWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressWatcher")
            .field("by_pubkey_hash", &self.by_pubkey_hash)
            .finish()
    }
}

impl AddressWatcher {
    pub fn new(
        chain: Arc<dyn ChainAdapter>,
        store: Arc<dyn PayoutStore>,
        addresses: Vec<WatchedAddress>,
    ) -> Result<Self, WatcherError> {
        let mut by_pubkey_hash = HashMap::new();
        for watched in addresses.into_iter().filter(|a| a.enabled) {
            let (pubkey_hash, _) = decode_btc_address(&watched.btc_address)
                .ok_or_else(|| WatcherError::InvalidAddress(watched.btc_address.clone()))?;
            by_pubkey_hash.insert(pubkey_hash, watched);
        }
        Ok(Self {
            chain,
            store,
            by_pubkey_hash,
        })
    }

    pub fn watched_count(&self) -> usize {
        self.by_pubkey_hash.len()
    }

    /// Scan `[start, end]` inclusive, ascending; returns freshly inserted
    /// pending payouts in discovery order.
    pub async fn scan_range(
        &self,
        start: u32,
        end: u32,
    ) -> Result<Vec<PendingPayout>, WatcherError> {
        let mut all = Vec::new();
        for height in start..=end {
            all.extend(self.scan_block(height).await?);
        }
        Ok(all)
    }

    pub async fn scan_block(&self, height: u32) -> Result<Vec<PendingPayout>, WatcherError> {
        let block_hash = self.chain.get_block_hash(height).await?;
        debug!(height, block_hash = %block_hash, "scanning block");

        let candidates = match self.chain.get_block_verbose(&block_hash).await? {
            Some(block) => self.candidates_from_verbose(&block)?,
            None => self.candidates_from_raw(&block_hash).await?,
        };

        let mut new_payouts = Vec::new();
        for (txid, vout, watched, amount_sats) in candidates {
            if self.store.is_submitted(&txid, vout)? {
                continue;
            }
            let payout = PendingPayout {
                txid: txid.clone(),
                output_index: vout,
                borrower: watched.borrower,
                btc_address: watched.btc_address.clone(),
                amount_sats,
                block_height: height,
                block_hash: block_hash.clone(),
                first_seen: unix_now(),
            };
            if self.store.add_pending(&payout)? {
                info!(
                    txid = %payout.txid,
                    vout = payout.output_index,
                    borrower = %payout.borrower,
                    amount_sats = payout.amount_sats,
                    height,
                    "found new payout"
                );
                new_payouts.push(payout);
            }
        }

        Ok(new_payouts)
    }

    /// Fast path: the adapter already decoded outputs and amounts.
    fn candidates_from_verbose(
        &self,
        block: &VerboseBlock,
    ) -> Result<Vec<(String, u32, &WatchedAddress, u64)>, WatcherError> {
        let mut out = Vec::new();
        for tx in &block.txs {
            for vout in &tx.outputs {
                let Ok(script) = hex::decode(&vout.script_pubkey_hex) else {
                    continue;
                };
                let Some((pubkey_hash, _)) = extract_pubkey_hash(&script) else {
                    continue;
                };
                let Some(watched) = self.by_pubkey_hash.get(&pubkey_hash) else {
                    continue;
                };
                let amount_sats = btc_to_sats(&vout.value_btc)?;
                out.push((tx.txid.clone(), vout.n, watched, amount_sats));
            }
        }
        Ok(out)
    }

    /// Fallback for adapters without verbose blocks: fetch each raw
    /// transaction and walk its outputs locally.
    async fn candidates_from_raw(
        &self,
        block_hash: &str,
    ) -> Result<Vec<(String, u32, &WatchedAddress, u64)>, WatcherError> {
        let mut out = Vec::new();
        for txid in self.chain.get_block_txids(block_hash).await? {
            let raw_tx = self.chain.get_raw_tx(&txid).await?;
            for (n, output) in parse_tx_outputs(&raw_tx)?.into_iter().enumerate() {
                let Some((pubkey_hash, _)) = extract_pubkey_hash(&output.script_pubkey) else {
                    continue;
                };
                let Some(watched) = self.by_pubkey_hash.get(&pubkey_hash) else {
                    continue;
                };
                out.push((txid.clone(), n as u32, watched, output.value_sats));
            }
        }
        Ok(out)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashcredit_spv::adapter::{VerboseTx, VerboseTxOut};
    use hashcredit_spv::hash::Hash256;
    use hashcredit_spv::mock::{p2wpkh_payout_tx, seed_header_chain, MockChain};

    const WATCHED_ADDR: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
    // pubkey hash of WATCHED_ADDR
    const WATCHED_HASH: [u8; 20] = [
        0x75, 0x1e, 0x76, 0xe8, 0x19, 0x91, 0x96, 0xd4, 0x54, 0x94, 0x1c, 0x45, 0xd1, 0xb3,
        0xa3, 0x23, 0xf1, 0x43, 0x3b, 0xd6,
    ];

    fn borrower() -> Address {
        "0x00000000000000000000000000000000000000a1"
            .parse()
            .unwrap()
    }

    fn watched() -> Vec<WatchedAddress> {
        vec![WatchedAddress {
            btc_address: WATCHED_ADDR.to_string(),
            borrower: borrower(),
            enabled: true,
        }]
    }

    #[test]
    fn disabled_and_invalid_addresses() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(crate::store::MemoryPayoutStore::new());

        let watcher = AddressWatcher::new(
            chain.clone(),
            store.clone(),
            vec![WatchedAddress {
                btc_address: WATCHED_ADDR.to_string(),
                borrower: borrower(),
                enabled: false,
            }],
        )
        .unwrap();
        assert_eq!(watcher.watched_count(), 0);

        let err = AddressWatcher::new(
            chain,
            store,
            vec![WatchedAddress {
                btc_address: "not-an-address".to_string(),
                borrower: borrower(),
                enabled: true,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, WatcherError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn scans_via_raw_tx_fallback() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(crate::store::MemoryPayoutStore::new());

        let raw_tx = p2wpkh_payout_tx(100_000, WATCHED_HASH);
        let txid = Hash256::digest(&raw_tx).to_display_hex();
        let mut tx_blocks = HashMap::new();
        tx_blocks.insert(100u32, vec![txid.clone()]);
        seed_header_chain(&chain, 99, 101, &tx_blocks);
        chain.add_raw_tx(&txid, raw_tx);

        let watcher = AddressWatcher::new(chain, store.clone(), watched()).unwrap();
        let found = watcher.scan_range(99, 101).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].txid, txid);
        assert_eq!(found[0].amount_sats, 100_000);
        assert_eq!(found[0].block_height, 100);
        assert_eq!(found[0].borrower, borrower());

        // rescanning the same range discovers nothing new
        assert!(watcher.scan_range(99, 101).await.unwrap().is_empty());
        assert_eq!(store.get_pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scans_via_verbose_block_with_exact_amounts() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(crate::store::MemoryPayoutStore::new());

        let tx_blocks = HashMap::new();
        let hashes = seed_header_chain(&chain, 200, 200, &tx_blocks);
        let block_hash = hashes.get(&200).unwrap().clone();
        let txid = "aa".repeat(32);
        chain.add_verbose_block(
            &block_hash,
            VerboseBlock {
                txs: vec![VerboseTx {
                    txid: txid.clone(),
                    outputs: vec![
                        VerboseTxOut {
                            n: 0,
                            value_btc: "0.1".to_string(),
                            script_pubkey_hex: format!("0014{}", hex::encode(WATCHED_HASH)),
                        },
                        // unwatched output is ignored
                        VerboseTxOut {
                            n: 1,
                            value_btc: "0.2".to_string(),
                            script_pubkey_hex: format!("0014{}", "00".repeat(20)),
                        },
                    ],
                }],
            },
        );

        let watcher = AddressWatcher::new(chain, store, watched()).unwrap();
        let found = watcher.scan_block(200).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].output_index, 0);
        assert_eq!(found[0].amount_sats, 10_000_000);
    }

    #[tokio::test]
    async fn submitted_outputs_are_skipped() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(crate::store::MemoryPayoutStore::new());

        let raw_tx = p2wpkh_payout_tx(100_000, WATCHED_HASH);
        let txid = Hash256::digest(&raw_tx).to_display_hex();
        let mut tx_blocks = HashMap::new();
        tx_blocks.insert(100u32, vec![txid.clone()]);
        seed_header_chain(&chain, 100, 100, &tx_blocks);
        chain.add_raw_tx(&txid, raw_tx);

        let watcher = AddressWatcher::new(chain, store.clone(), watched()).unwrap();
        let first = watcher.scan_block(100).await.unwrap();
        assert_eq!(first.len(), 1);
        store.mark_submitted(&txid, 0, "0xfeed").unwrap();

        assert!(watcher.scan_block(100).await.unwrap().is_empty());
        assert!(store.get_pending().unwrap().is_empty());
    }
}
