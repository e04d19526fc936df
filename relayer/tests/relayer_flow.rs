//! End-to-end relayer flow over the in-memory chain, store and EVM mocks:
//! scan, confirm, checkpoint-gate, build, verify, submit, record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;

use hashcredit_chain::evm::EvmBridge;
use hashcredit_chain::mock::{p2wpkh_payout_tx, seed_header_chain, MockChain, MockEvmBridge};
use hashcredit_spv::hash::Hash256;
use hashcredit_spv::mock::p2pkh_payout_tx;

use hashcredit_relayer::relayer::{Relayer, RelayerConfig};
use hashcredit_relayer::store::{MemoryPayoutStore, PayoutStore};
use hashcredit_relayer::watcher::WatchedAddress;

const WATCHED_ADDR: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
// pubkey hash behind WATCHED_ADDR (BIP-173 test vector)
const WATCHED_HASH: [u8; 20] = [
    0x75, 0x1e, 0x76, 0xe8, 0x19, 0x91, 0x96, 0xd4, 0x54, 0x94, 0x1c, 0x45, 0xd1, 0xb3, 0xa3,
    0x23, 0xf1, 0x43, 0x3b, 0xd6,
];

const CHECKPOINT: u32 = 800_000;
const TARGET: u32 = 800_006;
const TIP: u32 = 800_011;

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

fn config() -> RelayerConfig {
    RelayerConfig {
        required_confirmations: 6,
        max_header_chain: 144,
        poll_interval: Duration::from_millis(1),
        // first scan starts at tip - batch, which must stay inside the
        // seeded fixture range
        scan_batch_size: 10,
    }
}

/// Chain with one watched payout confirmed at TARGET, tip at TIP.
fn payout_chain(raw_tx: Vec<u8>) -> (Arc<MockChain>, String) {
    let chain = Arc::new(MockChain::new());
    let txid = Hash256::digest(&raw_tx).to_display_hex();
    let mut tx_blocks = HashMap::new();
    tx_blocks.insert(TARGET, vec![txid.clone()]);
    seed_header_chain(&chain, CHECKPOINT, TIP, &tx_blocks);
    chain.add_raw_tx(&txid, raw_tx);
    (chain, txid)
}

#[tokio::test]
async fn discovers_confirms_and_submits_exactly_once() {
    let (chain, txid) = payout_chain(p2wpkh_payout_tx(100_000, WATCHED_HASH));
    let evm = Arc::new(MockEvmBridge::new(CHECKPOINT));
    let store = Arc::new(MemoryPayoutStore::new());

    let mut relayer = Relayer::new(
        chain.clone(),
        evm.clone(),
        store.clone(),
        watched(),
        config(),
    )
    .unwrap();

    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.discovered, 1);
    assert_eq!(stats.submitted, 1);

    // pending moved to submitted, proof accepted on-chain
    assert!(store.get_pending().unwrap().is_empty());
    assert!(store.is_submitted(&txid, 0).unwrap());
    let submitted = store.get_submitted().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].amount_sats, 100_000);
    assert_eq!(submitted[0].borrower, borrower());
    assert!(!submitted[0].evm_tx_hash.is_empty());
    assert_eq!(evm.accepted_proofs().len(), 1);

    // a second iteration neither rediscovers nor resubmits
    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats, Default::default());
    assert_eq!(evm.accepted_proofs().len(), 1);

    // even a forced duplicate submission dies on the replay guard
    let proof = evm.accepted_proofs().remove(0);
    assert!(evm.submit_payout(proof).await.is_err());
}

#[tokio::test]
async fn p2pkh_payouts_flow_through_as_well() {
    let (chain, txid) = payout_chain(p2pkh_payout_tx(77_000, WATCHED_HASH));
    let evm = Arc::new(MockEvmBridge::new(CHECKPOINT));
    let store = Arc::new(MemoryPayoutStore::new());

    let mut relayer =
        Relayer::new(chain, evm.clone(), store.clone(), watched(), config()).unwrap();
    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.submitted, 1);
    assert!(store.is_submitted(&txid, 0).unwrap());
}

#[tokio::test]
async fn waits_for_confirmations() {
    // tip only 4 blocks above the payout: 5 confirmations, need 6
    let chain = Arc::new(MockChain::new());
    let raw_tx = p2wpkh_payout_tx(50_000, WATCHED_HASH);
    let txid = Hash256::digest(&raw_tx).to_display_hex();
    let mut tx_blocks = HashMap::new();
    tx_blocks.insert(TARGET, vec![txid.clone()]);
    seed_header_chain(&chain, CHECKPOINT, TARGET + 4, &tx_blocks);
    chain.add_raw_tx(&txid, raw_tx);

    let evm = Arc::new(MockEvmBridge::new(CHECKPOINT));
    let store = Arc::new(MemoryPayoutStore::new());
    let mut relayer =
        Relayer::new(chain, evm.clone(), store.clone(), watched(), config()).unwrap();

    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.discovered, 1);
    assert_eq!(stats.submitted, 0);
    assert_eq!(store.get_pending().unwrap().len(), 1);
    assert!(evm.accepted_proofs().is_empty());
}

#[tokio::test]
async fn holds_payouts_without_a_usable_checkpoint() {
    let (chain, txid) = payout_chain(p2wpkh_payout_tx(100_000, WATCHED_HASH));
    // no checkpoint registered at all
    let evm = Arc::new(MockEvmBridge::new(0));
    let store = Arc::new(MemoryPayoutStore::new());
    let mut relayer = Relayer::new(
        chain.clone(),
        evm.clone(),
        store.clone(),
        watched(),
        config(),
    )
    .unwrap();

    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.submitted, 0);
    assert_eq!(store.get_pending().unwrap().len(), 1);

    // a checkpoint at or above the payout block is unusable
    evm.set_latest_checkpoint(TARGET);
    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.submitted, 0);

    // once a proper anchor appears, the retained row goes through
    evm.set_latest_checkpoint(CHECKPOINT);
    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.submitted, 1);
    assert!(store.is_submitted(&txid, 0).unwrap());
}

#[tokio::test]
async fn rejects_checkpoint_outside_header_window() {
    let (chain, _txid) = payout_chain(p2wpkh_payout_tx(100_000, WATCHED_HASH));
    let evm = Arc::new(MockEvmBridge::new(CHECKPOINT));
    let store = Arc::new(MemoryPayoutStore::new());

    let mut tight = config();
    tight.max_header_chain = 8; // tip - checkpoint = 11 > 8
    let mut relayer =
        Relayer::new(chain, evm.clone(), store.clone(), watched(), tight).unwrap();

    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.submitted, 0);
    assert_eq!(store.get_pending().unwrap().len(), 1);
    assert!(evm.accepted_proofs().is_empty());
}

#[tokio::test]
async fn reorged_pending_rows_are_dropped() {
    let (chain, txid) = payout_chain(p2wpkh_payout_tx(100_000, WATCHED_HASH));
    let evm = Arc::new(MockEvmBridge::new(CHECKPOINT));
    let store = Arc::new(MemoryPayoutStore::new());

    // discover the payout but keep it unconfirmed for now
    let mut waiting = config();
    waiting.required_confirmations = 60;
    let mut relayer = Relayer::new(
        chain.clone(),
        evm.clone(),
        store.clone(),
        watched(),
        waiting,
    )
    .unwrap();
    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.discovered, 1);
    assert_eq!(store.get_pending().unwrap().len(), 1);

    // reorg: a different block now sits at the payout height
    let mut replacement = [0u8; 80];
    replacement[0] = 0xAB;
    chain.add_block(TARGET, replacement, vec![]);

    let stats = relayer.run_once().await.unwrap();
    assert_eq!(stats.submitted, 0);
    assert!(store.get_pending().unwrap().is_empty());
    assert!(!store.is_submitted(&txid, 0).unwrap());
    assert!(evm.accepted_proofs().is_empty());
}

#[tokio::test]
async fn stop_flag_ends_the_loop() {
    let (chain, _txid) = payout_chain(p2wpkh_payout_tx(100_000, WATCHED_HASH));
    let evm = Arc::new(MockEvmBridge::new(CHECKPOINT));
    let store = Arc::new(MemoryPayoutStore::new());
    let mut relayer =
        Relayer::new(chain, evm.clone(), store.clone(), watched(), config()).unwrap();

    let stop = relayer.stop_handle();
    let handle = tokio::spawn(async move {
        relayer.run().await;
    });

    // the in-flight iteration completes and records its receipt
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("relayer loop should exit after stop")
        .unwrap();

    assert_eq!(evm.accepted_proofs().len(), 1);
    assert!(store.get_pending().unwrap().is_empty());
}
