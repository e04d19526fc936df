//! The relayer control loop: scan → confirm → checkpoint-select → build →
//! verify → submit → record.
//!
//! One cooperative task; every chain, EVM and store access is the only
//! place it suspends. Errors inside an iteration are logged and the loop
//! keeps going; a stop flag is polled at loop boundaries so an in-flight
//! submission always gets its receipt recorded before exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use hashcredit_chain::evm::{EvmBridge, EvmError};
use hashcredit_spv::adapter::{ChainAdapter, ChainError};
use hashcredit_spv::proof::{ProofBuilder, ProofError, ProofRequest};
use hashcredit_spv::verify::{verify_proof, VerifyError};

use crate::store::{PayoutStore, PendingPayout, StoreError};
use crate::watcher::{AddressWatcher, WatchedAddress, WatcherError};

#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub required_confirmations: u32,
    /// Must match the verifier contract's constant.
    pub max_header_chain: u32,
    pub poll_interval: Duration,
    /// Blocks scanned per iteration.
    pub scan_batch_size: u32,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            required_confirmations: 6,
            max_header_chain: 144,
            poll_interval: Duration::from_secs(60),
            scan_batch_size: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayerError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

#[derive(Debug, Error)]
enum SubmitError {
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Evm(#[from] EvmError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Cooperative cancellation for a running relayer.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// What one iteration accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterationStats {
    pub discovered: usize,
    pub submitted: usize,
}

pub struct Relayer {
    chain: Arc<dyn ChainAdapter>,
    evm: Arc<dyn EvmBridge>,
    store: Arc<dyn PayoutStore>,
    watcher: AddressWatcher,
    config: RelayerConfig,
    last_scanned_height: Option<u32>,
    stop: Arc<AtomicBool>,
}

impl Relayer {
    pub fn new(
        chain: Arc<dyn ChainAdapter>,
        evm: Arc<dyn EvmBridge>,
        store: Arc<dyn PayoutStore>,
        watched: Vec<WatchedAddress>,
        config: RelayerConfig,
    ) -> Result<Self, WatcherError> {
        let watcher = AddressWatcher::new(chain.clone(), store.clone(), watched)?;
        Ok(Self {
            chain,
            evm,
            store,
            watcher,
            config,
            last_scanned_height: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Run until the stop flag is raised.
    pub async fn run(&mut self) {
        info!(
            watched = self.watcher.watched_count(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "starting relayer"
        );
        while !self.stop.load(Ordering::Relaxed) {
            match self.run_once().await {
                Ok(stats) if stats.discovered > 0 || stats.submitted > 0 => {
                    info!(
                        discovered = stats.discovered,
                        submitted = stats.submitted,
                        "relayer iteration complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "relayer iteration failed"),
            }
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        info!("relayer stopped");
    }

    /// One full iteration: scan new blocks, then push every sufficiently
    /// confirmed pending payout through the proof pipeline.
    pub async fn run_once(&mut self) -> Result<IterationStats, RelayerError> {
        let tip = self.chain.get_tip_height().await?;
        let discovered = self.scan_new_blocks(tip).await?.len();
        let submitted = self.process_pending(tip).await?;
        Ok(IterationStats {
            discovered,
            submitted,
        })
    }

    async fn scan_new_blocks(&mut self, tip: u32) -> Result<Vec<PendingPayout>, RelayerError> {
        let last = *self
            .last_scanned_height
            .get_or_insert_with(|| tip.saturating_sub(self.config.scan_batch_size));
        if tip <= last {
            return Ok(Vec::new());
        }

        let start = last + 1;
        let end = tip.min(last + self.config.scan_batch_size);
        debug!(start, end, "scanning blocks");
        let payouts = self.watcher.scan_range(start, end).await?;
        self.last_scanned_height = Some(end);
        Ok(payouts)
    }

    async fn process_pending(&self, tip: u32) -> Result<usize, RelayerError> {
        let mut submitted = 0;
        for payout in self.store.get_pending()? {
            // Reorg check: the block we saw the payout in must still be
            // the canonical block at that height.
            match self.chain.get_block_hash(payout.block_height).await {
                Ok(hash) if hash.eq_ignore_ascii_case(&payout.block_hash) => {}
                Ok(hash) => {
                    warn!(
                        txid = %payout.txid,
                        vout = payout.output_index,
                        height = payout.block_height,
                        saw = %payout.block_hash,
                        now = %hash,
                        "payout block orphaned; dropping pending row"
                    );
                    self.store.remove_pending(&payout.txid, payout.output_index)?;
                    continue;
                }
                Err(ChainError::HeightNotFound(_)) => {
                    warn!(
                        txid = %payout.txid,
                        height = payout.block_height,
                        "payout height no longer on chain; dropping pending row"
                    );
                    self.store.remove_pending(&payout.txid, payout.output_index)?;
                    continue;
                }
                Err(e) => {
                    warn!(txid = %payout.txid, error = %e, "reorg check failed; retrying next tick");
                    continue;
                }
            }

            let confirmations = tip.saturating_sub(payout.block_height) + 1;
            if confirmations < self.config.required_confirmations {
                debug!(
                    txid = %payout.txid,
                    confirmations,
                    required = self.config.required_confirmations,
                    "waiting for confirmations"
                );
                continue;
            }

            let checkpoint = match self.select_checkpoint(tip, payout.block_height).await {
                Ok(Some(height)) => height,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "checkpoint query failed; retrying next tick");
                    continue;
                }
            };

            match self.submit_payout(&payout, checkpoint).await {
                Ok(()) => submitted += 1,
                // The row stays pending; a later tick retries.
                Err(e) => error!(
                    txid = %payout.txid,
                    vout = payout.output_index,
                    error = %e,
                    "failed to submit payout"
                ),
            }
        }
        Ok(submitted)
    }

    /// A usable checkpoint exists when it is below the payout's block and
    /// the tip is still within the contract's header-chain window.
    async fn select_checkpoint(&self, tip: u32, target: u32) -> Result<Option<u32>, EvmError> {
        let latest = self.evm.latest_checkpoint_height().await?;
        if latest == 0 {
            warn!("no checkpoints registered on-chain");
            return Ok(None);
        }
        if latest >= target {
            warn!(latest, target, "latest checkpoint is at or above the payout block");
            return Ok(None);
        }
        if tip - latest > self.config.max_header_chain {
            warn!(
                latest,
                tip,
                max = self.config.max_header_chain,
                "header chain from checkpoint to tip would be too long"
            );
            return Ok(None);
        }
        Ok(Some(latest))
    }

    async fn submit_payout(
        &self,
        payout: &PendingPayout,
        checkpoint_height: u32,
    ) -> Result<(), SubmitError> {
        info!(
            txid = %payout.txid,
            vout = payout.output_index,
            checkpoint = checkpoint_height,
            target = payout.block_height,
            "building proof"
        );

        let builder = ProofBuilder::with_limits(
            self.chain.as_ref(),
            self.config.required_confirmations,
            self.config.max_header_chain,
        );
        let result = builder
            .build_proof(&ProofRequest {
                txid: payout.txid.clone(),
                output_index: payout.output_index,
                checkpoint_height,
                target_height: payout.block_height,
                borrower: payout.borrower,
                tip_height: None,
            })
            .await?;

        verify_proof(
            &result.proof,
            self.config.required_confirmations,
            self.config.max_header_chain,
        )?;

        let encoded = result.proof.encode_for_contract();
        info!(
            txid = %payout.txid,
            borrower = %payout.borrower,
            amount_sats = result.amount_sats,
            proof_size = encoded.len(),
            "submitting proof"
        );
        let outcome = self.evm.submit_payout(encoded).await?;

        self.store.mark_submitted(
            &payout.txid,
            payout.output_index,
            &format!("{:#x}", outcome.tx_hash),
        )?;
        info!(
            txid = %payout.txid,
            evm_tx_hash = %outcome.tx_hash,
            gas_used = outcome.gas_used,
            "proof submitted"
        );
        Ok(())
    }
}
