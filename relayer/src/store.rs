//! Durable, idempotent payout bookkeeping.
//!
//! Two logical tables keyed by `(txid, output_index)`: `pending` rows are
//! created by the watcher and either move to `submitted` (terminal) or are
//! removed on a reorg. `pending` and `submitted` are always disjoint, and
//! the move happens inside a single store transaction.
//!
//! The local store is an optimization for exactly-once submission; the
//! contract's replay guard holds the correctness end of that bargain.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt store record for key `{0}`")]
    Corrupt(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// A payout waiting for confirmations and submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayout {
    /// Display-order txid hex.
    pub txid: String,
    pub output_index: u32,
    pub borrower: Address,
    pub btc_address: String,
    pub amount_sats: u64,
    pub block_height: u32,
    /// Display-order block hash the payout was seen in.
    pub block_hash: String,
    /// Unix seconds.
    pub first_seen: u64,
}

/// A payout that has been credited on-chain. Terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedPayout {
    pub txid: String,
    pub output_index: u32,
    pub borrower: Address,
    pub amount_sats: u64,
    pub block_height: u32,
    /// Unix seconds.
    pub submitted_at: u64,
    pub evm_tx_hash: String,
}

fn row_key(txid: &str, output_index: u32) -> String {
    format!("{}:{}", txid.to_lowercase(), output_index)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Capability interface over the two payout tables.
pub trait PayoutStore: Send + Sync {
    /// Upsert that returns `true` only on first insertion.
    fn add_pending(&self, payout: &PendingPayout) -> Result<bool, StoreError>;

    fn get_pending(&self) -> Result<Vec<PendingPayout>, StoreError>;

    fn is_submitted(&self, txid: &str, output_index: u32) -> Result<bool, StoreError>;

    /// Atomically move a row from `pending` to `submitted`. A missing
    /// pending row (already moved) is a no-op.
    fn mark_submitted(
        &self,
        txid: &str,
        output_index: u32,
        evm_tx_hash: &str,
    ) -> Result<(), StoreError>;

    /// Drop an orphaned pending row after a reorg.
    fn remove_pending(&self, txid: &str, output_index: u32) -> Result<(), StoreError>;
}

// ===================== sled backend =====================

/// File-backed store over two sled trees.
pub struct SledPayoutStore {
    db: sled::Db,
    pending: sled::Tree,
    submitted: sled::Tree,
}

impl SledPayoutStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let pending = db.open_tree("pending_payouts")?;
        let submitted = db.open_tree("submitted_payouts")?;
        Ok(Self {
            db,
            pending,
            submitted,
        })
    }
}

impl PayoutStore for SledPayoutStore {
    fn add_pending(&self, payout: &PendingPayout) -> Result<bool, StoreError> {
        let key = row_key(&payout.txid, payout.output_index);
        // A submitted row dominates any rediscovery of the same output.
        if self.submitted.contains_key(key.as_bytes())? {
            return Ok(false);
        }
        let value = serde_json::to_vec(payout).map_err(|_| StoreError::Corrupt(key.clone()))?;
        let inserted = self
            .pending
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(value))?
            .is_ok();
        self.db.flush()?;
        Ok(inserted)
    }

    fn get_pending(&self) -> Result<Vec<PendingPayout>, StoreError> {
        let mut rows = Vec::new();
        for entry in self.pending.iter() {
            let (key, value) = entry?;
            let row = serde_json::from_slice(&value)
                .map_err(|_| StoreError::Corrupt(String::from_utf8_lossy(&key).into_owned()))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn is_submitted(&self, txid: &str, output_index: u32) -> Result<bool, StoreError> {
        Ok(self
            .submitted
            .contains_key(row_key(txid, output_index).as_bytes())?)
    }

    fn mark_submitted(
        &self,
        txid: &str,
        output_index: u32,
        evm_tx_hash: &str,
    ) -> Result<(), StoreError> {
        let key = row_key(txid, output_index);
        let submitted_at = unix_now();

        let result: Result<(), TransactionError<()>> = (&self.pending, &self.submitted)
            .transaction(|(pending, submitted)| {
                let Some(raw) = pending.get(key.as_bytes())? else {
                    return Ok(());
                };
                let row: PendingPayout = serde_json::from_slice(&raw)
                    .map_err(|_| ConflictableTransactionError::Abort(()))?;
                let moved = SubmittedPayout {
                    txid: row.txid,
                    output_index: row.output_index,
                    borrower: row.borrower,
                    amount_sats: row.amount_sats,
                    block_height: row.block_height,
                    submitted_at,
                    evm_tx_hash: evm_tx_hash.to_string(),
                };
                let value = serde_json::to_vec(&moved)
                    .map_err(|_| ConflictableTransactionError::Abort(()))?;
                submitted.insert(key.as_bytes(), value)?;
                pending.remove(key.as_bytes())?;
                Ok(())
            });

        match result {
            Ok(()) => {
                self.db.flush()?;
                Ok(())
            }
            Err(TransactionError::Abort(())) => Err(StoreError::Corrupt(key)),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn remove_pending(&self, txid: &str, output_index: u32) -> Result<(), StoreError> {
        self.pending
            .remove(row_key(txid, output_index).as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}

// ===================== in-memory backend =====================

/// Map-backed store. Drives the tests, and marks the seam where a
/// server-backed implementation would plug in.
#[derive(Default)]
pub struct MemoryPayoutStore {
    inner: Mutex<MemoryTables>,
}

#[derive(Default)]
struct MemoryTables {
    pending: BTreeMap<String, PendingPayout>,
    submitted: BTreeMap<String, SubmittedPayout>,
}

impl MemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryTables>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".into()))
    }

    pub fn get_submitted(&self) -> Result<Vec<SubmittedPayout>, StoreError> {
        Ok(self.lock()?.submitted.values().cloned().collect())
    }
}

impl PayoutStore for MemoryPayoutStore {
    fn add_pending(&self, payout: &PendingPayout) -> Result<bool, StoreError> {
        let key = row_key(&payout.txid, payout.output_index);
        let mut tables = self.lock()?;
        if tables.pending.contains_key(&key) || tables.submitted.contains_key(&key) {
            return Ok(false);
        }
        tables.pending.insert(key, payout.clone());
        Ok(true)
    }

    fn get_pending(&self) -> Result<Vec<PendingPayout>, StoreError> {
        Ok(self.lock()?.pending.values().cloned().collect())
    }

    fn is_submitted(&self, txid: &str, output_index: u32) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .submitted
            .contains_key(&row_key(txid, output_index)))
    }

    fn mark_submitted(
        &self,
        txid: &str,
        output_index: u32,
        evm_tx_hash: &str,
    ) -> Result<(), StoreError> {
        let key = row_key(txid, output_index);
        let mut tables = self.lock()?;
        let Some(row) = tables.pending.remove(&key) else {
            return Ok(());
        };
        tables.submitted.insert(
            key,
            SubmittedPayout {
                txid: row.txid,
                output_index: row.output_index,
                borrower: row.borrower,
                amount_sats: row.amount_sats,
                block_height: row.block_height,
                submitted_at: unix_now(),
                evm_tx_hash: evm_tx_hash.to_string(),
            },
        );
        Ok(())
    }

    fn remove_pending(&self, txid: &str, output_index: u32) -> Result<(), StoreError> {
        self.lock()?.pending.remove(&row_key(txid, output_index));
        Ok(())
    }
}
