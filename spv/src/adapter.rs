//! The chain-access capability the proof pipeline is written against.
//!
//! Concrete transports (Bitcoin Core JSON-RPC, Esplora REST, the in-memory
//! mock) live in `hashcredit-chain`; the builder, watcher and relayer hold
//! a `dyn ChainAdapter` and never see transport details.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("chain transport error: {0}")]
    Transport(String),
    #[error("no block at height {0}")]
    HeightNotFound(u32),
    #[error("block {0} not found")]
    BlockNotFound(String),
    #[error("transaction {0} not found")]
    TxNotFound(String),
    #[error("missing field `{0}` in chain response")]
    MissingField(&'static str),
    #[error("malformed chain response: {0}")]
    Malformed(String),
}

/// Verbose header fields needed to anchor a checkpoint on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub time: u32,
    pub chainwork_hex: String,
    pub bits: u32,
}

/// A block with decoded outputs, as returned by `getblock` verbosity 2.
#[derive(Debug, Clone, Default)]
pub struct VerboseBlock {
    pub txs: Vec<VerboseTx>,
}

#[derive(Debug, Clone)]
pub struct VerboseTx {
    /// Display-order txid hex.
    pub txid: String,
    pub outputs: Vec<VerboseTxOut>,
}

#[derive(Debug, Clone)]
pub struct VerboseTxOut {
    pub n: u32,
    /// Decimal BTC exactly as the node printed it.
    pub value_btc: String,
    pub script_pubkey_hex: String,
}

/// The queries the SPV pipeline needs from a Bitcoin backend.
///
/// All hashes cross this boundary in display order (the form every RPC
/// speaks); conversion to internal order happens in the callers.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn get_tip_height(&self) -> Result<u32, ChainError>;

    /// Display-order block hash at `height`.
    async fn get_block_hash(&self, height: u32) -> Result<String, ChainError>;

    /// The raw 80-byte header.
    async fn get_block_header_bytes(&self, block_hash: &str) -> Result<[u8; 80], ChainError>;

    async fn get_block_header_info(&self, block_hash: &str) -> Result<HeaderInfo, ChainError>;

    /// Display-order txids of the block, in block order.
    async fn get_block_txids(&self, block_hash: &str) -> Result<Vec<String>, ChainError>;

    /// Raw transaction bytes for a display-order txid.
    async fn get_raw_tx(&self, txid: &str) -> Result<Vec<u8>, ChainError>;

    /// Block with decoded outputs, when the backend can serve it cheaply.
    /// The watcher falls back to raw-transaction parsing otherwise.
    async fn get_block_verbose(
        &self,
        _block_hash: &str,
    ) -> Result<Option<VerboseBlock>, ChainError> {
        Ok(None)
    }
}
