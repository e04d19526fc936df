//! SPV proof construction and the on-chain ABI encoding.
//!
//! A proof carries the header chain from the anchored checkpoint to the
//! tip, the raw transaction, and the Merkle path placing it inside the
//! target block. `BtcSpvVerifier` replays exactly these fields; the local
//! verifier in [`crate::verify`] does the same before any gas is spent.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::{ChainAdapter, ChainError};
use crate::hash::Hash256;
use crate::merkle::{generate_merkle_proof, MerkleError};
use crate::wire::{extract_pubkey_hash, parse_tx_outputs, BlockHeader, CodecError, ScriptType};

/// Confirmation depth required before a payout proof is considered final.
pub const MIN_CONFIRMATIONS: u32 = 6;
/// Longest header chain the verifier contract accepts.
pub const MAX_HEADER_CHAIN: u32 = 144;

sol! {
    /// Mirror of the `SpvProof` struct in `BtcSpvVerifier.sol`.
    struct SpvProofAbi {
        uint32 checkpointHeight;
        bytes[] headers;
        uint32 txBlockIndex;
        bytes rawTx;
        bytes32[] merkleProof;
        uint256 txIndex;
        uint32 outputIndex;
        address borrower;
    }
}

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("txid mismatch: computed {computed}, expected {expected}")]
    TxidMismatch { expected: String, computed: String },
    #[error("output index {index} out of range (transaction has {outputs} outputs)")]
    OutputIndexOutOfRange { index: u32, outputs: usize },
    #[error("unsupported script type: {0}")]
    UnsupportedScript(String),
    #[error("target height {target} must be above checkpoint height {checkpoint}")]
    HeightOrdering { checkpoint: u32, target: u32 },
    #[error("tip height {tip} is below target height {target}")]
    TipBelowTarget { tip: u32, target: u32 },
    #[error("insufficient confirmations: {got} < {required}")]
    InsufficientConfirmations { got: u32, required: u32 },
    #[error("header chain of {len} blocks exceeds the limit of {max}")]
    HeaderChainTooLong { len: u32, max: u32 },
    #[error("transaction {txid} not found in block {block_hash}")]
    TxNotInBlock { txid: String, block_hash: String },
    #[error("computed merkle root does not match the target block header")]
    MerkleRootMismatch,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// The proof tuple submitted to `HashCreditManager.submitPayout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpvProof {
    pub checkpoint_height: u32,
    /// Raw 80-byte headers covering `checkpoint+1 ..= tip`.
    pub headers: Vec<[u8; 80]>,
    /// Index within `headers` of the block containing the transaction.
    pub tx_block_index: u32,
    pub raw_tx: Vec<u8>,
    /// Sibling hashes, internal byte order, leaf to root.
    pub merkle_proof: Vec<Hash256>,
    /// Position of the transaction in the block's txid list.
    pub tx_index: u32,
    pub output_index: u32,
    pub borrower: Address,
}

impl SpvProof {
    /// ABI-encode for `submitPayout`, matching `abi.encode(SpvProof)`.
    pub fn encode_for_contract(&self) -> Vec<u8> {
        let abi = SpvProofAbi {
            checkpointHeight: self.checkpoint_height,
            headers: self
                .headers
                .iter()
                .map(|h| Bytes::copy_from_slice(h))
                .collect(),
            txBlockIndex: self.tx_block_index,
            rawTx: Bytes::copy_from_slice(&self.raw_tx),
            merkleProof: self
                .merkle_proof
                .iter()
                .map(|h| B256::from(*h.as_bytes()))
                .collect(),
            txIndex: U256::from(self.tx_index),
            outputIndex: self.output_index,
            borrower: self.borrower,
        };
        abi.abi_encode()
    }

    pub fn to_json(&self) -> SpvProofJson {
        SpvProofJson {
            checkpoint_height: self.checkpoint_height,
            headers: self.headers.iter().map(hex::encode).collect(),
            tx_block_index: self.tx_block_index,
            raw_tx: hex::encode(&self.raw_tx),
            merkle_proof: self
                .merkle_proof
                .iter()
                .map(Hash256::to_internal_hex)
                .collect(),
            tx_index: self.tx_index,
            output_index: self.output_index,
            borrower: format!("{:#x}", self.borrower),
        }
    }
}

/// JSON wire form of a proof (camelCase, hex fields; merkle nodes in
/// internal byte order).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpvProofJson {
    pub checkpoint_height: u32,
    pub headers: Vec<String>,
    pub tx_block_index: u32,
    pub raw_tx: String,
    pub merkle_proof: Vec<String>,
    pub tx_index: u32,
    pub output_index: u32,
    pub borrower: String,
}

impl SpvProofJson {
    pub fn into_proof(self) -> Result<SpvProof, ProofJsonError> {
        let mut headers = Vec::with_capacity(self.headers.len());
        for h in &self.headers {
            let raw = hex::decode(h).map_err(|_| ProofJsonError::Field("headers"))?;
            let header: [u8; 80] = raw
                .try_into()
                .map_err(|_| ProofJsonError::Field("headers"))?;
            headers.push(header);
        }
        let mut merkle_proof = Vec::with_capacity(self.merkle_proof.len());
        for p in &self.merkle_proof {
            let raw = hex::decode(p).map_err(|_| ProofJsonError::Field("merkleProof"))?;
            let node: [u8; 32] = raw
                .try_into()
                .map_err(|_| ProofJsonError::Field("merkleProof"))?;
            merkle_proof.push(Hash256::from_internal(node));
        }
        Ok(SpvProof {
            checkpoint_height: self.checkpoint_height,
            headers,
            tx_block_index: self.tx_block_index,
            raw_tx: hex::decode(&self.raw_tx).map_err(|_| ProofJsonError::Field("rawTx"))?,
            merkle_proof,
            tx_index: self.tx_index,
            output_index: self.output_index,
            borrower: self
                .borrower
                .parse()
                .map_err(|_| ProofJsonError::Field("borrower"))?,
        })
    }
}

#[derive(Debug, Error)]
pub enum ProofJsonError {
    #[error("invalid proof JSON field `{0}`")]
    Field(&'static str),
}

/// Inputs to a proof build.
#[derive(Debug, Clone)]
pub struct ProofRequest {
    /// Display-order txid, as shown by explorers.
    pub txid: String,
    pub output_index: u32,
    pub checkpoint_height: u32,
    /// Height of the block containing the transaction.
    pub target_height: u32,
    pub borrower: Address,
    /// Defaults to `target_height + MIN_CONFIRMATIONS - 1`.
    pub tip_height: Option<u32>,
}

/// A built proof plus the transaction facts extracted along the way.
#[derive(Debug, Clone)]
pub struct ProofBuildResult {
    pub proof: SpvProof,
    /// Txid in internal byte order.
    pub txid: Hash256,
    pub amount_sats: u64,
    pub pubkey_hash: [u8; 20],
    pub script_type: ScriptType,
    pub block_height: u32,
    pub block_timestamp: u32,
}

/// Builds SPV proofs against an abstract chain backend.
pub struct ProofBuilder<'a> {
    chain: &'a dyn ChainAdapter,
    min_confirmations: u32,
    max_header_chain: u32,
}

impl<'a> ProofBuilder<'a> {
    pub fn new(chain: &'a dyn ChainAdapter) -> Self {
        Self::with_limits(chain, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN)
    }

    pub fn with_limits(
        chain: &'a dyn ChainAdapter,
        min_confirmations: u32,
        max_header_chain: u32,
    ) -> Self {
        Self {
            chain,
            min_confirmations,
            max_header_chain,
        }
    }

    pub async fn build_proof(&self, req: &ProofRequest) -> Result<ProofBuildResult, ProofError> {
        let tip_height = req
            .tip_height
            .unwrap_or(req.target_height + self.min_confirmations - 1);

        // Height validation happens before any chain traffic so a bad
        // request costs nothing.
        if req.target_height <= req.checkpoint_height {
            return Err(ProofError::HeightOrdering {
                checkpoint: req.checkpoint_height,
                target: req.target_height,
            });
        }
        if tip_height < req.target_height {
            return Err(ProofError::TipBelowTarget {
                tip: tip_height,
                target: req.target_height,
            });
        }
        let confirmations = tip_height - req.target_height + 1;
        if confirmations < self.min_confirmations {
            return Err(ProofError::InsufficientConfirmations {
                got: confirmations,
                required: self.min_confirmations,
            });
        }
        let chain_len = tip_height - req.checkpoint_height;
        if chain_len > self.max_header_chain {
            return Err(ProofError::HeaderChainTooLong {
                len: chain_len,
                max: self.max_header_chain,
            });
        }
        let tx_block_index = req.target_height - req.checkpoint_height - 1;

        // Fetch and cross-check the raw transaction.
        let raw_tx = self.chain.get_raw_tx(&req.txid).await?;
        let txid_internal = Hash256::digest(&raw_tx);
        if !txid_internal
            .to_display_hex()
            .eq_ignore_ascii_case(&req.txid)
        {
            return Err(ProofError::TxidMismatch {
                expected: req.txid.to_lowercase(),
                computed: txid_internal.to_display_hex(),
            });
        }

        let outputs = parse_tx_outputs(&raw_tx)?;
        let output = outputs
            .get(req.output_index as usize)
            .ok_or(ProofError::OutputIndexOutOfRange {
                index: req.output_index,
                outputs: outputs.len(),
            })?;
        let (pubkey_hash, script_type) = extract_pubkey_hash(&output.script_pubkey)
            .ok_or_else(|| ProofError::UnsupportedScript(hex::encode(&output.script_pubkey)))?;

        // Header chain from checkpoint+1 to tip, remembering display
        // hashes so the target block needs no extra lookup.
        let mut headers = Vec::with_capacity(chain_len as usize);
        let mut block_hashes = Vec::with_capacity(chain_len as usize);
        for height in req.checkpoint_height + 1..=tip_height {
            let block_hash = self.chain.get_block_hash(height).await?;
            headers.push(self.chain.get_block_header_bytes(&block_hash).await?);
            block_hashes.push(block_hash);
        }

        // Locate the transaction and build the Merkle path.
        let target_block_hash = &block_hashes[tx_block_index as usize];
        let txids = self.chain.get_block_txids(target_block_hash).await?;
        let tx_index = txids
            .iter()
            .position(|t| t.eq_ignore_ascii_case(&req.txid))
            .ok_or_else(|| ProofError::TxNotInBlock {
                txid: req.txid.to_lowercase(),
                block_hash: target_block_hash.clone(),
            })?;

        let mut leaves = Vec::with_capacity(txids.len());
        for txid in &txids {
            leaves.push(Hash256::from_display_hex(txid).map_err(|e| {
                ProofError::Chain(ChainError::Malformed(format!("block txid {txid}: {e}")))
            })?);
        }
        let (merkle_proof, merkle_root) = generate_merkle_proof(&leaves, tx_index as u32)?;

        let tx_block_header = BlockHeader::parse(&headers[tx_block_index as usize])?;
        if merkle_root != tx_block_header.merkle_root {
            return Err(ProofError::MerkleRootMismatch);
        }

        let proof = SpvProof {
            checkpoint_height: req.checkpoint_height,
            headers,
            tx_block_index,
            raw_tx,
            merkle_proof,
            tx_index: tx_index as u32,
            output_index: req.output_index,
            borrower: req.borrower,
        };

        Ok(ProofBuildResult {
            proof,
            txid: txid_internal,
            amount_sats: output.value_sats,
            pubkey_hash,
            script_type,
            block_height: req.target_height,
            block_timestamp: tx_block_header.time,
        })
    }
}
