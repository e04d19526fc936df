//! Core SPV pipeline for the HashCredit Bitcoin-to-EVM bridge.
//!
//! Everything in this crate is deterministic: wire codecs, Merkle trees,
//! address decoding, proof construction against an abstract [`ChainAdapter`],
//! local replay of the on-chain verifier, and the dual-signature borrower
//! claim protocol. Network transports live in `hashcredit-chain`.

pub mod adapter;
pub mod address;
pub mod amount;
pub mod claim;
pub mod hash;
pub mod merkle;
pub mod mock;
pub mod proof;
pub mod signmessage;
pub mod verify;
pub mod wire;

pub use adapter::{ChainAdapter, ChainError, HeaderInfo, VerboseBlock, VerboseTx, VerboseTxOut};
pub use hash::{sha256d, Hash256};
pub use proof::{
    ProofBuildResult, ProofBuilder, ProofError, ProofRequest, SpvProof, MAX_HEADER_CHAIN,
    MIN_CONFIRMATIONS,
};
pub use wire::{extract_pubkey_hash, parse_tx_outputs, BlockHeader, ScriptType, TxOut};
