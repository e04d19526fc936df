//! Concrete transports behind the HashCredit capability traits: a Bitcoin
//! Core JSON-RPC adapter, an Esplora REST adapter, and the alloy-backed
//! EVM client for the three bridge contracts.

pub mod esplora;
pub mod evm;
pub mod mock;
pub mod node;

pub use esplora::{EsploraConfig, EsploraRest};
pub use evm::{EvmBridge, EvmClient, EvmConfig, EvmError, TxOutcome};
pub use node::{NodeRpc, NodeRpcConfig};
