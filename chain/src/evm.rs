//! EVM client for the three bridge contracts.
//!
//! Every mutating call fetches its own nonce and gas price, signs with the
//! configured key and waits for the receipt under a bounded timeout. A
//! receipt status other than 1 surfaces as [`EvmError::Revert`]; nonce
//! conflicts are not retried here, the caller decides.

use std::time::Duration;

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{keccak256, Address, FixedBytes, B256, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

sol! {
    contract CheckpointManager {
        function setCheckpoint(
            uint32 height,
            bytes32 blockHash,
            uint256 chainWork,
            uint32 timestamp,
            uint32 bits
        ) external;
        function latestCheckpointHeight() external view returns (uint32);
    }

    contract BtcSpvVerifier {
        function setBorrowerPubkeyHash(address borrower, bytes20 pubkeyHash) external;
        function getBorrowerPubkeyHash(address borrower) external view returns (bytes20);
    }

    contract HashCreditManager {
        struct BorrowerInfo {
            uint8 status;
            bytes32 btcPayoutKeyHash;
            uint128 totalRevenueSats;
            uint128 trailingRevenueSats;
            uint128 creditLimit;
            uint128 currentDebt;
            uint64 lastPayoutTimestamp;
            uint64 registeredAt;
            uint32 payoutCount;
        }

        function submitPayout(bytes proof) external;
        function registerBorrower(address borrower, bytes32 btcPayoutKeyHash) external;
        function getBorrowerInfo(address borrower) external view returns (BorrowerInfo memory);
    }
}

#[derive(Debug, Error)]
pub enum EvmError {
    #[error("evm rpc error: {0}")]
    Rpc(String),
    #[error("evm transaction {tx_hash} reverted (gas used {gas_used})")]
    Revert { tx_hash: B256, gas_used: u64 },
    #[error("invalid evm private key")]
    InvalidKey,
    #[error("invalid evm rpc url `{0}`")]
    InvalidUrl(String),
    #[error("no {0} contract address configured")]
    MissingContract(&'static str),
}

/// Receipt facts callers care about.
#[derive(Debug, Clone, Copy)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

#[derive(Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub private_key: Zeroizing<String>,
    pub checkpoint_manager: Option<Address>,
    pub spv_verifier: Option<Address>,
    pub credit_manager: Option<Address>,
    pub gas_limit: u64,
    pub payout_gas_limit: u64,
    pub receipt_timeout_secs: u64,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 102_031,
            private_key: Zeroizing::new(String::new()),
            checkpoint_manager: None,
            spv_verifier: None,
            credit_manager: None,
            gas_limit: 500_000,
            payout_gas_limit: 800_000,
            receipt_timeout_secs: 60,
        }
    }
}

/// `keccak256(utf8(btc_address))`, the payout key identity registered on
/// `HashCreditManager`.
pub fn btc_payout_key_hash(btc_address: &str) -> B256 {
    keccak256(btc_address.as_bytes())
}

/// Parse the node's big-endian chainwork hex into a `uint256`.
pub fn parse_chainwork(chainwork_hex: &str) -> Result<U256, EvmError> {
    U256::from_str_radix(chainwork_hex.trim_start_matches("0x"), 16)
        .map_err(|_| EvmError::Rpc(format!("invalid chainwork `{chainwork_hex}`")))
}

pub struct EvmClient {
    provider: DynProvider,
    address: Address,
    config: EvmConfig,
}

impl EvmClient {
    pub fn new(config: EvmConfig) -> Result<Self, EvmError> {
        let signer: PrivateKeySigner = config
            .private_key
            .trim()
            .parse()
            .map_err(|_| EvmError::InvalidKey)?;
        let address = signer.address();
        let url = config
            .rpc_url
            .parse()
            .map_err(|_| EvmError::InvalidUrl(config.rpc_url.clone()))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();
        Ok(Self {
            provider,
            address,
            config,
        })
    }

    /// The signing account's address.
    pub fn address(&self) -> Address {
        self.address
    }

    fn checkpoint_manager(&self) -> Result<Address, EvmError> {
        self.config
            .checkpoint_manager
            .ok_or(EvmError::MissingContract("CheckpointManager"))
    }

    fn spv_verifier(&self) -> Result<Address, EvmError> {
        self.config
            .spv_verifier
            .ok_or(EvmError::MissingContract("BtcSpvVerifier"))
    }

    fn credit_manager(&self) -> Result<Address, EvmError> {
        self.config
            .credit_manager
            .ok_or(EvmError::MissingContract("HashCreditManager"))
    }

    async fn send(&self, to: Address, data: Vec<u8>, gas_limit: u64) -> Result<TxOutcome, EvmError> {
        let nonce = self
            .provider
            .get_transaction_count(self.address)
            .await
            .map_err(|e| EvmError::Rpc(e.to_string()))?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| EvmError::Rpc(e.to_string()))?;

        let tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(data)
            .with_nonce(nonce)
            .with_gas_price(gas_price)
            .with_gas_limit(gas_limit)
            .with_chain_id(self.config.chain_id);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| EvmError::Rpc(e.to_string()))?;
        let receipt = pending
            .with_timeout(Some(Duration::from_secs(self.config.receipt_timeout_secs)))
            .get_receipt()
            .await
            .map_err(|e| EvmError::Rpc(e.to_string()))?;

        let outcome = TxOutcome {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        };
        if !receipt.status() {
            return Err(EvmError::Revert {
                tx_hash: outcome.tx_hash,
                gas_used: outcome.gas_used,
            });
        }
        info!(
            to = %to,
            tx_hash = %outcome.tx_hash,
            gas_used = outcome.gas_used,
            "evm transaction confirmed"
        );
        Ok(outcome)
    }

    async fn view(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, EvmError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        let out = self
            .provider
            .call(tx)
            .await
            .map_err(|e| EvmError::Rpc(e.to_string()))?;
        Ok(out.to_vec())
    }

    /// `CheckpointManager.setCheckpoint`. `block_hash` is in internal
    /// byte order, exactly as the contract stores it.
    pub async fn set_checkpoint(
        &self,
        height: u32,
        block_hash: [u8; 32],
        chain_work: U256,
        timestamp: u32,
        bits: u32,
    ) -> Result<TxOutcome, EvmError> {
        let to = self.checkpoint_manager()?;
        let data = CheckpointManager::setCheckpointCall {
            height,
            blockHash: B256::from(block_hash),
            chainWork: chain_work,
            timestamp,
            bits,
        }
        .abi_encode();
        self.send(to, data, self.config.gas_limit).await
    }

    pub async fn get_latest_checkpoint_height(&self) -> Result<u32, EvmError> {
        let to = self.checkpoint_manager()?;
        let data = CheckpointManager::latestCheckpointHeightCall {}.abi_encode();
        let out = self.view(to, data).await?;
        CheckpointManager::latestCheckpointHeightCall::abi_decode_returns(&out)
            .map_err(|e| EvmError::Rpc(format!("latestCheckpointHeight decode: {e}")))
    }

    /// `BtcSpvVerifier.setBorrowerPubkeyHash`.
    pub async fn set_borrower_pubkey_hash(
        &self,
        borrower: Address,
        pubkey_hash: [u8; 20],
    ) -> Result<TxOutcome, EvmError> {
        let to = self.spv_verifier()?;
        let data = BtcSpvVerifier::setBorrowerPubkeyHashCall {
            borrower,
            pubkeyHash: FixedBytes::from(pubkey_hash),
        }
        .abi_encode();
        self.send(to, data, self.config.gas_limit).await
    }

    pub async fn get_borrower_pubkey_hash(&self, borrower: Address) -> Result<[u8; 20], EvmError> {
        let to = self.spv_verifier()?;
        let data = BtcSpvVerifier::getBorrowerPubkeyHashCall { borrower }.abi_encode();
        let out = self.view(to, data).await?;
        let hash = BtcSpvVerifier::getBorrowerPubkeyHashCall::abi_decode_returns(&out)
            .map_err(|e| EvmError::Rpc(format!("getBorrowerPubkeyHash decode: {e}")))?;
        Ok(hash.0)
    }

    /// `HashCreditManager.registerBorrower`.
    pub async fn register_borrower(
        &self,
        borrower: Address,
        payout_key_hash: B256,
    ) -> Result<TxOutcome, EvmError> {
        let to = self.credit_manager()?;
        let data = HashCreditManager::registerBorrowerCall {
            borrower,
            btcPayoutKeyHash: payout_key_hash,
        }
        .abi_encode();
        self.send(to, data, self.config.gas_limit).await
    }

    pub async fn is_borrower_registered(&self, borrower: Address) -> Result<bool, EvmError> {
        let to = self.credit_manager()?;
        let data = HashCreditManager::getBorrowerInfoCall { borrower }.abi_encode();
        let out = self.view(to, data).await?;
        let info = HashCreditManager::getBorrowerInfoCall::abi_decode_returns(&out)
            .map_err(|e| EvmError::Rpc(format!("getBorrowerInfo decode: {e}")))?;
        Ok(info.registeredAt != 0)
    }
}

/// The slice of the EVM surface the relayer loop depends on.
#[async_trait]
pub trait EvmBridge: Send + Sync {
    async fn latest_checkpoint_height(&self) -> Result<u32, EvmError>;
    async fn submit_payout(&self, proof: Vec<u8>) -> Result<TxOutcome, EvmError>;
}

#[async_trait]
impl EvmBridge for EvmClient {
    async fn latest_checkpoint_height(&self) -> Result<u32, EvmError> {
        self.get_latest_checkpoint_height().await
    }

    async fn submit_payout(&self, proof: Vec<u8>) -> Result<TxOutcome, EvmError> {
        let to = self.credit_manager()?;
        let data = HashCreditManager::submitPayoutCall {
            proof: proof.into(),
        }
        .abi_encode();
        self.send(to, data, self.config.payout_gas_limit).await
    }
}
