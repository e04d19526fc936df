//! Request and response bodies for the API surface.

use serde::{Deserialize, Serialize};

use hashcredit_spv::proof::SpvProofJson;

#[derive(Debug, Deserialize)]
pub struct BuildProofRequest {
    pub txid: String,
    pub output_index: u32,
    pub checkpoint_height: u32,
    pub target_height: u32,
    pub borrower: String,
    pub tip_height: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BuildProofResponse {
    pub proof: SpvProofJson,
    pub proof_hex: String,
    pub txid: String,
    pub amount_sats: u64,
    pub pubkey_hash: String,
    pub script_type: String,
    pub block_height: u32,
    pub block_timestamp: u32,
}

#[derive(Debug, Serialize)]
pub struct SubmitProofResponse {
    pub evm_tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub amount_sats: u64,
}

#[derive(Debug, Deserialize)]
pub struct SetCheckpointRequest {
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct SetCheckpointResponse {
    pub height: u32,
    /// Internal-order hash, as stored on-chain.
    pub block_hash: String,
    pub chain_work: String,
    pub timestamp: u32,
    pub bits: u32,
    pub evm_tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct SetBorrowerPubkeyHashRequest {
    pub borrower: String,
    pub btc_address: String,
}

#[derive(Debug, Serialize)]
pub struct SetBorrowerPubkeyHashResponse {
    pub borrower: String,
    pub pubkey_hash: String,
    pub script_type: String,
    pub evm_tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBorrowerRequest {
    pub borrower: String,
    pub btc_address: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterBorrowerResponse {
    pub borrower: String,
    pub btc_payout_key_hash: String,
    pub evm_tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimStartRequest {
    pub borrower: String,
    pub btc_address: String,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ClaimStartResponse {
    pub token: String,
    /// The canonical message both wallets must sign, byte for byte.
    pub message: String,
    pub expires_at: u64,
}

#[derive(Debug, Deserialize)]
pub struct ClaimCompleteRequest {
    pub token: String,
    /// 65-byte `personal_sign` signature, hex.
    pub evm_signature: String,
    /// 65-byte BIP-137 signature, base64.
    pub btc_signature: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct ClaimCompleteResponse {
    pub borrower: String,
    pub btc_address: String,
    pub pubkey_hash_hex: String,
    pub btc_payout_key_hash_hex: String,
    pub script_type: String,
    pub dry_run: bool,
    pub set_pubkey_tx_hash: Option<String>,
    pub register_tx_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub bitcoin_backend: String,
    pub evm_rpc: String,
}
