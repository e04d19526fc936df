//! Handlers for the SPV, checkpoint, borrower and claim endpoints.

use std::sync::Arc;

use alloy_primitives::Address;
use axum::extract::State;
use axum::Json;
use tracing::info;

use hashcredit_chain::evm::{btc_payout_key_hash, parse_chainwork};
use hashcredit_spv::address::decode_btc_address;
use hashcredit_spv::claim::{
    build_claim_message, issue_claim_token, unix_now, verify_claim_token, verify_evm_signature,
};
use hashcredit_spv::hash::Hash256;
use hashcredit_spv::proof::{
    ProofBuildResult, ProofBuilder, ProofRequest, MAX_HEADER_CHAIN, MIN_CONFIRMATIONS,
};
use hashcredit_spv::signmessage::verify_bip137_signature;
use hashcredit_spv::verify::verify_proof;

use crate::config::BitcoinBackend;
use crate::error::AppError;
use crate::models::*;
use crate::state::AppState;

fn parse_borrower(raw: &str) -> Result<Address, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid borrower EVM address `{raw}`")))
}

async fn build(state: &AppState, req: &BuildProofRequest) -> Result<ProofBuildResult, AppError> {
    let borrower = parse_borrower(&req.borrower)?;
    let builder = ProofBuilder::new(state.chain.as_ref());
    let result = builder
        .build_proof(&ProofRequest {
            txid: req.txid.clone(),
            output_index: req.output_index,
            checkpoint_height: req.checkpoint_height,
            target_height: req.target_height,
            borrower,
            tip_height: req.tip_height,
        })
        .await?;
    Ok(result)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bitcoin_backend: match state.config.backend {
            BitcoinBackend::Node => "node".to_string(),
            BitcoinBackend::Esplora => "esplora".to_string(),
        },
        evm_rpc: state.config.evm.rpc_url.clone(),
    })
}

pub async fn build_proof(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildProofRequest>,
) -> Result<Json<BuildProofResponse>, AppError> {
    let result = build(&state, &req).await?;
    Ok(Json(BuildProofResponse {
        proof_hex: format!("0x{}", hex::encode(result.proof.encode_for_contract())),
        proof: result.proof.to_json(),
        txid: result.txid.to_display_hex(),
        amount_sats: result.amount_sats,
        pubkey_hash: format!("0x{}", hex::encode(result.pubkey_hash)),
        script_type: result.script_type.to_string(),
        block_height: result.block_height,
        block_timestamp: result.block_timestamp,
    }))
}

pub async fn submit_proof(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildProofRequest>,
) -> Result<Json<SubmitProofResponse>, AppError> {
    use hashcredit_chain::evm::EvmBridge;

    let result = build(&state, &req).await?;
    verify_proof(&result.proof, MIN_CONFIRMATIONS, MAX_HEADER_CHAIN)?;

    let outcome = state
        .evm()?
        .submit_payout(result.proof.encode_for_contract())
        .await?;
    info!(txid = %req.txid, evm_tx_hash = %outcome.tx_hash, "payout submitted via API");
    Ok(Json(SubmitProofResponse {
        evm_tx_hash: format!("{:#x}", outcome.tx_hash),
        block_number: outcome.block_number,
        gas_used: outcome.gas_used,
        amount_sats: result.amount_sats,
    }))
}

pub async fn set_checkpoint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetCheckpointRequest>,
) -> Result<Json<SetCheckpointResponse>, AppError> {
    let block_hash = state.chain.get_block_hash(req.height).await?;
    let info = state.chain.get_block_header_info(&block_hash).await?;
    let header = state.chain.get_block_header_bytes(&block_hash).await?;
    let internal_hash = Hash256::digest(&header);
    let chain_work = parse_chainwork(&info.chainwork_hex)?;

    let outcome = state
        .evm()?
        .set_checkpoint(
            req.height,
            internal_hash.into_bytes(),
            chain_work,
            info.time,
            info.bits,
        )
        .await?;
    Ok(Json(SetCheckpointResponse {
        height: req.height,
        block_hash: format!("0x{}", internal_hash.to_internal_hex()),
        chain_work: info.chainwork_hex,
        timestamp: info.time,
        bits: info.bits,
        evm_tx_hash: format!("{:#x}", outcome.tx_hash),
    }))
}

pub async fn set_borrower_pubkey_hash(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetBorrowerPubkeyHashRequest>,
) -> Result<Json<SetBorrowerPubkeyHashResponse>, AppError> {
    let borrower = parse_borrower(&req.borrower)?;
    let (pubkey_hash, script_type) = decode_btc_address(&req.btc_address)
        .ok_or_else(|| AppError::bad_request("invalid or unsupported bitcoin address"))?;

    let outcome = state
        .evm()?
        .set_borrower_pubkey_hash(borrower, pubkey_hash)
        .await?;
    Ok(Json(SetBorrowerPubkeyHashResponse {
        borrower: format!("{borrower:#x}"),
        pubkey_hash: format!("0x{}", hex::encode(pubkey_hash)),
        script_type: script_type.to_string(),
        evm_tx_hash: format!("{:#x}", outcome.tx_hash),
    }))
}

pub async fn register_borrower(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterBorrowerRequest>,
) -> Result<Json<RegisterBorrowerResponse>, AppError> {
    let borrower = parse_borrower(&req.borrower)?;
    if decode_btc_address(&req.btc_address).is_none() {
        return Err(AppError::bad_request(
            "invalid or unsupported bitcoin address",
        ));
    }
    let key_hash = btc_payout_key_hash(&req.btc_address);

    let outcome = state.evm()?.register_borrower(borrower, key_hash).await?;
    Ok(Json(RegisterBorrowerResponse {
        borrower: format!("{borrower:#x}"),
        btc_payout_key_hash: format!("{key_hash:#x}"),
        evm_tx_hash: format!("{:#x}", outcome.tx_hash),
    }))
}

pub async fn claim_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimStartRequest>,
) -> Result<Json<ClaimStartResponse>, AppError> {
    let borrower = parse_borrower(&req.borrower)?;
    if decode_btc_address(&req.btc_address).is_none() {
        return Err(AppError::bad_request(
            "invalid or unsupported bitcoin address",
        ));
    }
    let secret = state.claim_secret()?;

    let ttl = req.ttl_seconds.unwrap_or(state.config.claim_ttl_seconds);
    let (token, payload) = issue_claim_token(
        secret,
        &format!("{borrower:#x}"),
        req.btc_address.trim(),
        state.config.chain_id,
        ttl,
    );
    info!(borrower = %borrower, btc_address = %req.btc_address, "claim started");
    Ok(Json(ClaimStartResponse {
        message: build_claim_message(&payload),
        expires_at: payload.exp,
        token,
    }))
}

pub async fn claim_complete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimCompleteRequest>,
) -> Result<Json<ClaimCompleteResponse>, AppError> {
    let secret = state.claim_secret()?;
    let payload = verify_claim_token(secret, &req.token, unix_now())?;
    let borrower = parse_borrower(&payload.borrower)?;

    // Both signatures are checked against the message recomposed from the
    // verified token, never against caller-supplied text.
    let message = build_claim_message(&payload);
    verify_evm_signature(&message, &req.evm_signature, borrower)?;
    verify_bip137_signature(&payload.btc_address, &message, &req.btc_signature)?;

    let (pubkey_hash, script_type) = decode_btc_address(&payload.btc_address)
        .ok_or_else(|| AppError::bad_request("invalid or unsupported bitcoin address"))?;
    let key_hash = btc_payout_key_hash(&payload.btc_address);

    let mut set_pubkey_tx_hash = None;
    let mut register_tx_hash = None;
    if !req.dry_run {
        let evm = state.evm()?;
        let outcome = evm.set_borrower_pubkey_hash(borrower, pubkey_hash).await?;
        set_pubkey_tx_hash = Some(format!("{:#x}", outcome.tx_hash));

        if !evm.is_borrower_registered(borrower).await? {
            let outcome = evm.register_borrower(borrower, key_hash).await?;
            register_tx_hash = Some(format!("{:#x}", outcome.tx_hash));
        }
    }

    info!(
        borrower = %borrower,
        btc_address = %payload.btc_address,
        dry_run = req.dry_run,
        "claim completed"
    );
    Ok(Json(ClaimCompleteResponse {
        borrower: format!("{borrower:#x}"),
        btc_address: payload.btc_address,
        pubkey_hash_hex: hex::encode(pubkey_hash),
        btc_payout_key_hash_hex: hex::encode(key_hash),
        script_type: script_type.to_string(),
        dry_run: req.dry_run,
        set_pubkey_tx_hash,
        register_tx_hash,
    }))
}
