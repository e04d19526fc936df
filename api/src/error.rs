//! HTTP error mapping: validation, proof and signature failures are 4xx,
//! upstream chain/EVM transport failures are 502.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use hashcredit_chain::evm::EvmError;
use hashcredit_spv::adapter::ChainError;
use hashcredit_spv::claim::ClaimError;
use hashcredit_spv::proof::ProofError;
use hashcredit_spv::signmessage::SignatureError;
use hashcredit_spv::verify::VerifyError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<ChainError> for AppError {
    fn from(e: ChainError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

impl From<ProofError> for AppError {
    fn from(e: ProofError) -> Self {
        match e {
            ProofError::Chain(inner) => AppError::Upstream(inner.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<VerifyError> for AppError {
    fn from(e: VerifyError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<ClaimError> for AppError {
    fn from(e: ClaimError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<SignatureError> for AppError {
    fn from(e: SignatureError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<EvmError> for AppError {
    fn from(e: EvmError) -> Self {
        match e {
            // A contract rejection is the caller's problem to inspect.
            EvmError::Revert { .. } => AppError::BadRequest(e.to_string()),
            EvmError::MissingContract(_) | EvmError::InvalidKey | EvmError::InvalidUrl(_) => {
                AppError::Internal(e.to_string())
            }
            EvmError::Rpc(_) => AppError::Upstream(e.to_string()),
        }
    }
}
