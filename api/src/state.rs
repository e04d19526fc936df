//! Shared handler state.

use std::sync::Arc;

use hashcredit_chain::evm::EvmClient;
use hashcredit_spv::adapter::ChainAdapter;

use crate::config::ApiConfig;
use crate::error::AppError;

pub struct AppState {
    pub config: ApiConfig,
    pub chain: Arc<dyn ChainAdapter>,
    /// Absent when no private key is configured; mutating endpoints fail
    /// with a configuration error in that case.
    pub evm: Option<Arc<EvmClient>>,
}

impl AppState {
    pub fn evm(&self) -> Result<&EvmClient, AppError> {
        self.evm
            .as_deref()
            .ok_or_else(|| AppError::Internal("no EVM private key configured".to_string()))
    }

    pub fn claim_secret(&self) -> Result<&str, AppError> {
        self.config
            .claim_secret
            .as_deref()
            .ok_or_else(|| AppError::Internal("CLAIM_SECRET is not configured".to_string()))
    }
}
