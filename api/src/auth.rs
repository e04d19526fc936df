//! `X-API-Key` header authentication.
//!
//! No token configured means open access (local development only; the
//! config layer refuses non-loopback binds in that state). Once a token
//! is configured it is required on every protected request: no local
//! bypass, no query-parameter fallback.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

fn check(state: &AppState, request: &Request) -> Result<(), AppError> {
    let Some(expected) = state.config.api_token.as_deref() else {
        return Ok(());
    };
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("API token required via X-API-Key header".to_string())
        })?;
    if provided != expected {
        return Err(AppError::Unauthorized("invalid API token".to_string()));
    }
    Ok(())
}

/// Guard for operator endpoints.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    check(&state, &request)?;
    Ok(next.run(request).await)
}

/// Guard for the claim endpoints, which are public unless the deployment
/// opts into gating them too.
pub async fn require_claim_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.claim_require_api_token {
        check(&state, &request)?;
    }
    Ok(next.run(request).await)
}
