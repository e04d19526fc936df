//! HTTP bridge between the HashCredit frontend/operators and the Bitcoin
//! and EVM backends: proof building and submission, checkpoint anchoring,
//! borrower mapping and the dual-signature claim flow.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Assemble the application router. Operator endpoints sit behind the API
/// key guard; claim endpoints get the (optionally gated) claim guard.
pub fn app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/spv/build-proof", post(routes::build_proof))
        .route("/spv/submit", post(routes::submit_proof))
        .route("/checkpoint/set", post(routes::set_checkpoint))
        .route("/borrower/set-pubkey-hash", post(routes::set_borrower_pubkey_hash))
        .route("/manager/register-borrower", post(routes::register_borrower))
        .route_layer(from_fn_with_state(state.clone(), auth::require_api_key));

    let claim = Router::new()
        .route("/claim/start", post(routes::claim_start))
        .route("/claim/complete", post(routes::claim_complete))
        .route_layer(from_fn_with_state(state.clone(), auth::require_claim_auth));

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
        .merge(claim)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
