//! HashCredit API server entry point.

use std::sync::Arc;

use tracing::{error, info, warn};

use hashcredit_api::config::{ApiConfig, BitcoinBackend};
use hashcredit_api::state::AppState;
use hashcredit_chain::esplora::EsploraRest;
use hashcredit_chain::evm::EvmClient;
use hashcredit_chain::node::NodeRpc;
use hashcredit_spv::adapter::ChainAdapter;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = serve().await {
        error!(error = %e, "api failed to start");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let config = ApiConfig::from_env()?;

    let chain: Arc<dyn ChainAdapter> = match config.backend {
        BitcoinBackend::Node => Arc::new(NodeRpc::new(config.node.clone())?),
        BitcoinBackend::Esplora => Arc::new(EsploraRest::new(config.esplora.clone())?),
    };

    let evm = if config.evm.private_key.trim().is_empty() {
        warn!("no PRIVATE_KEY configured; mutating endpoints are disabled");
        None
    } else {
        Some(Arc::new(EvmClient::new(config.evm.clone())?))
    };

    let addr = format!("{}:{}", config.host, config.port);
    info!(
        addr = %addr,
        auth = config.api_token.is_some(),
        claim = config.claim_secret.is_some(),
        "starting api"
    );

    let state = Arc::new(AppState { config, chain, evm });
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, hashcredit_api::app(state)).await?;
    Ok(())
}
