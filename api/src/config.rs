//! Environment-driven configuration for the API server.
//!
//! Security model: if `API_TOKEN` is unset, the server only agrees to
//! bind loopback; any externally reachable host requires the token, and
//! once configured the token is required on every protected request with
//! no local bypass.

use thiserror::Error;
use zeroize::Zeroizing;

use hashcredit_chain::esplora::EsploraConfig;
use hashcredit_chain::evm::EvmConfig;
use hashcredit_chain::node::NodeRpcConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("refusing to bind {0} without API_TOKEN set; configure a token or bind loopback")]
    TokenRequired(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitcoinBackend {
    Node,
    Esplora,
}

#[derive(Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_token: Option<String>,
    pub allowed_origins: Vec<String>,
    pub claim_secret: Option<String>,
    pub claim_ttl_seconds: u64,
    pub claim_require_api_token: bool,
    pub backend: BitcoinBackend,
    pub node: NodeRpcConfig,
    pub esplora: EsploraConfig,
    pub evm: EvmConfig,
    pub chain_id: u64,
}

fn var(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_address(key: &'static str) -> Result<Option<alloy_primitives::Address>, ConfigError> {
    var(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "::1") || host.starts_with("127.")
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        // Railway-style platforms inject PORT; API_PORT wins when both set.
        let port = match var("API_PORT") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "API_PORT", value })?,
            None => parse_var("PORT", 8000)?,
        };
        let api_token = var("API_TOKEN");

        if api_token.is_none() && !is_loopback(&host) {
            return Err(ConfigError::TokenRequired(host));
        }

        let backend = match var("BITCOIN_BACKEND").as_deref() {
            None | Some("node") => BitcoinBackend::Node,
            Some("esplora") => BitcoinBackend::Esplora,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BITCOIN_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let chain_id = parse_var("CHAIN_ID", 102_031)?;

        Ok(Self {
            host,
            port,
            api_token,
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| {
                    vec![
                        "http://localhost:3000".to_string(),
                        "http://127.0.0.1:3000".to_string(),
                    ]
                }),
            claim_secret: var("CLAIM_SECRET"),
            claim_ttl_seconds: parse_var("CLAIM_TTL_SECONDS", 900)?,
            claim_require_api_token: parse_var("CLAIM_REQUIRE_API_TOKEN", false)?,
            backend,
            node: NodeRpcConfig {
                url: var("BITCOIN_RPC_URL").unwrap_or_else(|| "http://localhost:18332".to_string()),
                user: var("BITCOIN_RPC_USER").unwrap_or_default(),
                password: var("BITCOIN_RPC_PASSWORD").unwrap_or_default(),
                timeout_secs: 30,
            },
            esplora: EsploraConfig {
                base_url: var("ESPLORA_URL").unwrap_or_else(|| EsploraConfig::default().base_url),
                timeout_secs: 30,
            },
            evm: EvmConfig {
                rpc_url: var("EVM_RPC_URL").unwrap_or_else(|| "http://localhost:8545".to_string()),
                chain_id,
                private_key: Zeroizing::new(var("PRIVATE_KEY").unwrap_or_default()),
                checkpoint_manager: parse_address("CHECKPOINT_MANAGER")?,
                spv_verifier: parse_address("BTC_SPV_VERIFIER")?,
                credit_manager: parse_address("HASH_CREDIT_MANAGER")?,
                ..EvmConfig::default()
            },
            chain_id,
        })
    }
}
