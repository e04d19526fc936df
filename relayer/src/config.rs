//! Environment-driven configuration for the relayer daemon.

use std::time::Duration;

use alloy_primitives::Address;
use thiserror::Error;
use zeroize::Zeroizing;

use hashcredit_chain::esplora::EsploraConfig;
use hashcredit_chain::evm::EvmConfig;
use hashcredit_chain::node::NodeRpcConfig;

use crate::relayer::RelayerConfig;
use crate::watcher::WatchedAddress;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitcoinBackend {
    Node,
    Esplora,
}

pub struct Config {
    pub backend: BitcoinBackend,
    pub node: NodeRpcConfig,
    pub esplora: EsploraConfig,
    pub evm: EvmConfig,
    pub db_path: String,
    pub relayer: RelayerConfig,
    pub watched: Vec<WatchedAddress>,
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

fn parse_address(key: &'static str) -> Result<Option<Address>, ConfigError> {
    var(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}

/// `WATCH_ADDRESSES` is a comma-separated list of `btc_address:evm_address`
/// pairs.
fn parse_watched(raw: &str) -> Result<Vec<WatchedAddress>, ConfigError> {
    let mut watched = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (btc, evm) = entry.split_once(':').ok_or(ConfigError::Invalid {
            key: "WATCH_ADDRESSES",
            value: entry.to_string(),
        })?;
        let borrower: Address = evm.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "WATCH_ADDRESSES",
            value: entry.to_string(),
        })?;
        watched.push(WatchedAddress {
            btc_address: btc.trim().to_string(),
            borrower,
            enabled: true,
        });
    }
    Ok(watched)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
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

        let node = NodeRpcConfig {
            url: var("BITCOIN_RPC_URL").unwrap_or_else(|| "http://localhost:18332".to_string()),
            user: var("BITCOIN_RPC_USER").unwrap_or_default(),
            password: var("BITCOIN_RPC_PASSWORD").unwrap_or_default(),
            timeout_secs: parse_var("BITCOIN_RPC_TIMEOUT_SECONDS", 30)?,
        };

        let esplora = EsploraConfig {
            base_url: var("ESPLORA_URL")
                .unwrap_or_else(|| EsploraConfig::default().base_url),
            timeout_secs: parse_var("BITCOIN_RPC_TIMEOUT_SECONDS", 30)?,
        };

        let evm = EvmConfig {
            rpc_url: var("EVM_RPC_URL").unwrap_or_else(|| "http://localhost:8545".to_string()),
            chain_id: parse_var("CHAIN_ID", 102_031)?,
            private_key: Zeroizing::new(var("PRIVATE_KEY").ok_or(ConfigError::Missing("PRIVATE_KEY"))?),
            checkpoint_manager: parse_address("CHECKPOINT_MANAGER")?,
            spv_verifier: parse_address("BTC_SPV_VERIFIER")?,
            credit_manager: parse_address("HASH_CREDIT_MANAGER")?,
            ..EvmConfig::default()
        };

        let relayer = RelayerConfig {
            required_confirmations: parse_var("REQUIRED_CONFIRMATIONS", 6)?,
            max_header_chain: parse_var("MAX_HEADER_CHAIN", 144)?,
            poll_interval: Duration::from_secs(parse_var("POLL_INTERVAL_SECONDS", 60)?),
            scan_batch_size: parse_var("SCAN_BATCH_SIZE", 10)?,
        };

        let watched = parse_watched(&var("WATCH_ADDRESSES").unwrap_or_default())?;

        Ok(Self {
            backend,
            node,
            esplora,
            evm,
            db_path: var("RELAYER_DB_PATH").unwrap_or_else(|| "./spv_relayer_db".to_string()),
            relayer,
            watched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watched_addresses_parse() {
        let watched = parse_watched(
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx:0x00000000000000000000000000000000000000a1, \
             mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn:0x00000000000000000000000000000000000000b2",
        )
        .unwrap();
        assert_eq!(watched.len(), 2);
        assert_eq!(
            watched[0].btc_address,
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"
        );
        assert!(watched.iter().all(|w| w.enabled));
    }

    #[test]
    fn watched_addresses_reject_malformed_entries() {
        assert!(parse_watched("no-separator-here").is_err());
        assert!(parse_watched("tb1qabc:not-an-evm-address").is_err());
        assert!(parse_watched("").unwrap().is_empty());
    }
}
