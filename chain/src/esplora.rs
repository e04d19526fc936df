//! Esplora-compatible REST adapter (Blockstream, mempool.space).
//!
//! Serves the SPV pipeline queries plus paginated address history for the
//! read-only ops surface. Esplora does not expose chainwork, so checkpoint
//! anchoring requires the Core backend.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use hashcredit_spv::adapter::{ChainAdapter, ChainError, HeaderInfo};

/// Esplora's fixed page size for `/address/{a}/txs`.
const TXS_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct EsploraConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for EsploraConfig {
    fn default() -> Self {
        Self {
            base_url: "https://blockstream.info/testnet/api".to_string(),
            timeout_secs: 30,
        }
    }
}

pub struct EsploraRest {
    base_url: String,
    client: reqwest::Client,
}

impl EsploraRest {
    pub fn new(config: EsploraConfig) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_text(&self, path: &str) -> Result<String, ChainError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: status.as_u16() as i64,
                message: text,
            });
        }
        Ok(text)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ChainError> {
        let text = self.get_text(path).await?;
        serde_json::from_str(&text).map_err(|e| ChainError::Malformed(format!("{path}: {e}")))
    }

    /// Full confirmed transaction history for an address.
    ///
    /// Esplora pages 25 transactions at a time via
    /// `/txs/chain/{last_seen_txid}`; a short or empty page ends the walk,
    /// and a repeated cursor (buggy upstream) breaks it with a warning.
    pub async fn get_address_txs(&self, address: &str) -> Result<Vec<Value>, ChainError> {
        let mut txs: Vec<Value> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        loop {
            let path = match &cursor {
                None => format!("/address/{address}/txs"),
                Some(txid) => {
                    if !seen_cursors.insert(txid.clone()) {
                        warn!(address, cursor = %txid, "address txs cursor loop; stopping");
                        break;
                    }
                    format!("/address/{address}/txs/chain/{txid}")
                }
            };

            let page = self.get_json(&path).await?;
            let page = page
                .as_array()
                .ok_or(ChainError::Malformed("address txs: expected array".into()))?
                .clone();
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            let last_txid = page
                .last()
                .and_then(|tx| tx.get("txid"))
                .and_then(Value::as_str)
                .map(str::to_string);
            txs.extend(page);

            if page_len < TXS_PAGE_SIZE {
                break;
            }
            match last_txid {
                Some(txid) => cursor = Some(txid),
                None => break,
            }
        }

        Ok(txs)
    }

    /// `/address/{a}`: chain and mempool stats for an address.
    pub async fn get_address_info(&self, address: &str) -> Result<Value, ChainError> {
        let info = self.get_json(&format!("/address/{address}")).await?;
        if !info.is_object() {
            return Err(ChainError::Malformed("address info: expected object".into()));
        }
        Ok(info)
    }

    /// `/tx/{txid}`: decoded transaction with confirmation status.
    pub async fn get_tx(&self, txid: &str) -> Result<Value, ChainError> {
        self.get_json(&format!("/tx/{txid}")).await
    }
}

#[async_trait]
impl ChainAdapter for EsploraRest {
    async fn get_tip_height(&self) -> Result<u32, ChainError> {
        let text = self.get_text("/blocks/tip/height").await?;
        text.trim()
            .parse()
            .map_err(|_| ChainError::Malformed(format!("tip height `{text}`")))
    }

    async fn get_block_hash(&self, height: u32) -> Result<String, ChainError> {
        let text = self.get_text(&format!("/block-height/{height}")).await?;
        Ok(text.trim().to_string())
    }

    async fn get_block_header_bytes(&self, block_hash: &str) -> Result<[u8; 80], ChainError> {
        let header_hex = self.get_text(&format!("/block/{block_hash}/header")).await?;
        let raw = hex::decode(header_hex.trim())
            .map_err(|e| ChainError::Malformed(format!("header hex: {e}")))?;
        raw.try_into()
            .map_err(|raw: Vec<u8>| ChainError::Malformed(format!("header is {} bytes", raw.len())))
    }

    async fn get_block_header_info(&self, block_hash: &str) -> Result<HeaderInfo, ChainError> {
        let block = self.get_json(&format!("/block/{block_hash}")).await?;
        let time = block
            .get("timestamp")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
            .ok_or(ChainError::MissingField("timestamp"))?;
        let bits = block
            .get("bits")
            .and_then(Value::as_u64)
            .and_then(|b| u32::try_from(b).ok())
            .ok_or(ChainError::MissingField("bits"))?;
        // Esplora has no chainwork endpoint; checkpoint anchoring needs
        // the Core backend.
        let chainwork_hex = block
            .get("chainwork")
            .and_then(Value::as_str)
            .ok_or(ChainError::MissingField("chainwork"))?
            .to_string();
        Ok(HeaderInfo {
            time,
            chainwork_hex,
            bits,
        })
    }

    async fn get_block_txids(&self, block_hash: &str) -> Result<Vec<String>, ChainError> {
        let txids = self.get_json(&format!("/block/{block_hash}/txids")).await?;
        txids
            .as_array()
            .ok_or(ChainError::Malformed("block txids: expected array".into()))?
            .iter()
            .map(|t| {
                t.as_str()
                    .map(str::to_string)
                    .ok_or(ChainError::Malformed("non-string txid".into()))
            })
            .collect()
    }

    async fn get_raw_tx(&self, txid: &str) -> Result<Vec<u8>, ChainError> {
        let raw_hex = self.get_text(&format!("/tx/{txid}/hex")).await?;
        hex::decode(raw_hex.trim()).map_err(|e| ChainError::Malformed(format!("raw tx hex: {e}")))
    }
}
