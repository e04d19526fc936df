//! Bitcoin Core JSON-RPC 1.0 adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use hashcredit_spv::adapter::{
    ChainAdapter, ChainError, HeaderInfo, VerboseBlock, VerboseTx, VerboseTxOut,
};

#[derive(Debug, Clone)]
pub struct NodeRpcConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for NodeRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8332".to_string(),
            user: String::new(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Async client for a Bitcoin Core node.
pub struct NodeRpc {
    config: NodeRpcConfig,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl NodeRpc {
    pub fn new(config: NodeRpcConfig) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            config,
            client,
            request_id: AtomicU64::new(0),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.config.url).json(&payload);
        if !self.config.user.is_empty() {
            request = request.basic_auth(&self.config.user, Some(&self.config.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            // Core answers errors with a JSON body; anything else is transport.
            Err(_) => return Err(ChainError::Transport(format!("http status {status}"))),
        };

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(ChainError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        body.get("result")
            .cloned()
            .ok_or(ChainError::MissingField("result"))
    }

    async fn call_str(&self, method: &str, params: Value) -> Result<String, ChainError> {
        let result = self.call(method, params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or(ChainError::Malformed(format!("{method}: expected string")))
    }
}

/// The `bits` field is a hex string in Core's verbose header output, but
/// some compatible backends emit a number; accept both.
fn parse_bits(value: &Value) -> Result<u32, ChainError> {
    match value {
        Value::String(s) => u32::from_str_radix(s, 16)
            .map_err(|_| ChainError::Malformed(format!("bits `{s}` is not hex"))),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ChainError::Malformed(format!("bits `{n}` out of range"))),
        _ => Err(ChainError::MissingField("bits")),
    }
}

#[async_trait]
impl ChainAdapter for NodeRpc {
    async fn get_tip_height(&self) -> Result<u32, ChainError> {
        let result = self.call("getblockcount", json!([])).await?;
        result
            .as_u64()
            .and_then(|h| u32::try_from(h).ok())
            .ok_or(ChainError::Malformed("getblockcount: expected height".into()))
    }

    async fn get_block_hash(&self, height: u32) -> Result<String, ChainError> {
        self.call_str("getblockhash", json!([height])).await
    }

    async fn get_block_header_bytes(&self, block_hash: &str) -> Result<[u8; 80], ChainError> {
        let header_hex = self
            .call_str("getblockheader", json!([block_hash, false]))
            .await?;
        let raw = hex::decode(&header_hex)
            .map_err(|e| ChainError::Malformed(format!("header hex: {e}")))?;
        raw.try_into()
            .map_err(|raw: Vec<u8>| ChainError::Malformed(format!("header is {} bytes", raw.len())))
    }

    async fn get_block_header_info(&self, block_hash: &str) -> Result<HeaderInfo, ChainError> {
        let info = self.call("getblockheader", json!([block_hash, true])).await?;
        Ok(HeaderInfo {
            time: info
                .get("time")
                .and_then(Value::as_u64)
                .and_then(|t| u32::try_from(t).ok())
                .ok_or(ChainError::MissingField("time"))?,
            chainwork_hex: info
                .get("chainwork")
                .and_then(Value::as_str)
                .ok_or(ChainError::MissingField("chainwork"))?
                .to_string(),
            bits: parse_bits(info.get("bits").ok_or(ChainError::MissingField("bits"))?)?,
        })
    }

    async fn get_block_txids(&self, block_hash: &str) -> Result<Vec<String>, ChainError> {
        let block = self.call("getblock", json!([block_hash, 1])).await?;
        let txs = block
            .get("tx")
            .and_then(Value::as_array)
            .ok_or(ChainError::MissingField("tx"))?;
        txs.iter()
            .map(|t| {
                t.as_str()
                    .map(str::to_string)
                    .ok_or(ChainError::Malformed("non-string txid in block".into()))
            })
            .collect()
    }

    async fn get_raw_tx(&self, txid: &str) -> Result<Vec<u8>, ChainError> {
        let raw_hex = self.call_str("getrawtransaction", json!([txid, false])).await?;
        hex::decode(&raw_hex).map_err(|e| ChainError::Malformed(format!("raw tx hex: {e}")))
    }

    async fn get_block_verbose(&self, block_hash: &str) -> Result<Option<VerboseBlock>, ChainError> {
        let block = self.call("getblock", json!([block_hash, 2])).await?;
        let txs = block
            .get("tx")
            .and_then(Value::as_array)
            .ok_or(ChainError::MissingField("tx"))?;

        let mut out = Vec::with_capacity(txs.len());
        for tx in txs {
            let txid = tx
                .get("txid")
                .and_then(Value::as_str)
                .ok_or(ChainError::MissingField("txid"))?
                .to_string();
            let vouts = tx
                .get("vout")
                .and_then(Value::as_array)
                .ok_or(ChainError::MissingField("vout"))?;
            let mut outputs = Vec::with_capacity(vouts.len());
            for vout in vouts {
                let n = vout
                    .get("n")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or(ChainError::MissingField("n"))?;
                // serde_json's arbitrary_precision keeps the node's decimal
                // text intact, so satoshi conversion stays exact.
                let value_btc = match vout.get("value") {
                    Some(Value::Number(num)) => num.to_string(),
                    Some(Value::String(s)) => s.clone(),
                    _ => return Err(ChainError::MissingField("value")),
                };
                let script_pubkey_hex = vout
                    .get("scriptPubKey")
                    .and_then(|s| s.get("hex"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                outputs.push(VerboseTxOut {
                    n,
                    value_btc,
                    script_pubkey_hex,
                });
            }
            out.push(VerboseTx { txid, outputs });
        }

        Ok(Some(VerboseBlock { txs: out }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_accepts_hex_string_and_number() {
        assert_eq!(parse_bits(&json!("1d00ffff")).unwrap(), 0x1D00_FFFF);
        assert_eq!(parse_bits(&json!(486_604_799u64)).unwrap(), 0x1D00_FFFF);
        assert!(parse_bits(&json!("zz")).is_err());
        assert!(parse_bits(&json!(null)).is_err());
    }

    #[test]
    fn verbose_values_keep_exact_decimals() {
        // 0.1 BTC must survive JSON parsing without float rounding
        let value: Value = serde_json::from_str(r#"{"value": 0.1}"#).unwrap();
        let Value::Number(num) = value.get("value").unwrap() else {
            panic!("expected number");
        };
        assert_eq!(num.to_string(), "0.1");
        assert_eq!(hashcredit_spv::amount::btc_to_sats(&num.to_string()).unwrap(), 10_000_000);
    }
}
