//! Chain gateway over EVM JSON-RPC.
//!
//! Uses `eth_blockNumber`, `eth_getBlockByNumber` and `eth_getLogs`.
//! Every transport or node error surfaces as `SourceUnavailable` so the
//! pipeline retries it; responses that parse but make no sense surface as
//! `MalformedBlock`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainwatch_core::error::WatchError;
use chainwatch_core::gateway::ChainGateway;
use chainwatch_core::types::{BlockRef, LogEntry, LogFilter};

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, `Null` if absent, or the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Convert to a [`LogEntry`], failing on undecodable hex.
    pub fn into_entry(self) -> Result<LogEntry, String> {
        let block_number = parse_hex_u64(&self.block_number)
            .ok_or_else(|| format!("bad blockNumber {:?}", self.block_number))?;
        let log_index = parse_hex_u64(&self.log_index)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| format!("bad logIndex {:?}", self.log_index))?;
        let data = hex::decode(self.data.strip_prefix("0x").unwrap_or(&self.data))
            .map_err(|e| format!("bad data: {e}"))?;

        Ok(LogEntry {
            address: self.address,
            topics: self.topics,
            data,
            block_number,
            block_hash: self.block_hash,
            tx_hash: self.tx_hash,
            log_index,
            removed: self.removed.unwrap_or(false),
        })
    }
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Extract `(number, hash, parentHash)` from an `eth_getBlockByNumber` result.
pub fn block_from_json(v: &Value) -> Option<BlockRef> {
    Some(BlockRef {
        height: parse_hex_u64(v["number"].as_str()?)?,
        hash: v["hash"].as_str()?.to_string(),
        parent_hash: v["parentHash"].as_str()?.to_string(),
    })
}

/// `eth_getLogs` filter object for one height range.
pub fn logs_params(from: u64, to: u64, filter: &LogFilter) -> Value {
    let mut params = json!({
        "fromBlock": format!("0x{from:x}"),
        "toBlock": format!("0x{to:x}"),
        "address": filter.address,
    });
    if !filter.topic0_values.is_empty() {
        params["topics"] = json!([filter.topic0_values]);
    }
    params
}

// ─── Gateway ──────────────────────────────────────────────────────────────────

/// Connection settings for [`JsonRpcGateway`].
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub request_timeout: Duration,
    /// Refuse to start if the node reports a different chain ID.
    pub expected_chain_id: Option<u64>,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(10),
            expected_chain_id: None,
        }
    }
}

/// HTTP JSON-RPC chain gateway.
pub struct JsonRpcGateway {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    chain_id: u64,
}

impl std::fmt::Debug for JsonRpcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcGateway")
            .field("url", &self.url)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl JsonRpcGateway {
    /// Build the client and verify the endpoint answers `eth_chainId`.
    pub async fn connect(config: RpcConfig) -> Result<Self, WatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| WatchError::Config(format!("http client: {e}")))?;

        let mut gateway = Self {
            url: config.url,
            http,
            next_id: AtomicU64::new(1),
            chain_id: 0,
        };

        let raw = gateway.call("eth_chainId", vec![]).await?;
        let chain_id = raw
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| WatchError::SourceUnavailable(format!("bad eth_chainId result {raw}")))?;
        if let Some(expected) = config.expected_chain_id {
            if expected != chain_id {
                return Err(WatchError::Config(format!(
                    "node at {} is chain {chain_id}, expected {expected}",
                    gateway.url
                )));
            }
        }
        gateway.chain_id = chain_id;

        tracing::info!(chain_id, url = %gateway.url, "connected to node");
        Ok(gateway)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, WatchError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| WatchError::SourceUnavailable(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(WatchError::SourceUnavailable(format!(
                "{method}: HTTP {status}: {body}"
            )));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| WatchError::SourceUnavailable(format!("{method}: {e}")))?
            .into_result()
            .map_err(|e| WatchError::SourceUnavailable(format!("{method}: {e}")))
    }
}

#[async_trait]
impl ChainGateway for JsonRpcGateway {
    async fn latest_height(&self) -> Result<u64, WatchError> {
        let raw = self.call("eth_blockNumber", vec![]).await?;
        raw.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| WatchError::SourceUnavailable(format!("bad eth_blockNumber result {raw}")))
    }

    async fn header_at(&self, height: u64) -> Result<BlockRef, WatchError> {
        let raw = self
            .call("eth_getBlockByNumber", vec![json!(format!("0x{height:x}")), json!(false)])
            .await?;
        if raw.is_null() {
            return Err(WatchError::NotFound { height });
        }
        let block = block_from_json(&raw).ok_or_else(|| WatchError::MalformedBlock {
            height,
            reason: "header is missing number, hash or parentHash".into(),
        })?;
        if block.height != height {
            return Err(WatchError::MalformedBlock {
                height,
                reason: format!("node returned block {}", block.height),
            });
        }
        Ok(block)
    }

    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<LogEntry>, WatchError> {
        let raw = self.call("eth_getLogs", vec![logs_params(from, to, filter)]).await?;
        let logs: Vec<RawLog> = serde_json::from_value(raw).map_err(|e| WatchError::MalformedBlock {
            height: from,
            reason: format!("eth_getLogs result: {e}"),
        })?;

        tracing::debug!(from, to, address = %filter.address, count = logs.len(), "fetched logs");
        logs.into_iter()
            .map(|log| {
                log.into_entry().map_err(|reason| WatchError::MalformedBlock {
                    height: from,
                    reason,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0x"), None);
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn block_from_json_reads_links() {
        let v = json!({
            "number": "0x121eac0",
            "hash": "0xaaa",
            "parentHash": "0xbbb",
            "timestamp": "0x65a0f1c0",
            "transactions": []
        });
        let block = block_from_json(&v).unwrap();
        assert_eq!(block, BlockRef::new(19_000_000, "0xaaa", "0xbbb"));
        assert!(block_from_json(&json!({ "number": "0x1", "hash": "0xa" })).is_none());
    }

    #[test]
    fn raw_log_converts() {
        let raw: RawLog = serde_json::from_value(json!({
            "address": "0xA0b8",
            "topics": ["0xddf2"],
            "data": "0x00ff",
            "blockNumber": "0x12a05f200",
            "blockHash": "0xblock",
            "transactionHash": "0xtx",
            "logIndex": "0x5",
            "removed": false
        }))
        .unwrap();
        let entry = raw.into_entry().unwrap();
        assert_eq!(entry.block_number, 5_000_000_000);
        assert_eq!(entry.log_index, 5);
        assert_eq!(entry.data, vec![0x00, 0xff]);
        assert!(!entry.removed);
    }

    #[test]
    fn raw_log_without_removed_flag() {
        let raw: RawLog = serde_json::from_value(json!({
            "address": "0x1",
            "topics": [],
            "data": "0x",
            "blockNumber": "0x1",
            "blockHash": "0xb",
            "transactionHash": "0xt",
            "logIndex": "0x0"
        }))
        .unwrap();
        let entry = raw.into_entry().unwrap();
        assert!(entry.data.is_empty());
        assert!(!entry.removed);
    }

    #[test]
    fn raw_log_with_bad_data_is_rejected() {
        let raw = RawLog {
            address: "0x1".into(),
            topics: vec![],
            data: "0xabc".into(),
            block_number: "0x1".into(),
            block_hash: "0xb".into(),
            tx_hash: "0xt".into(),
            log_index: "0x0".into(),
            removed: None,
        };
        assert!(raw.into_entry().unwrap_err().contains("bad data"));
    }

    #[test]
    fn logs_params_shape() {
        let filter = LogFilter::address("0xtoken").topic0("0xddf2");
        let params = logs_params(16, 16, &filter);
        assert_eq!(params["fromBlock"], "0x10");
        assert_eq!(params["toBlock"], "0x10");
        assert_eq!(params["address"], "0xtoken");
        assert_eq!(params["topics"], json!([["0xddf2"]]));

        let open = logs_params(1, 2, &LogFilter::address("0xtoken"));
        assert!(open.get("topics").is_none());
    }

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "eth_blockNumber", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
    }

    #[test]
    fn node_error_surfaces() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32005, "message": "query returned more than 10000 results" }
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32005);
        assert!(err.to_string().contains("10000 results"));
    }

    #[test]
    fn null_result_is_null() {
        let resp: JsonRpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1, "result": null })).unwrap();
        assert!(resp.into_result().unwrap().is_null());
    }
}
