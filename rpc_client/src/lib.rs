use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub mod hex;

pub use hex::{
    address_to_topic, decode_int256, decode_token_amount, parse_hex_u64, topic_to_address,
};

#[derive(Error, Debug)]
pub enum RpcClientError {
    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Empty result for method '{0}'")]
    EmptyResult(String),
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RpcResult<T> = std::result::Result<T, RpcClientError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcClientConfig {
    /// Chain node HTTPS endpoint
    pub url: String,
    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            url: "https://mainnet.base.org".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// JSON-RPC response envelope: carries either `result` or `error`.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// One raw log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
}

/// Topic filter for `eth_getLogs` over an inclusive block range.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<String>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Single JSON-RPC transport over one upstream node. No retry at this
/// layer: retry is the responsibility of callers that need it.
#[derive(Clone)]
pub struct EvmRpcClient {
    config: RpcClientConfig,
    http_client: Client,
    request_id_counter: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl EvmRpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
            request_id_counter: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.request_id_counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Sends one JSON-RPC request. Fails with `Http` on non-2xx status,
    /// `Rpc` when the envelope carries an error, and `EmptyResult` when
    /// `result` is null — every method exposed here must return a value.
    pub async fn call(&self, method: &str, params: Value) -> RpcResult<Value> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": method,
            "params": params
        });

        debug!("RPC call {} -> {}", method, self.config.url);

        let response = self
            .http_client
            .post(&self.config.url)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RpcClientError::Http(response.status().as_u16()));
        }

        let envelope: RpcResponse = response.json().await?;

        if let Some(error) = envelope.error {
            return Err(RpcClientError::Rpc(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }

        match envelope.result {
            Some(result) if !result.is_null() => Ok(result),
            _ => Err(RpcClientError::EmptyResult(method.to_string())),
        }
    }

    /// Current block height.
    pub async fn block_number(&self) -> RpcResult<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| RpcClientError::InvalidResponse("eth_blockNumber: non-string result".to_string()))?;
        parse_hex_u64(hex_str)
    }

    /// Native-coin balance of `address`, in whole coins.
    pub async fn get_balance(&self, address: &str) -> RpcResult<f64> {
        let result = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| RpcClientError::InvalidResponse("eth_getBalance: non-string result".to_string()))?;
        decode_token_amount(hex_str, 18)
    }

    /// ERC-20 balance of `wallet` on `token_contract`, decoded at the
    /// token's fixed 18 decimals.
    pub async fn erc20_balance(&self, token_contract: &str, wallet: &str) -> RpcResult<f64> {
        let call_data = hex::balance_of_call_data(wallet)?;
        let result = self
            .call(
                "eth_call",
                json!([{ "to": token_contract, "data": call_data }, "latest"]),
            )
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| RpcClientError::InvalidResponse("eth_call: non-string result".to_string()))?;
        decode_token_amount(hex_str, 18)
    }

    /// Topic-filtered `eth_getLogs` over an inclusive block range.
    pub async fn get_logs(&self, filter: &LogFilter) -> RpcResult<Vec<RawLog>> {
        let params = json!([{
            "address": filter.address,
            "topics": filter.topics,
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
        }]);

        let result = self.call("eth_getLogs", params).await?;
        let logs: Vec<RawLog> = serde_json::from_value(result)?;
        Ok(logs)
    }
}
