use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Invalid log record: {0}")]
    InvalidRecord(String),
}

pub type IndexerResult<T> = std::result::Result<T, IndexerError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerClientConfig {
    /// Etherscan-compatible logs API base URL
    pub logs_api_base_url: String,
    /// Logs API key (empty = unauthenticated free tier)
    pub logs_api_key: String,
    /// Maximum records per page; a short page signals scan completion
    pub page_size: u32,
    /// Token-balances indexer base URL
    pub balances_api_base_url: String,
    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for IndexerClientConfig {
    fn default() -> Self {
        Self {
            logs_api_base_url: "https://api.basescan.org/api".to_string(),
            logs_api_key: "".to_string(),
            page_size: 1000,
            balances_api_base_url: "https://base.blockscout.com/api/v2".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// One log record from the indexed-logs API. Block numbers arrive as hex
/// quantities on this surface.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedLog {
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
}

impl IndexedLog {
    pub fn block_number_u64(&self) -> IndexerResult<u64> {
        let raw = self.block_number.as_str();
        let parsed = match raw.strip_prefix("0x") {
            Some(digits) => u64::from_str_radix(digits, 16),
            None => raw.parse::<u64>(),
        };
        parsed.map_err(|e| {
            IndexerError::InvalidRecord(format!("bad block number '{}': {}", raw, e))
        })
    }
}

/// Pagination state for one indexed-logs scan: produces block ranges,
/// advances the lower bound to one past the last block seen, and terminates
/// on a short page or an exhausted window. Pure state, independently
/// testable without I/O.
#[derive(Debug)]
pub struct PagedLogScan {
    from_block: u64,
    to_block: u64,
    page_size: u32,
    done: bool,
}

impl PagedLogScan {
    pub fn new(from_block: u64, to_block: u64, page_size: u32) -> Self {
        Self {
            from_block,
            to_block,
            page_size,
            done: from_block > to_block,
        }
    }

    /// The next range to request, or None when the scan has terminated.
    pub fn next_range(&self) -> Option<(u64, u64)> {
        if self.done {
            None
        } else {
            Some((self.from_block, self.to_block))
        }
    }

    /// Feeds one returned page back into the scan. A page shorter than the
    /// page size means the range is exhausted.
    pub fn advance(&mut self, page: &[IndexedLog]) {
        if page.len() < self.page_size as usize {
            self.done = true;
            return;
        }

        let last_block = page
            .iter()
            .filter_map(|log| log.block_number_u64().ok())
            .max();

        match last_block {
            Some(block) if block < self.to_block => {
                // A full page repeating the same lower bound would loop.
                self.from_block = self.from_block.max(block) + 1;
                if self.from_block > self.to_block {
                    self.done = true;
                }
            }
            _ => self.done = true,
        }
    }
}

/// One wallet holding from the token-balances indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenBalanceEntry {
    pub token: TokenInfo,
    /// Raw integer balance as a decimal string
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub address_hash: Option<String>,
    pub decimals: Option<String>,
    pub exchange_rate: Option<String>,
    pub symbol: Option<String>,
}

/// Client for the two indexer surfaces: Etherscan-compatible topic-filtered
/// logs and the token-balances endpoint.
#[derive(Clone)]
pub struct IndexerClient {
    config: IndexerClientConfig,
    http_client: Client,
}

impl IndexerClient {
    pub fn new(config: IndexerClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    /// Requests one page of topic-filtered logs: `topic0` is the event
    /// signature, `topic2` the indexed recipient filter. The record cap is
    /// sent explicitly (`offset`) so a short page reliably means the range
    /// is exhausted. A "no records" response is an empty page, not an error.
    pub async fn fetch_logs_page(
        &self,
        contract: &str,
        topic0: &str,
        topic2: &str,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<IndexedLog>> {
        let url = logs_page_url(
            &self.config.logs_api_base_url,
            &self.config.logs_api_key,
            self.config.page_size,
            contract,
            topic0,
            topic2,
            from_block,
            to_block,
        );

        debug!(
            "Logs page request for {} over blocks {}..={}",
            contract, from_block, to_block
        );

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(IndexerError::Api { status, message });
        }

        let payload: Value = response.json().await?;
        parse_logs_payload(&payload)
    }

    /// Pages through the window until a short page signals exhaustion. A
    /// failure after the first page stops pagination without discarding the
    /// pages already collected; a first-page failure propagates.
    pub async fn scan_logs(
        &self,
        contract: &str,
        topic0: &str,
        topic2: &str,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<IndexedLog>> {
        let mut scan = PagedLogScan::new(from_block, to_block, self.config.page_size);
        let mut collected: Vec<IndexedLog> = Vec::new();

        while let Some((page_from, page_to)) = scan.next_range() {
            match self
                .fetch_logs_page(contract, topic0, topic2, page_from, page_to)
                .await
            {
                Ok(page) => {
                    scan.advance(&page);
                    collected.extend(page);
                }
                Err(e) if collected.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        "Log scan for {} stopped early at block {}: {}",
                        contract, page_from, e
                    );
                    break;
                }
            }
        }

        Ok(collected)
    }

    /// Full ERC-20 balance list for the wallet.
    pub async fn get_token_balances(&self, wallet: &str) -> IndexerResult<Vec<TokenBalanceEntry>> {
        let url = format!(
            "{}/addresses/{}/token-balances",
            self.config.balances_api_base_url, wallet
        );
        debug!("Fetching token balances for {}", wallet);

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(IndexerError::Api { status, message });
        }

        let entries: Vec<TokenBalanceEntry> = response.json().await?;
        Ok(entries)
    }
}

/// Builds one logs-page request URL. The scan always asks for page 1: the
/// block window itself advances between requests, and `offset` pins the
/// per-page record cap that [`PagedLogScan`] terminates against.
#[allow(clippy::too_many_arguments)]
fn logs_page_url(
    base_url: &str,
    api_key: &str,
    page_size: u32,
    contract: &str,
    topic0: &str,
    topic2: &str,
    from_block: u64,
    to_block: u64,
) -> String {
    format!(
        "{}?module=logs&action=getLogs&address={}&fromBlock={}&toBlock={}&topic0={}&topic0_2_opr=and&topic2={}&page=1&offset={}&apikey={}",
        base_url, contract, from_block, to_block, topic0, topic2, page_size, api_key,
    )
}

/// Extracts the log array from the Etherscan-style envelope. `result` that
/// is not an array (the "No records found" shape) is an empty page.
pub fn parse_logs_payload(payload: &Value) -> IndexerResult<Vec<IndexedLog>> {
    match payload.get("result") {
        Some(result) if result.is_array() => {
            let logs: Vec<IndexedLog> = serde_json::from_value(result.clone())?;
            Ok(logs)
        }
        _ => Ok(vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(block: u64) -> IndexedLog {
        IndexedLog {
            topics: vec![],
            data: "0x".to_string(),
            block_number: format!("0x{:x}", block),
            transaction_hash: format!("0xtx{}", block),
        }
    }

    fn full_page(start_block: u64, size: usize) -> Vec<IndexedLog> {
        (0..size as u64).map(|i| log(start_block + i)).collect()
    }

    #[test]
    fn test_block_number_parses_hex_and_decimal() {
        assert_eq!(log(0x1a2b).block_number_u64().unwrap(), 0x1a2b);

        let decimal = IndexedLog {
            topics: vec![],
            data: "0x".to_string(),
            block_number: "12345".to_string(),
            transaction_hash: "0xtx".to_string(),
        };
        assert_eq!(decimal.block_number_u64().unwrap(), 12345);
    }

    #[test]
    fn test_scan_terminates_on_short_page() {
        let mut scan = PagedLogScan::new(100, 200, 5);
        assert_eq!(scan.next_range(), Some((100, 200)));

        scan.advance(&full_page(100, 3)); // 3 < page size 5
        assert_eq!(scan.next_range(), None);
    }

    #[test]
    fn test_scan_advances_past_last_seen_block() {
        let mut scan = PagedLogScan::new(100, 200, 5);
        scan.advance(&full_page(100, 5)); // full page ending at block 104
        assert_eq!(scan.next_range(), Some((105, 200)));
    }

    #[test]
    fn test_scan_terminates_when_window_exhausted() {
        let mut scan = PagedLogScan::new(100, 104, 5);
        scan.advance(&full_page(100, 5)); // full page covering the whole window
        assert_eq!(scan.next_range(), None);
    }

    #[test]
    fn test_scan_with_inverted_window_is_done_immediately() {
        let scan = PagedLogScan::new(200, 100, 5);
        assert_eq!(scan.next_range(), None);
    }

    #[test]
    fn test_full_page_at_window_end_terminates() {
        let mut scan = PagedLogScan::new(100, 200, 5);
        let page = vec![log(196), log(197), log(198), log(199), log(200)];
        scan.advance(&page);
        assert_eq!(scan.next_range(), None);
    }

    #[test]
    fn test_logs_page_url_pins_record_cap_to_page_size() {
        let url = logs_page_url(
            "https://api.basescan.org/api",
            "KEY",
            1000,
            "0x3ec2156d4c0a9cbdab4a016633b7bcf6a8d68ea2",
            "0xddf2",
            "0x0000b105",
            100,
            200,
        );
        assert!(url.contains("page=1"));
        assert!(url.contains("offset=1000"));
        assert!(url.contains("fromBlock=100&toBlock=200"));
        assert!(url.ends_with("apikey=KEY"));
    }

    #[test]
    fn test_parse_logs_payload_array() {
        let payload = json!({
            "status": "1",
            "message": "OK",
            "result": [{
                "topics": ["0xaaa"],
                "data": "0x",
                "blockNumber": "0x64",
                "transactionHash": "0xtx"
            }]
        });
        let logs = parse_logs_payload(&payload).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number_u64().unwrap(), 100);
    }

    #[test]
    fn test_parse_logs_payload_no_records_is_empty_page() {
        let payload = json!({
            "status": "0",
            "message": "No records found",
            "result": "No records found"
        });
        assert!(parse_logs_payload(&payload).unwrap().is_empty());
    }

    #[test]
    fn test_token_balance_entry_deserializes() {
        let raw = json!({
            "token": {
                "address_hash": "0xabc0000000000000000000000000000000000001",
                "decimals": "18",
                "exchange_rate": "1.25",
                "symbol": "TKN"
            },
            "value": "1000000000000000000"
        });
        let entry: TokenBalanceEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.token.symbol.as_deref(), Some("TKN"));
        assert_eq!(entry.value.as_deref(), Some("1000000000000000000"));
    }
}
