use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PriceClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Invalid price data: {0}")]
    InvalidPriceData(String),
}

pub type PriceResult<T> = std::result::Result<T, PriceClientError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceClientConfig {
    /// DEX-aggregator base URL (pair price + 24h change)
    pub dexscreener_base_url: String,
    /// Historical market-chart base URL
    pub coingecko_base_url: String,
    /// Batched multi-token price base URL
    pub geckoterminal_base_url: String,
    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for PriceClientConfig {
    fn default() -> Self {
        Self {
            dexscreener_base_url: "https://api.dexscreener.com".to_string(),
            coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
            geckoterminal_base_url: "https://api.geckoterminal.com/api/v2".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// Current prices derived from the tracked pool's pair listing. The DRB
/// price is quoted directly; the ETH price is inferred from
/// `priceUsd / priceNative`. The 24h change is available for DRB only —
/// the WETH leg defaults to zero, a documented approximation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairPrices {
    pub drb_price_usd: f64,
    pub eth_price_usd: f64,
    pub drb_change_24h: f64,
}

#[derive(Debug, Deserialize)]
pub struct DexPairsResponse {
    pub pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
pub struct DexPair {
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    #[serde(rename = "priceNative")]
    pub price_native: Option<String>,
    #[serde(rename = "priceChange")]
    pub price_change: Option<DexPriceChange>,
}

#[derive(Debug, Deserialize)]
pub struct DexPriceChange {
    pub h24: Option<f64>,
}

/// One point of a historical price series (UNIX milliseconds, USD).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub price: f64,
}

/// Batched token price lookup, the fallback for indexer entries without an
/// exchange rate. Returns prices keyed by lowercased contract address.
#[async_trait]
pub trait TokenPriceSource: Send + Sync {
    async fn fetch_token_prices(&self, addresses: &[String]) -> PriceResult<HashMap<String, f64>>;
}

#[derive(Clone)]
pub struct PriceClient {
    config: PriceClientConfig,
    http_client: Client,
}

impl PriceClient {
    pub fn new(config: PriceClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Current DRB and ETH prices from the aggregator's pair endpoint.
    /// "No trading pair yet" is a legitimate transient state for a new
    /// token, reported as zeroed prices rather than an error.
    pub async fn fetch_pair_prices(&self, token_contract: &str) -> PriceResult<PairPrices> {
        let url = format!(
            "{}/latest/dex/tokens/{}",
            self.config.dexscreener_base_url, token_contract
        );
        debug!("Fetching pair prices from: {}", url);

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PriceClientError::Api { status, message });
        }

        let pairs_response: DexPairsResponse = response.json().await?;
        Ok(derive_pair_prices(pairs_response))
    }

    /// Historical price series over the trailing `days`. Chart data is
    /// decorative, not load-bearing: any failure (network, non-2xx,
    /// malformed payload) yields an empty series rather than an error.
    pub async fn fetch_price_history(&self, token_contract: &str, days: u32) -> Vec<PricePoint> {
        let url = format!(
            "{}/coins/base/contract/{}/market_chart/?vs_currency=usd&days={}",
            self.config.coingecko_base_url, token_contract, days
        );

        let response = match self.http_client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Price history request failed: {}", e);
                return vec![];
            }
        };

        if !response.status().is_success() {
            warn!("Price history returned HTTP {}", response.status());
            return vec![];
        }

        match response.json::<Value>().await {
            Ok(payload) => parse_market_chart(&payload),
            Err(e) => {
                warn!("Price history payload unreadable: {}", e);
                vec![]
            }
        }
    }
}

/// Derives [`PairPrices`] from the aggregator payload. Missing pairs or
/// unparsable price strings degrade to zeroes.
pub fn derive_pair_prices(response: DexPairsResponse) -> PairPrices {
    let pair = match response.pairs.and_then(|mut pairs| {
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.remove(0))
        }
    }) {
        Some(pair) => pair,
        None => {
            debug!("No trading pair listed yet, reporting zeroed prices");
            return PairPrices::default();
        }
    };

    let drb_price_usd = pair
        .price_usd
        .as_deref()
        .and_then(|p| p.parse::<f64>().ok())
        .unwrap_or(0.0);
    let price_native = pair
        .price_native
        .as_deref()
        .and_then(|p| p.parse::<f64>().ok())
        .unwrap_or(0.0);

    // priceNative is DRB quoted in WETH, so USD/native recovers the ETH price.
    let eth_price_usd = if price_native > 0.0 {
        drb_price_usd / price_native
    } else {
        0.0
    };

    let drb_change_24h = pair
        .price_change
        .and_then(|change| change.h24)
        .unwrap_or(0.0);

    PairPrices {
        drb_price_usd,
        eth_price_usd,
        drb_change_24h,
    }
}

/// Parses the market-chart payload's `prices: [[timestampMs, price], ...]`
/// field. Anything malformed yields an empty series.
pub fn parse_market_chart(payload: &Value) -> Vec<PricePoint> {
    let Some(prices) = payload.get("prices").and_then(|p| p.as_array()) else {
        return vec![];
    };

    prices
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let timestamp_ms = pair.first()?.as_f64()? as i64;
            let price = pair.get(1)?.as_f64()?;
            Some(PricePoint {
                timestamp_ms,
                price,
            })
        })
        .collect()
}

/// Parses the multi-token price payload:
/// `{data: [{attributes: {address, price_usd}}]}`.
pub fn parse_multi_token_prices(payload: &Value) -> HashMap<String, f64> {
    let mut prices = HashMap::new();

    let Some(entries) = payload.get("data").and_then(|d| d.as_array()) else {
        return prices;
    };

    for entry in entries {
        let Some(attributes) = entry.get("attributes") else {
            continue;
        };
        let Some(address) = attributes.get("address").and_then(|a| a.as_str()) else {
            continue;
        };
        let Some(price) = attributes
            .get("price_usd")
            .and_then(|p| p.as_str())
            .and_then(|p| p.parse::<f64>().ok())
        else {
            continue;
        };
        prices.insert(address.to_lowercase(), price);
    }

    prices
}

#[async_trait]
impl TokenPriceSource for PriceClient {
    async fn fetch_token_prices(&self, addresses: &[String]) -> PriceResult<HashMap<String, f64>> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!(
            "{}/networks/base/tokens/multi/{}",
            self.config.geckoterminal_base_url,
            addresses.join(",")
        );
        debug!("Fetching batched prices for {} tokens", addresses.len());

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PriceClientError::Api { status, message });
        }

        let payload: Value = response.json().await?;
        Ok(parse_multi_token_prices(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derive_pair_prices_from_listing() {
        let raw = json!({
            "pairs": [{
                "priceUsd": "0.002",
                "priceNative": "0.00000066666666",
                "priceChange": { "h24": 5.2 }
            }]
        });
        let response: DexPairsResponse = serde_json::from_value(raw).unwrap();
        let prices = derive_pair_prices(response);

        assert!((prices.drb_price_usd - 0.002).abs() < 1e-12);
        assert!((prices.eth_price_usd - 3000.0).abs() < 1.0);
        assert!((prices.drb_change_24h - 5.2).abs() < 1e-12);
    }

    #[test]
    fn test_no_pair_reports_zeroes_not_error() {
        let response: DexPairsResponse = serde_json::from_value(json!({ "pairs": null })).unwrap();
        assert_eq!(derive_pair_prices(response), PairPrices::default());

        let response: DexPairsResponse = serde_json::from_value(json!({ "pairs": [] })).unwrap();
        assert_eq!(derive_pair_prices(response), PairPrices::default());
    }

    #[test]
    fn test_zero_native_price_does_not_divide_by_zero() {
        let raw = json!({
            "pairs": [{ "priceUsd": "0.002", "priceNative": "0" }]
        });
        let response: DexPairsResponse = serde_json::from_value(raw).unwrap();
        let prices = derive_pair_prices(response);
        assert_eq!(prices.eth_price_usd, 0.0);
    }

    #[test]
    fn test_parse_market_chart_points() {
        let payload = json!({
            "prices": [[1700000000000i64, 0.0021], [1700003600000i64, 0.0023]]
        });
        let series = parse_market_chart(&payload);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].timestamp_ms, 1_700_000_000_000);
        assert!((series[1].price - 0.0023).abs() < 1e-12);
    }

    #[test]
    fn test_parse_market_chart_missing_prices_field() {
        assert!(parse_market_chart(&json!({ "market_caps": [] })).is_empty());
    }

    #[test]
    fn test_parse_market_chart_malformed_entries_are_skipped() {
        let payload = json!({
            "prices": [[1700000000000i64, 0.0021], "garbage", [1700003600000i64]]
        });
        let series = parse_market_chart(&payload);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_parse_multi_token_prices() {
        let payload = json!({
            "data": [
                { "attributes": { "address": "0xAbC0000000000000000000000000000000000001", "price_usd": "1.25" } },
                { "attributes": { "address": "0xdef0000000000000000000000000000000000002", "price_usd": null } },
                { "attributes": { "address": "0x1230000000000000000000000000000000000003", "price_usd": "0.004" } }
            ]
        });
        let prices = parse_multi_token_prices(&payload);
        assert_eq!(prices.len(), 2);
        assert!(
            (prices["0xabc0000000000000000000000000000000000001"] - 1.25).abs() < 1e-12
        );
    }

    #[test]
    fn test_parse_multi_token_prices_empty_payload() {
        assert!(parse_multi_token_prices(&json!({})).is_empty());
    }
}
