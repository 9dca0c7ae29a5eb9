// Aggregates wallet holdings beyond the two tracked tokens: native coin
// balance plus every other ERC-20 the indexer knows about, valued with the
// indexer's own exchange rates and a batched price lookup for the rest.

use config_manager::AggregatorConfig;
use indexer_client::{IndexerClient, TokenBalanceEntry};
use price_client::TokenPriceSource;
use rpc_client::EvmRpcClient;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use wallet_core::OtherTokensSnapshot;

/// One candidate holding after filtering out the tracked contracts.
#[derive(Debug, Clone)]
pub struct Holding {
    /// Lowercased contract address
    pub address: String,
    pub symbol: Option<String>,
    /// Balance already divided by the token's decimals
    pub balance: f64,
    /// Indexer-supplied USD rate, when it has one
    pub exchange_rate: Option<f64>,
}

/// Result of one aggregation pass. `degraded` means the holdings list
/// itself could not be fetched; callers keep their previous value then.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub snapshot: OtherTokensSnapshot,
    pub degraded: bool,
}

pub struct OtherTokenAggregator {
    rpc: EvmRpcClient,
    indexer: IndexerClient,
    price_source: Arc<dyn TokenPriceSource>,
    wallet: String,
    drb_contract: String,
    weth_contract: String,
    config: AggregatorConfig,
}

impl OtherTokenAggregator {
    pub fn new(
        rpc: EvmRpcClient,
        indexer: IndexerClient,
        price_source: Arc<dyn TokenPriceSource>,
        wallet: String,
        drb_contract: String,
        weth_contract: String,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            rpc,
            indexer,
            price_source,
            wallet,
            drb_contract,
            weth_contract,
            config,
        }
    }

    /// One full aggregation pass. Individual source failures degrade the
    /// result (zero native balance, holdings skipped) instead of erroring:
    /// this feed is supplementary and must never block the dashboard.
    pub async fn fetch(&self, eth_price: f64) -> AggregateOutcome {
        let eth_balance = match self.rpc.get_balance(&self.wallet).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Native balance fetch failed, reporting zero: {}", e);
                0.0
            }
        };

        let entries = match self.indexer.get_token_balances(&self.wallet).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Token balance list fetch failed: {}", e);
                return AggregateOutcome {
                    snapshot: assemble_snapshot(
                        eth_balance,
                        eth_price,
                        0.0,
                        0,
                        self.config.native_dust_threshold,
                    ),
                    degraded: true,
                };
            }
        };

        let holdings = classify_holdings(&entries, &self.drb_contract, &self.weth_contract);
        debug!("{} other-token holdings after filtering", holdings.len());

        let candidates = fallback_candidates(&holdings, self.config.fallback_batch_cap);
        let fallback_prices = if candidates.is_empty() {
            HashMap::new()
        } else {
            match self.price_source.fetch_token_prices(&candidates).await {
                Ok(prices) => prices,
                Err(e) => {
                    // Unrated holdings simply won't count this pass.
                    warn!("Fallback price lookup failed: {}", e);
                    HashMap::new()
                }
            }
        };

        let (others_value_usd, rated_count) = aggregate_value(
            &holdings,
            &fallback_prices,
            self.config.materiality_threshold_usd,
        );

        AggregateOutcome {
            snapshot: assemble_snapshot(
                eth_balance,
                eth_price,
                others_value_usd,
                rated_count,
                self.config.native_dust_threshold,
            ),
            degraded: false,
        }
    }
}

/// Turns raw indexer entries into holdings: the two tracked contracts and
/// zero or unparsable balances are dropped here.
pub fn classify_holdings(
    entries: &[TokenBalanceEntry],
    drb_contract: &str,
    weth_contract: &str,
) -> Vec<Holding> {
    entries
        .iter()
        .filter_map(|entry| {
            let address = entry.token.address_hash.as_deref()?.to_lowercase();
            if address == drb_contract || address == weth_contract {
                return None;
            }

            let decimals = entry
                .token
                .decimals
                .as_deref()
                .and_then(|d| d.parse::<u32>().ok())
                .unwrap_or(18);
            let raw = entry.value.as_deref()?.parse::<f64>().ok()?;
            let balance = raw / 10f64.powi(decimals as i32);
            if balance <= 0.0 {
                return None;
            }

            let exchange_rate = entry
                .token
                .exchange_rate
                .as_deref()
                .and_then(|r| r.parse::<f64>().ok());

            Some(Holding {
                address,
                symbol: entry.token.symbol.clone(),
                balance,
                exchange_rate,
            })
        })
        .collect()
}

/// Addresses to send to the batched price lookup: the holdings without an
/// indexer rate, largest balances first, capped to the batch limit.
pub fn fallback_candidates(holdings: &[Holding], cap: usize) -> Vec<String> {
    let mut unrated: Vec<&Holding> = holdings
        .iter()
        .filter(|h| h.exchange_rate.is_none())
        .collect();
    unrated.sort_by(|a, b| {
        b.balance
            .partial_cmp(&a.balance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    unrated
        .into_iter()
        .take(cap)
        .map(|h| h.address.clone())
        .collect()
}

/// Sums the USD value of every holding whose value clears the materiality
/// threshold, using the indexer rate when present and the fallback price
/// otherwise. Returns the total and the count of material holdings.
pub fn aggregate_value(
    holdings: &[Holding],
    fallback_prices: &HashMap<String, f64>,
    materiality_threshold_usd: f64,
) -> (f64, u32) {
    let mut total = 0.0;
    let mut count = 0u32;

    for holding in holdings {
        let rate = holding
            .exchange_rate
            .or_else(|| fallback_prices.get(&holding.address).copied());
        let Some(rate) = rate else { continue };

        let value = holding.balance * rate;
        if value >= materiality_threshold_usd {
            total += value;
            count += 1;
        }
    }

    (total, count)
}

/// Assembles the published snapshot. The native coin counts as one more
/// holding when its balance is above the dust threshold.
pub fn assemble_snapshot(
    eth_balance: f64,
    eth_price: f64,
    others_value_usd: f64,
    rated_count: u32,
    native_dust_threshold: f64,
) -> OtherTokensSnapshot {
    let native_counts = eth_balance > native_dust_threshold;
    OtherTokensSnapshot {
        others_value_usd,
        others_token_count: rated_count + u32::from(native_counts),
        eth_balance,
        eth_value_usd: eth_balance * eth_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DRB: &str = "0x3ec2156d4c0a9cbdab4a016633b7bcf6a8d68ea2";
    const WETH: &str = "0x4200000000000000000000000000000000000006";

    fn entry(address: &str, raw_value: &str, rate: Option<&str>) -> TokenBalanceEntry {
        serde_json::from_value(json!({
            "token": {
                "address_hash": address,
                "decimals": "18",
                "exchange_rate": rate,
                "symbol": "TKN"
            },
            "value": raw_value
        }))
        .unwrap()
    }

    fn holding(address: &str, balance: f64, rate: Option<f64>) -> Holding {
        Holding {
            address: address.to_string(),
            symbol: None,
            balance,
            exchange_rate: rate,
        }
    }

    #[test]
    fn test_classify_drops_tracked_contracts() {
        let entries = vec![
            entry(DRB, "1000000000000000000", Some("1.0")),
            entry(WETH, "1000000000000000000", Some("3000.0")),
            entry(
                "0xAAA0000000000000000000000000000000000001",
                "2000000000000000000",
                Some("5.0"),
            ),
        ];
        let holdings = classify_holdings(&entries, DRB, WETH);
        assert_eq!(holdings.len(), 1);
        assert_eq!(
            holdings[0].address,
            "0xaaa0000000000000000000000000000000000001"
        );
        assert!((holdings[0].balance - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_classify_drops_zero_and_garbage_balances() {
        let entries = vec![
            entry("0xaaa0000000000000000000000000000000000001", "0", None),
            entry("0xbbb0000000000000000000000000000000000002", "bogus", None),
        ];
        assert!(classify_holdings(&entries, DRB, WETH).is_empty());
    }

    #[test]
    fn test_fallback_candidates_largest_first_and_capped() {
        let holdings = vec![
            holding("0x1", 5.0, None),
            holding("0x2", 50.0, None),
            holding("0x3", 10.0, Some(1.0)), // rated, excluded
            holding("0x4", 20.0, None),
        ];
        let candidates = fallback_candidates(&holdings, 2);
        assert_eq!(candidates, vec!["0x2".to_string(), "0x4".to_string()]);
    }

    #[test]
    fn test_aggregate_value_applies_materiality_threshold() {
        let fallback: HashMap<String, f64> = [("0x2".to_string(), 3.0)].into_iter().collect();
        let holdings = vec![
            holding("0x1", 100.0, Some(0.5)), // $50, rated
            holding("0x2", 10.0, None),       // $30 via fallback
            holding("0x3", 0.5, Some(1.0)),   // $0.50, below threshold
            holding("0x4", 99.0, None),       // no price at all
        ];
        let (total, count) = aggregate_value(&holdings, &fallback, 1.0);
        assert!((total - 80.0).abs() < 1e-9);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_native_above_dust_counts_as_a_holding() {
        let snapshot = assemble_snapshot(0.5, 3000.0, 80.0, 2, 0.0001);
        assert_eq!(snapshot.others_token_count, 3);
        assert!((snapshot.eth_value_usd - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_native_dust_is_not_counted() {
        let snapshot = assemble_snapshot(0.00005, 3000.0, 0.0, 0, 0.0001);
        assert_eq!(snapshot.others_token_count, 0);
        assert!(snapshot.eth_value_usd > 0.0);
    }
}
