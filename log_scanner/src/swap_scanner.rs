// Large-buy detection over the tracked pool's Swap events: chunked range
// scans, signed-amount decode, USD threshold filter.

use crate::{estimate_timestamp, SWAP_EVENT_TOPIC};
use anyhow::Result;
use backoff_tracker::{retry_with_backoff, RetrySchedule};
use chrono::Utc;
use futures::future::join_all;
use num_bigint::BigInt;
use rpc_client::{decode_int256, topic_to_address, EvmRpcClient, LogFilter, RawLog};
use tracing::{debug, warn};
use wallet_core::LargeBuy;

#[derive(Debug, Clone)]
pub struct SwapScanConfig {
    pub pool_address: String,
    /// Trailing scan window (~7 days at the chain's block time)
    pub window_blocks: u64,
    /// Sub-range size bounding single-query result size
    pub chunk_blocks: u64,
    /// Concurrent chunk requests per batch
    pub chunk_batch_size: usize,
    pub large_buy_threshold_usd: f64,
    pub max_results: usize,
    pub average_block_time_seconds: u64,
}

pub struct SwapScanner {
    rpc: EvmRpcClient,
    config: SwapScanConfig,
    retry: RetrySchedule,
}

impl SwapScanner {
    pub fn new(rpc: EvmRpcClient, config: SwapScanConfig) -> Self {
        Self {
            rpc,
            config,
            retry: RetrySchedule::default(),
        }
    }

    /// The top-N large buys over the trailing window, newest first. This
    /// feed is best-effort: total failure yields an empty list and never
    /// blocks the dashboard.
    pub async fn fetch_large_buys(&self, current_price: f64) -> Vec<LargeBuy> {
        if current_price <= 0.0 {
            return vec![];
        }

        match self.try_fetch_large_buys(current_price).await {
            Ok(buys) => buys,
            Err(e) => {
                warn!("Swap scan failed, reporting empty feed: {}", e);
                vec![]
            }
        }
    }

    /// Like [`fetch_large_buys`](Self::fetch_large_buys) but surfaces the
    /// failure, for callers that track per-source backoff.
    pub async fn try_fetch_large_buys(&self, current_price: f64) -> Result<Vec<LargeBuy>> {
        let current_block = self.rpc.block_number().await?;
        let now_unix = Utc::now().timestamp();

        let ranges = chunk_ranges(
            current_block,
            self.config.window_blocks,
            self.config.chunk_blocks,
        );
        debug!(
            "Scanning {} chunks of {} blocks for pool swaps",
            ranges.len(),
            self.config.chunk_blocks
        );

        let mut all_logs: Vec<RawLog> = Vec::new();

        // Bounded concurrency: small batches keep us under upstream rate
        // limits while still overlapping the chunk requests.
        for batch in ranges.chunks(self.config.chunk_batch_size) {
            let requests = batch.iter().map(|&(from_block, to_block)| {
                let filter = LogFilter {
                    address: self.config.pool_address.clone(),
                    topics: vec![SWAP_EVENT_TOPIC.to_string()],
                    from_block,
                    to_block,
                };
                async move {
                    retry_with_backoff(|| self.rpc.get_logs(&filter), &self.retry).await
                }
            });

            for result in join_all(requests).await {
                match result {
                    Ok(logs) => all_logs.extend(logs),
                    // One chunk's swaps are lost for this tick; the rest of
                    // the window still counts.
                    Err(e) => warn!("Swap chunk failed after retries: {}", e),
                }
            }
        }

        let buys = all_logs
            .iter()
            .filter_map(|log| {
                parse_swap_log(
                    log,
                    current_block,
                    now_unix,
                    current_price,
                    self.config.large_buy_threshold_usd,
                    self.config.average_block_time_seconds,
                )
            })
            .collect();

        Ok(rank_buys(buys, self.config.max_results))
    }
}

/// Splits the trailing window into fixed sub-ranges, newest range first.
pub fn chunk_ranges(current_block: u64, window_blocks: u64, chunk_blocks: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut offset = 0u64;
    while offset < window_blocks {
        let to_block = current_block.saturating_sub(offset);
        let from_block = current_block.saturating_sub(offset + chunk_blocks);
        ranges.push((from_block, to_block));
        offset += chunk_blocks;
    }
    ranges
}

/// Decodes one Swap log into a [`LargeBuy`], or None when the swap is a
/// sell, below the USD threshold, or malformed.
///
/// The Swap event's data packs amount0 and amount1 as consecutive int256
/// words. For this pool DRB is token0 (Uniswap V3 orders tokens by
/// address, and the DRB contract sorts below WETH), so a negative amount0
/// means DRB flowed out of the pool to a buyer.
pub fn parse_swap_log(
    log: &RawLog,
    current_block: u64,
    now_unix: i64,
    current_price: f64,
    threshold_usd: f64,
    average_block_time_seconds: u64,
) -> Option<LargeBuy> {
    let data = log.data.strip_prefix("0x").unwrap_or(&log.data);
    if data.len() < 64 {
        return None;
    }

    let amount0 = decode_int256(&data[..64]).ok()?;
    if amount0 >= BigInt::from(0) {
        return None; // sell or neutral
    }

    let drb_amount = (-amount0).to_string().parse::<f64>().ok()? / 1e18;
    let usd_value = drb_amount * current_price;
    if usd_value < threshold_usd {
        return None;
    }

    let block_number = rpc_client::parse_hex_u64(&log.block_number).ok()?;
    let buyer = log
        .topics
        .get(2)
        .map(|topic| topic_to_address(topic))
        .unwrap_or_else(|| "unknown".to_string());

    Some(LargeBuy {
        hash: log.transaction_hash.clone(),
        block_number,
        drb_amount,
        usd_value,
        buyer,
        estimated_timestamp: estimate_timestamp(
            now_unix,
            current_block,
            block_number,
            average_block_time_seconds,
        ),
    })
}

/// Newest first by block number, capped to the configured feed length.
pub fn rank_buys(mut buys: Vec<LargeBuy>, cap: usize) -> Vec<LargeBuy> {
    buys.sort_by(|a, b| b.block_number.cmp(&a.block_number));
    buys.truncate(cap);
    buys
}
