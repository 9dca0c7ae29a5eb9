// Recovers inbound token transfers (claimed fee income) for the tracked
// wallet over the trailing window, across both tracked token contracts.

use crate::{estimate_timestamp, TRANSFER_EVENT_TOPIC};
use anyhow::Result;
use chrono::Utc;
use indexer_client::{IndexedLog, IndexerClient};
use rpc_client::{address_to_topic, decode_token_amount, topic_to_address, EvmRpcClient};
use tracing::{debug, warn};
use wallet_core::{TrackedToken, TransferEvent};

#[derive(Debug, Clone)]
pub struct TransferScanConfig {
    pub wallet: String,
    pub drb_contract: String,
    pub weth_contract: String,
    /// Trailing scan window (~7 days at the chain's block time)
    pub window_blocks: u64,
    pub average_block_time_seconds: u64,
}

pub struct TransferScanner {
    rpc: EvmRpcClient,
    indexer: IndexerClient,
    config: TransferScanConfig,
}

impl TransferScanner {
    pub fn new(rpc: EvmRpcClient, indexer: IndexerClient, config: TransferScanConfig) -> Self {
        Self {
            rpc,
            indexer,
            config,
        }
    }

    /// Inbound transfers to the tracked wallet over the trailing window,
    /// newest first. Fees are non-critical: any failure yields an empty
    /// list, and a mid-scan failure on one token keeps the pages already
    /// collected for it.
    pub async fn fetch_recent_fees(&self) -> Vec<TransferEvent> {
        match self.try_fetch_recent_fees().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Fee scan failed, reporting empty window: {}", e);
                vec![]
            }
        }
    }

    /// Like [`fetch_recent_fees`](Self::fetch_recent_fees) but surfaces the
    /// failure, for callers that track per-source backoff.
    pub async fn try_fetch_recent_fees(&self) -> Result<Vec<TransferEvent>> {
        let current_block = self.rpc.block_number().await?;
        let now_unix = Utc::now().timestamp();
        let from_block = current_block.saturating_sub(self.config.window_blocks);
        let recipient_topic = address_to_topic(&self.config.wallet)?;

        let mut events: Vec<TransferEvent> = Vec::new();

        for (contract, token) in [
            (self.config.drb_contract.as_str(), TrackedToken::Drb),
            (self.config.weth_contract.as_str(), TrackedToken::Weth),
        ] {
            let logs = match self
                .indexer
                .scan_logs(
                    contract,
                    TRANSFER_EVENT_TOPIC,
                    &recipient_topic,
                    from_block,
                    current_block,
                )
                .await
            {
                Ok(logs) => logs,
                Err(e) => {
                    // The other token's transfers are still worth reporting.
                    warn!("Transfer scan for {} failed: {}", token.symbol(), e);
                    continue;
                }
            };

            debug!("{} transfer logs for {}", logs.len(), token.symbol());

            for log in &logs {
                if let Some(event) = decode_transfer_log(
                    log,
                    token,
                    current_block,
                    now_unix,
                    self.config.average_block_time_seconds,
                ) {
                    events.push(event);
                }
            }
        }

        events.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        Ok(events)
    }
}

/// Decodes one Transfer log into a [`TransferEvent`]. A malformed record
/// is dropped on its own; it never aborts the surrounding scan.
pub fn decode_transfer_log(
    log: &IndexedLog,
    token: TrackedToken,
    current_block: u64,
    now_unix: i64,
    average_block_time_seconds: u64,
) -> Option<TransferEvent> {
    if log.topics.len() < 3 {
        return None;
    }

    let block_number = log.block_number_u64().ok()?;
    let value = decode_token_amount(&log.data, 18).ok()?;

    Some(TransferEvent {
        hash: log.transaction_hash.clone(),
        from: topic_to_address(&log.topics[1]),
        to: topic_to_address(&log.topics[2]),
        value,
        token,
        block_number,
        estimated_timestamp: estimate_timestamp(
            now_unix,
            current_block,
            block_number,
            average_block_time_seconds,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET_TOPIC: &str =
        "0x000000000000000000000000b1058c959987e3513600eb5b4fd82aeee2a0e4f9";
    const SENDER_TOPIC: &str =
        "0x0000000000000000000000005116773e18a9c7bb03ebb961b38678e45e238923";

    fn transfer_log(block: u64, data: &str) -> IndexedLog {
        serde_json::from_value(serde_json::json!({
            "topics": [TRANSFER_EVENT_TOPIC, SENDER_TOPIC, WALLET_TOPIC],
            "data": data,
            "blockNumber": format!("0x{:x}", block),
            "transactionHash": format!("0xfee{}", block),
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_transfer_of_1000_tokens() {
        // 1000 * 1e18 as a 32-byte data word
        let data = format!("0x{:0>64}", "3635c9adc5dea00000");
        let log = transfer_log(4_900, &data);

        let event =
            decode_transfer_log(&log, TrackedToken::Drb, 5_000, 1_700_000_000, 2).unwrap();

        assert!((event.value - 1000.0).abs() < 1e-9);
        assert_eq!(event.to, "0xb1058c959987e3513600eb5b4fd82aeee2a0e4f9");
        assert_eq!(event.from, "0x5116773e18a9c7bb03ebb961b38678e45e238923");
        assert_eq!(event.block_number, 4_900);
        // 100 blocks behind at 2s per block
        assert_eq!(event.estimated_timestamp, 1_699_999_800);
    }

    #[test]
    fn test_decode_skips_log_with_missing_topics() {
        let mut log = transfer_log(4_900, "0x0");
        log.topics.truncate(2);
        assert!(decode_transfer_log(&log, TrackedToken::Drb, 5_000, 0, 2).is_none());
    }

    #[test]
    fn test_decode_skips_log_with_garbage_data() {
        let log = transfer_log(4_900, "0xNOTHEX");
        assert!(decode_transfer_log(&log, TrackedToken::Weth, 5_000, 0, 2).is_none());
    }

    #[test]
    fn test_decode_skips_log_with_bad_block_number() {
        let mut log = transfer_log(4_900, "0x0");
        log.block_number = "bogus".to_string();
        assert!(decode_transfer_log(&log, TrackedToken::Drb, 5_000, 0, 2).is_none());
    }
}
