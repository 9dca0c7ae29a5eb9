use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod session_store;
pub use session_store::{AthRecord, AthUpdate, SessionStore, StoreError, VisitRecord};

/// The two ERC-20 contracts modeled in the wallet snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackedToken {
    Drb,
    Weth,
}

impl TrackedToken {
    pub fn symbol(&self) -> &'static str {
        match self {
            TrackedToken::Drb => "DRB",
            TrackedToken::Weth => "WETH",
        }
    }
}

/// One inbound ERC-20 transfer to the tracked wallet, interpreted as
/// claimed fee income. Immutable once constructed; deduplicated by hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Token amount already divided by the token's 1e18 decimals.
    pub value: f64,
    pub token: TrackedToken,
    pub block_number: u64,
    /// Estimated from block distance at the chain's average block time,
    /// not read from the block header.
    pub estimated_timestamp: i64,
}

/// One large directional swap in the tracked pool: the tracked token left
/// the pool to an external buyer and the USD value cleared the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeBuy {
    pub hash: String,
    pub block_number: u64,
    pub drb_amount: f64,
    pub usd_value: f64,
    pub buyer: String,
    pub estimated_timestamp: i64,
}

/// Aggregate of wallet holdings beyond the two tracked tokens. Recomputed
/// wholesale on each poll, never merged incrementally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtherTokensSnapshot {
    pub others_value_usd: f64,
    pub others_token_count: u32,
    pub eth_balance: f64,
    pub eth_value_usd: f64,
}

/// The authoritative value published after each successful core poll.
/// Derived USD fields are always recomputed from balances and prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub weth_balance: f64,
    pub drb_balance: f64,
    pub eth_price: f64,
    pub drb_price: f64,
    pub weth_value_usd: f64,
    pub drb_value_usd: f64,
    pub total_value_usd: f64,
    pub change_24h_percent: f64,
    pub recent_fees: Vec<TransferEvent>,
    pub last_updated: DateTime<Utc>,
}

impl WalletSnapshot {
    /// Builds a snapshot from raw balances and prices. The WETH leg's 24h
    /// change is not available from the pair endpoint and enters the blend
    /// as zero — a known approximation, not a data error.
    pub fn new(
        weth_balance: f64,
        drb_balance: f64,
        eth_price: f64,
        drb_price: f64,
        drb_change_24h: f64,
        recent_fees: Vec<TransferEvent>,
    ) -> Self {
        let weth_value_usd = weth_balance * eth_price;
        let drb_value_usd = drb_balance * drb_price;
        let total_value_usd = weth_value_usd + drb_value_usd;
        let change_24h_percent =
            weighted_change_24h(weth_value_usd, drb_value_usd, 0.0, drb_change_24h);

        Self {
            weth_balance,
            drb_balance,
            eth_price,
            drb_price,
            weth_value_usd,
            drb_value_usd,
            total_value_usd,
            change_24h_percent,
            recent_fees,
            last_updated: Utc::now(),
        }
    }

    /// USD sum of the current fee window, used by the last-visit record.
    pub fn fees_7d_usd(&self) -> f64 {
        self.recent_fees
            .iter()
            .map(|fee| {
                let price = match fee.token {
                    TrackedToken::Drb => self.drb_price,
                    TrackedToken::Weth => self.eth_price,
                };
                fee.value * price
            })
            .sum()
    }
}

/// Blends each asset's 24h price change by its USD-value weight. When the
/// wallet is worth nothing the weights degenerate to an even 0.5/0.5 split
/// instead of dividing by zero.
pub fn weighted_change_24h(
    weth_value_usd: f64,
    drb_value_usd: f64,
    weth_change: f64,
    drb_change: f64,
) -> f64 {
    let total = weth_value_usd + drb_value_usd;
    let (weth_weight, drb_weight) = if total > 0.0 {
        (weth_value_usd / total, drb_value_usd / total)
    } else {
        (0.5, 0.5)
    };
    weth_change * weth_weight + drb_change * drb_weight
}

/// Merges two polls' transfer sets, keeping each transaction hash exactly
/// once (first occurrence wins — incoming events are newer and come first)
/// and ordering the result newest-first by block number.
pub fn merge_transfers(
    incoming: Vec<TransferEvent>,
    previous: &[TransferEvent],
    cap: usize,
) -> Vec<TransferEvent> {
    let mut seen = std::collections::HashSet::new();
    let mut merged: Vec<TransferEvent> = Vec::with_capacity(incoming.len() + previous.len());

    for event in incoming.into_iter().chain(previous.iter().cloned()) {
        if seen.insert(event.hash.clone()) {
            merged.push(event);
        }
    }

    merged.sort_by(|a, b| b.block_number.cmp(&a.block_number));
    merged.truncate(cap);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(hash: &str, block: u64, value: f64) -> TransferEvent {
        TransferEvent {
            hash: hash.to_string(),
            from: "0xsender".to_string(),
            to: "0xwallet".to_string(),
            value,
            token: TrackedToken::Drb,
            block_number: block,
            estimated_timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_total_is_sum_of_parts() {
        let snapshot = WalletSnapshot::new(1.5, 250_000.0, 3200.0, 0.0015, 2.0, vec![]);
        assert!(
            (snapshot.total_value_usd - (snapshot.weth_value_usd + snapshot.drb_value_usd)).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_end_to_end_total_value() {
        // 2.0 WETH @ $3000 + 1,000,000 DRB @ $0.002 => $8000
        let snapshot = WalletSnapshot::new(2.0, 1_000_000.0, 3000.0, 0.002, 0.0, vec![]);
        assert!((snapshot.weth_value_usd - 6000.0).abs() < 1e-9);
        assert!((snapshot.drb_value_usd - 2000.0).abs() < 1e-9);
        assert!((snapshot.total_value_usd - 8000.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_change_single_asset() {
        // All value in DRB => blend equals the DRB change exactly
        let blended = weighted_change_24h(0.0, 100.0, 0.0, 5.0);
        assert!((blended - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_change_zero_total_uses_even_split() {
        let blended = weighted_change_24h(0.0, 0.0, 4.0, 8.0);
        assert!((blended - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_change_mixed_weights() {
        // 75% of value in WETH at +2%, 25% in DRB at +10% => +4%
        let blended = weighted_change_24h(300.0, 100.0, 2.0, 10.0);
        assert!((blended - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_transfers_dedupes_by_hash() {
        let previous = vec![transfer("0xaaa", 100, 1.0), transfer("0xbbb", 99, 2.0)];
        let incoming = vec![transfer("0xccc", 101, 3.0), transfer("0xaaa", 100, 1.0)];

        let merged = merge_transfers(incoming, &previous, 50);

        assert_eq!(merged.len(), 3);
        let hashes: Vec<&str> = merged.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0xccc", "0xaaa", "0xbbb"]);
    }

    #[test]
    fn test_merge_transfers_respects_cap() {
        let previous: Vec<TransferEvent> = (0..10)
            .map(|i| transfer(&format!("0x{i:03}"), i, 1.0))
            .collect();
        let merged = merge_transfers(vec![], &previous, 4);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].block_number, 9);
    }

    #[test]
    fn test_fees_7d_usd_prices_each_leg() {
        let fees = vec![
            TransferEvent {
                token: TrackedToken::Weth,
                ..transfer("0xaaa", 10, 0.5)
            },
            TransferEvent {
                token: TrackedToken::Drb,
                ..transfer("0xbbb", 9, 1000.0)
            },
        ];
        let snapshot = WalletSnapshot::new(0.0, 0.0, 3000.0, 0.002, 0.0, fees);
        // 0.5 WETH * 3000 + 1000 DRB * 0.002 = 1502
        assert!((snapshot.fees_7d_usd() - 1502.0).abs() < 1e-9);
    }
}
