// Drives the polling families that keep the dashboard's data fresh: each
// family runs on its own cadence, consults the shared backoff tracker and
// the visibility gate before every tick, and publishes over watch channels
// so consumers always see the latest complete value.

use backoff_tracker::BackoffTracker;
use chrono::Utc;
use config_manager::TrackerConfig;
use indexer_client::{IndexerClient, IndexerClientConfig};
use log_scanner::{SwapScanConfig, SwapScanner, TransferScanConfig, TransferScanner};
use price_client::{PriceClient, PriceClientConfig, PricePoint};
use rpc_client::{EvmRpcClient, RpcClientConfig};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use wallet_core::{
    merge_transfers, LargeBuy, OtherTokensSnapshot, SessionStore, TransferEvent, WalletSnapshot,
};

pub mod other_tokens;
pub use other_tokens::{AggregateOutcome, OtherTokenAggregator};

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("RPC client error: {0}")]
    Rpc(String),
    #[error("Price client error: {0}")]
    Price(String),
    #[error("Indexer client error: {0}")]
    Indexer(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Session store error: {0}")]
    Store(String),
    #[error("Anyhow error: {0}")]
    Anyhow(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Anyhow(err.to_string())
    }
}

impl From<rpc_client::RpcClientError> for OrchestratorError {
    fn from(err: rpc_client::RpcClientError) -> Self {
        OrchestratorError::Rpc(err.to_string())
    }
}

impl From<price_client::PriceClientError> for OrchestratorError {
    fn from(err: price_client::PriceClientError) -> Self {
        OrchestratorError::Price(err.to_string())
    }
}

impl From<indexer_client::IndexerError> for OrchestratorError {
    fn from(err: indexer_client::IndexerError) -> Self {
        OrchestratorError::Indexer(err.to_string())
    }
}

impl From<config_manager::ConfigurationError> for OrchestratorError {
    fn from(err: config_manager::ConfigurationError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}

impl From<wallet_core::StoreError> for OrchestratorError {
    fn from(err: wallet_core::StoreError) -> Self {
        OrchestratorError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// The large-buys feed plus a running count of buys that appeared after the
/// first scan of this session. The seeding scan reports zero: there is no
/// "previous" to be new against.
#[derive(Debug, Clone, Default)]
pub struct LargeBuysFeed {
    pub buys: Vec<LargeBuy>,
    pub new_buy_count: usize,
}

/// Receiver ends of every published feed. Cheap to clone; each receiver
/// always observes the most recent complete value.
#[derive(Clone)]
pub struct SnapshotChannels {
    /// None until the first successful core poll
    pub core: watch::Receiver<Option<WalletSnapshot>>,
    /// Set only while no snapshot has ever been obtained
    pub core_error: watch::Receiver<Option<String>>,
    pub large_buys: watch::Receiver<LargeBuysFeed>,
    pub other_tokens: watch::Receiver<OtherTokensSnapshot>,
    pub price_history: watch::Receiver<Vec<PricePoint>>,
}

struct SessionState {
    store: SessionStore,
    last_visit_write: Option<Instant>,
}

/// Owns the clients and the polling loops. Construct once, then
/// [`spawn`](Self::spawn) the families and hand [`SnapshotChannels`] to
/// whatever renders or serves the data.
pub struct PollingOrchestrator {
    config: TrackerConfig,
    rpc: EvmRpcClient,
    prices: PriceClient,
    transfer_scanner: TransferScanner,
    swap_scanner: SwapScanner,
    aggregator: OtherTokenAggregator,
    backoff: Mutex<BackoffTracker>,
    visible: AtomicBool,
    session: Mutex<SessionState>,
    core_tx: watch::Sender<Option<WalletSnapshot>>,
    core_error_tx: watch::Sender<Option<String>>,
    large_buys_tx: watch::Sender<LargeBuysFeed>,
    other_tokens_tx: watch::Sender<OtherTokensSnapshot>,
    history_tx: watch::Sender<Vec<PricePoint>>,
}

impl PollingOrchestrator {
    pub fn new(config: TrackerConfig) -> Result<Arc<Self>> {
        let rpc = EvmRpcClient::new(RpcClientConfig {
            url: config.rpc.url.clone(),
            request_timeout_seconds: config.rpc.request_timeout_seconds,
        })?;

        let prices = PriceClient::new(PriceClientConfig {
            dexscreener_base_url: config.prices.dexscreener_base_url.clone(),
            coingecko_base_url: config.prices.coingecko_base_url.clone(),
            geckoterminal_base_url: config.prices.geckoterminal_base_url.clone(),
            request_timeout_seconds: config.prices.request_timeout_seconds,
        })?;

        let indexer = IndexerClient::new(IndexerClientConfig {
            logs_api_base_url: config.logs_api.api_base_url.clone(),
            logs_api_key: config.logs_api.api_key.clone(),
            page_size: config.logs_api.page_size,
            balances_api_base_url: config.indexer.api_base_url.clone(),
            request_timeout_seconds: config.indexer.request_timeout_seconds,
        })?;

        let transfer_scanner = TransferScanner::new(
            rpc.clone(),
            indexer.clone(),
            TransferScanConfig {
                wallet: config.wallet.address.clone(),
                drb_contract: config.wallet.drb_contract.clone(),
                weth_contract: config.wallet.weth_contract.clone(),
                window_blocks: config.scanner.window_blocks,
                average_block_time_seconds: config.scanner.average_block_time_seconds,
            },
        );

        let swap_scanner = SwapScanner::new(
            rpc.clone(),
            SwapScanConfig {
                pool_address: config.wallet.pool_address.clone(),
                window_blocks: config.scanner.window_blocks,
                chunk_blocks: config.scanner.chunk_blocks,
                chunk_batch_size: config.scanner.chunk_batch_size,
                large_buy_threshold_usd: config.scanner.large_buy_threshold_usd,
                max_results: config.scanner.max_large_buys,
                average_block_time_seconds: config.scanner.average_block_time_seconds,
            },
        );

        let aggregator = OtherTokenAggregator::new(
            rpc.clone(),
            indexer,
            Arc::new(prices.clone()),
            config.wallet.address.clone(),
            config.wallet.drb_contract.clone(),
            config.wallet.weth_contract.clone(),
            config.aggregator.clone(),
        );

        let session = SessionState {
            store: SessionStore::open(&config.store.path),
            last_visit_write: None,
        };

        let (core_tx, _) = watch::channel(None);
        let (core_error_tx, _) = watch::channel(None);
        let (large_buys_tx, _) = watch::channel(LargeBuysFeed::default());
        let (other_tokens_tx, _) = watch::channel(OtherTokensSnapshot::default());
        let (history_tx, _) = watch::channel(Vec::new());

        Ok(Arc::new(Self {
            config,
            rpc,
            prices,
            transfer_scanner,
            swap_scanner,
            aggregator,
            backoff: Mutex::new(BackoffTracker::default()),
            visible: AtomicBool::new(true),
            session: Mutex::new(session),
            core_tx,
            core_error_tx,
            large_buys_tx,
            other_tokens_tx,
            history_tx,
        }))
    }

    pub fn subscribe(&self) -> SnapshotChannels {
        SnapshotChannels {
            core: self.core_tx.subscribe(),
            core_error: self.core_error_tx.subscribe(),
            large_buys: self.large_buys_tx.subscribe(),
            other_tokens: self.other_tokens_tx.subscribe(),
            price_history: self.history_tx.subscribe(),
        }
    }

    /// Hidden dashboards stop polling entirely; published values stay as
    /// they are and refresh on the first tick after becoming visible again.
    pub fn set_visible(&self, visible: bool) {
        let was = self.visible.swap(visible, Ordering::SeqCst);
        if was != visible {
            info!("Polling {}", if visible { "resumed" } else { "paused" });
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Starts every polling family. Aborting the returned handles is the
    /// shutdown path; no tick outlives its task.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).run_core_family()),
            tokio::spawn(Arc::clone(self).run_fees_family()),
            tokio::spawn(Arc::clone(self).run_large_buys_family()),
            tokio::spawn(Arc::clone(self).run_other_tokens_family()),
            tokio::spawn(Arc::clone(self).run_price_history_family()),
        ]
    }

    /// True when the family may attempt a fetch this tick: the dashboard is
    /// visible and the source is not cooling down after failures.
    async fn gate(&self, source: &str) -> bool {
        if !self.is_visible() {
            debug!("Skipping {} tick while hidden", source);
            return false;
        }
        if self.backoff.lock().await.should_skip(source) {
            debug!("Skipping {} tick during backoff", source);
            return false;
        }
        true
    }

    /// Core family: balances and prices, the authoritative snapshot. All
    /// three reads must succeed for a publish; a partial result is dropped
    /// whole so consumers never see mixed-age numbers.
    async fn run_core_family(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.polling.core_interval_seconds);
        loop {
            if self.gate("core").await {
                self.core_tick().await;
            }
            sleep(interval).await;
        }
    }

    async fn core_tick(&self) {
        let weth = &self.config.wallet.weth_contract;
        let drb = &self.config.wallet.drb_contract;
        let wallet = &self.config.wallet.address;

        let (weth_balance, drb_balance, pair) = tokio::join!(
            self.rpc.erc20_balance(weth, wallet),
            self.rpc.erc20_balance(drb, wallet),
            self.prices.fetch_pair_prices(drb),
        );

        let outcome = weth_balance.map_err(OrchestratorError::from).and_then(
            |weth_balance| {
                let drb_balance = drb_balance?;
                let pair = pair?;
                Ok((weth_balance, drb_balance, pair))
            },
        );

        match outcome {
            Ok((weth_balance, drb_balance, pair)) => {
                self.backoff.lock().await.on_success("core");

                // The fee family owns recent_fees; carry the current window
                // across the rebuild.
                let fees = self
                    .core_tx
                    .borrow()
                    .as_ref()
                    .map(|s| s.recent_fees.clone())
                    .unwrap_or_default();

                let snapshot = WalletSnapshot::new(
                    weth_balance,
                    drb_balance,
                    pair.eth_price_usd,
                    pair.drb_price_usd,
                    pair.drb_change_24h,
                    fees,
                );

                info!(
                    "Core poll: total ${:.2} ({:.4} WETH, {:.0} DRB)",
                    snapshot.total_value_usd, snapshot.weth_balance, snapshot.drb_balance
                );

                self.record_session(&snapshot).await;
                self.core_error_tx.send_replace(None);
                self.core_tx.send_replace(Some(snapshot));
            }
            Err(e) => {
                self.backoff.lock().await.on_failure("core");
                warn!("Core poll failed: {}", e);
                // Only a dashboard that has never loaded shows an error;
                // otherwise the last snapshot stands.
                if self.core_tx.borrow().is_none() {
                    self.core_error_tx
                        .send_replace(Some(format!("Failed to load wallet data: {}", e)));
                }
            }
        }
    }

    /// Updates the persisted ATH and last-visit records. ATH writes happen
    /// only when the high actually moves; visit writes are throttled.
    async fn record_session(&self, snapshot: &WalletSnapshot) {
        if snapshot.total_value_usd <= 0.0 {
            return;
        }

        let now_ms = Utc::now().timestamp_millis();
        let persist_interval =
            Duration::from_secs(self.config.store.persist_interval_seconds);
        let mut session = self.session.lock().await;

        match session.store.update_ath(snapshot.total_value_usd, now_ms) {
            Ok(update) if update.is_new_ath => {
                info!("New personal all-time high: ${:.2}", update.ath.value);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to persist all-time high: {}", e),
        }

        let due = session
            .last_visit_write
            .map(|at| at.elapsed() >= persist_interval)
            .unwrap_or(true);
        if due {
            if let Err(e) = session.store.save_visit(
                snapshot.total_value_usd,
                snapshot.fees_7d_usd(),
                now_ms,
            ) {
                warn!("Failed to persist visit record: {}", e);
            }
            session.last_visit_write = Some(Instant::now());
        }
    }

    /// Fee family: rescans the transfer window and merges it into the core
    /// snapshot's fee list. A merge with no core snapshot is discarded —
    /// fees never create a snapshot on their own.
    async fn run_fees_family(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.polling.fees_interval_seconds);
        let cap = self.config.scanner.fee_window_cap;
        loop {
            if self.gate("fees").await {
                match self.transfer_scanner.try_fetch_recent_fees().await {
                    Ok(events) => {
                        self.backoff.lock().await.on_success("fees");
                        let merged = self
                            .core_tx
                            .send_if_modified(|slot| merge_fees_into(slot, events, cap));
                        if !merged {
                            debug!("Fee window ready before first core snapshot, discarded");
                        }
                    }
                    Err(e) => {
                        self.backoff.lock().await.on_failure("fees");
                        warn!("Fee poll failed: {}", e);
                    }
                }
            }
            sleep(interval).await;
        }
    }

    /// Large-buys family: staggered start so the first scan does not
    /// compete with the initial wallet load, then a window rescan per tick.
    /// Needs the current DRB price from the core snapshot to value swaps.
    async fn run_large_buys_family(self: Arc<Self>) {
        sleep(Duration::from_secs(
            self.config.polling.large_buys_initial_delay_seconds,
        ))
        .await;

        let interval = Duration::from_secs(self.config.polling.large_buys_interval_seconds);
        let mut tracker = NewBuyTracker::default();

        loop {
            if self.gate("large_buys").await {
                let price = self
                    .core_tx
                    .borrow()
                    .as_ref()
                    .map(|s| s.drb_price)
                    .unwrap_or(0.0);

                if price <= 0.0 {
                    debug!("No DRB price yet, deferring large-buy scan");
                } else {
                    match self.swap_scanner.try_fetch_large_buys(price).await {
                        Ok(buys) => {
                            self.backoff.lock().await.on_success("large_buys");
                            let previous = tracker.new_buy_count;
                            let new_buy_count = tracker.observe(&buys);
                            if new_buy_count > previous {
                                info!("{} new large buy(s) detected", new_buy_count - previous);
                            }
                            self.large_buys_tx.send_replace(LargeBuysFeed {
                                buys,
                                new_buy_count,
                            });
                        }
                        Err(e) => {
                            self.backoff.lock().await.on_failure("large_buys");
                            warn!("Large-buy poll failed: {}", e);
                        }
                    }
                }
            }
            sleep(interval).await;
        }
    }

    /// Other-tokens family: staggered start, full recompute per tick. Needs
    /// the ETH price from the core snapshot to value the native balance.
    async fn run_other_tokens_family(self: Arc<Self>) {
        sleep(Duration::from_secs(
            self.config.polling.other_tokens_initial_delay_seconds,
        ))
        .await;

        let interval = Duration::from_secs(self.config.polling.other_tokens_interval_seconds);

        loop {
            if self.gate("other_tokens").await {
                let eth_price = self
                    .core_tx
                    .borrow()
                    .as_ref()
                    .map(|s| s.eth_price)
                    .unwrap_or(0.0);

                if eth_price <= 0.0 {
                    debug!("No ETH price yet, deferring other-tokens fetch");
                } else {
                    let outcome = self.aggregator.fetch(eth_price).await;
                    if outcome.degraded {
                        // Keep the previous aggregate rather than publishing
                        // a half-empty one.
                        self.backoff.lock().await.on_failure("other_tokens");
                    } else {
                        self.backoff.lock().await.on_success("other_tokens");
                        self.other_tokens_tx.send_replace(outcome.snapshot);
                    }
                }
            }
            sleep(interval).await;
        }
    }

    /// Price-history family: the slowest loop. An empty series after a
    /// non-empty one is treated as a source failure and the previous series
    /// stays published.
    async fn run_price_history_family(self: Arc<Self>) {
        let interval =
            Duration::from_secs(self.config.polling.price_history_interval_seconds);
        let days = self.config.polling.price_history_days;
        let drb = self.config.wallet.drb_contract.clone();

        loop {
            if self.gate("price_history").await {
                let series = self.prices.fetch_price_history(&drb, days).await;
                if series.is_empty() && !self.history_tx.borrow().is_empty() {
                    self.backoff.lock().await.on_failure("price_history");
                    warn!("Price history came back empty, keeping previous series");
                } else {
                    self.backoff.lock().await.on_success("price_history");
                    debug!("Price history refreshed ({} points)", series.len());
                    self.history_tx.send_replace(series);
                }
            }
            sleep(interval).await;
        }
    }
}

/// Merges a fresh fee window into the core snapshot in place. Returns false
/// (nothing modified, nothing published) while no core snapshot exists.
fn merge_fees_into(
    slot: &mut Option<WalletSnapshot>,
    events: Vec<TransferEvent>,
    cap: usize,
) -> bool {
    match slot {
        Some(snapshot) => {
            let previous = std::mem::take(&mut snapshot.recent_fees);
            snapshot.recent_fees = merge_transfers(events, &previous, cap);
            true
        }
        None => false,
    }
}

/// Buys whose hash was not in the previous scan's result.
fn count_new_buys(buys: &[LargeBuy], known_hashes: &HashSet<String>) -> usize {
    buys.iter()
        .filter(|buy| !known_hashes.contains(&buy.hash))
        .count()
}

/// New-buy bookkeeping across successive scans. The known set is replaced
/// wholesale each scan, so it never outgrows the capped feed; the count
/// accumulates for the session. A buy that leaves the window and re-enters
/// counts again, which is what a reranked feed looks like to a viewer.
#[derive(Debug, Default)]
struct NewBuyTracker {
    known_hashes: HashSet<String>,
    seeded: bool,
    new_buy_count: usize,
}

impl NewBuyTracker {
    /// Feeds one successful scan and returns the cumulative new-buy count.
    /// The seeding scan only records what is already there.
    fn observe(&mut self, buys: &[LargeBuy]) -> usize {
        if self.seeded {
            self.new_buy_count += count_new_buys(buys, &self.known_hashes);
        }
        self.seeded = true;
        self.known_hashes = buys.iter().map(|buy| buy.hash.clone()).collect();
        self.new_buy_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_core::TrackedToken;

    fn transfer(hash: &str, block: u64) -> TransferEvent {
        TransferEvent {
            hash: hash.to_string(),
            from: "0xsender".to_string(),
            to: "0xwallet".to_string(),
            value: 1.0,
            token: TrackedToken::Drb,
            block_number: block,
            estimated_timestamp: 1_700_000_000,
        }
    }

    fn buy(hash: &str, block: u64) -> LargeBuy {
        LargeBuy {
            hash: hash.to_string(),
            block_number: block,
            drb_amount: 1_000_000.0,
            usd_value: 2_000.0,
            buyer: "0xbuyer".to_string(),
            estimated_timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_fee_merge_discarded_without_core_snapshot() {
        let mut slot: Option<WalletSnapshot> = None;
        let modified = merge_fees_into(&mut slot, vec![transfer("0xaaa", 100)], 50);
        assert!(!modified);
        assert!(slot.is_none());
    }

    #[test]
    fn test_fee_merge_dedupes_into_existing_snapshot() {
        let mut slot = Some(WalletSnapshot::new(
            1.0,
            1000.0,
            3000.0,
            0.002,
            0.0,
            vec![transfer("0xaaa", 100)],
        ));

        let modified = merge_fees_into(
            &mut slot,
            vec![transfer("0xbbb", 101), transfer("0xaaa", 100)],
            50,
        );

        assert!(modified);
        let fees = &slot.as_ref().unwrap().recent_fees;
        assert_eq!(fees.len(), 2);
        assert_eq!(fees[0].hash, "0xbbb");
    }

    #[test]
    fn test_fee_merge_leaves_balances_untouched() {
        let mut slot = Some(WalletSnapshot::new(2.0, 500.0, 3000.0, 0.002, 0.0, vec![]));
        let total_before = slot.as_ref().unwrap().total_value_usd;

        merge_fees_into(&mut slot, vec![transfer("0xaaa", 100)], 50);

        assert_eq!(slot.as_ref().unwrap().total_value_usd, total_before);
    }

    #[test]
    fn test_count_new_buys_against_known_set() {
        let known: HashSet<String> =
            ["0xaaa".to_string(), "0xbbb".to_string()].into_iter().collect();
        let buys = vec![buy("0xaaa", 100), buy("0xccc", 101), buy("0xddd", 102)];
        assert_eq!(count_new_buys(&buys, &known), 2);
    }

    #[test]
    fn test_count_new_buys_empty_known_set_counts_all() {
        let buys = vec![buy("0xaaa", 100)];
        assert_eq!(count_new_buys(&buys, &HashSet::new()), 1);
    }

    #[test]
    fn test_tracker_seeding_scan_reports_zero() {
        let mut tracker = NewBuyTracker::default();
        assert_eq!(tracker.observe(&[buy("0xaaa", 100), buy("0xbbb", 99)]), 0);
    }

    #[test]
    fn test_tracker_accumulates_across_scans() {
        let mut tracker = NewBuyTracker::default();
        tracker.observe(&[buy("0xaaa", 100)]);
        assert_eq!(tracker.observe(&[buy("0xbbb", 101), buy("0xaaa", 100)]), 1);
        assert_eq!(tracker.observe(&[buy("0xccc", 102), buy("0xbbb", 101)]), 2);
        // A quiet scan keeps the running total.
        assert_eq!(tracker.observe(&[buy("0xccc", 102), buy("0xbbb", 101)]), 2);
    }

    #[test]
    fn test_tracker_known_set_is_replaced_not_grown() {
        let mut tracker = NewBuyTracker::default();
        tracker.observe(&[buy("0xaaa", 100)]);
        tracker.observe(&[buy("0xbbb", 101)]); // 0xaaa dropped out of the feed
        assert_eq!(tracker.known_hashes.len(), 1);
        // Re-entering the feed counts as new again.
        assert_eq!(tracker.observe(&[buy("0xaaa", 100), buy("0xbbb", 101)]), 2);
    }

    #[tokio::test]
    async fn test_gate_respects_visibility_and_backoff() {
        let orchestrator = PollingOrchestrator::new(TrackerConfig::default()).unwrap();

        assert!(orchestrator.gate("core").await);

        orchestrator.set_visible(false);
        assert!(!orchestrator.gate("core").await);

        orchestrator.set_visible(true);
        orchestrator.backoff.lock().await.on_failure("core");
        assert!(!orchestrator.gate("core").await);
        // Other sources are unaffected by core's backoff.
        assert!(orchestrator.gate("fees").await);
    }

    #[test]
    fn test_subscribe_starts_with_empty_feeds() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let orchestrator = PollingOrchestrator::new(TrackerConfig::default()).unwrap();
        let channels = orchestrator.subscribe();

        assert!(channels.core.borrow().is_none());
        assert!(channels.core_error.borrow().is_none());
        assert!(channels.large_buys.borrow().buys.is_empty());
        assert!(channels.price_history.borrow().is_empty());
    }
}
