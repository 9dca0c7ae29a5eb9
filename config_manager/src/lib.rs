use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracked wallet and contract addresses
    pub wallet: WalletConfig,

    /// JSON-RPC node configuration
    pub rpc: RpcConfig,

    /// Etherscan-compatible indexed-logs API
    pub logs_api: LogsApiConfig,

    /// Price sources (pair endpoint, history, batched fallback)
    pub prices: PriceApiConfig,

    /// Token-balances indexer
    pub indexer: IndexerApiConfig,

    /// Per-family polling intervals and staggers
    pub polling: PollingConfig,

    /// Log-scan geometry and thresholds
    pub scanner: ScannerConfig,

    /// Other-token aggregation thresholds
    pub aggregator: AggregatorConfig,

    /// Session store (ATH / last-visit records)
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// The single externally-owned address whose holdings are displayed
    pub address: String,

    /// Reward token contract (DRB)
    pub drb_contract: String,

    /// Wrapped-native token contract (WETH)
    pub weth_contract: String,

    /// Uniswap V3 DRB/WETH pool scanned for large buys
    pub pool_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Chain node HTTPS endpoint
    pub url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsApiConfig {
    /// API base URL
    pub api_base_url: String,

    /// API key (empty string means unauthenticated free tier)
    pub api_key: String,

    /// Maximum records per page; a short page signals scan completion
    pub page_size: u32,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceApiConfig {
    /// DEX-aggregator base URL (pair price + 24h change)
    pub dexscreener_base_url: String,

    /// Historical market-chart base URL
    pub coingecko_base_url: String,

    /// Batched multi-token price base URL
    pub geckoterminal_base_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerApiConfig {
    /// Token-balances indexer base URL
    pub api_base_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Core balances+prices family (the fastest loop)
    pub core_interval_seconds: u64,

    /// Fee-income family
    pub fees_interval_seconds: u64,

    /// Large-buys family
    pub large_buys_interval_seconds: u64,

    /// Initial stagger before the first large-buys scan, so it does not
    /// compete with the wallet's primary data load
    pub large_buys_initial_delay_seconds: u64,

    /// Other-tokens family
    pub other_tokens_interval_seconds: u64,

    /// Initial stagger before the first other-tokens fetch
    pub other_tokens_initial_delay_seconds: u64,

    /// Price-history family
    pub price_history_interval_seconds: u64,

    /// Trailing days requested from the market-chart endpoint
    pub price_history_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Chain's average block time, used for estimated timestamps
    pub average_block_time_seconds: u64,

    /// Trailing scan window (~7 days at 2s blocks)
    pub window_blocks: u64,

    /// Sub-range size for swap-log chunk queries
    pub chunk_blocks: u64,

    /// Concurrent chunk requests per batch (kept low for upstream rate limits)
    pub chunk_batch_size: usize,

    /// Minimum USD value for a swap to qualify as a large buy
    pub large_buy_threshold_usd: f64,

    /// Large-buy list cap (newest first)
    pub max_large_buys: usize,

    /// Fee-window cap after merging both token contracts
    pub fee_window_cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Minimum USD value for a holding to count toward the aggregate
    pub materiality_threshold_usd: f64,

    /// Maximum tokens sent to the batched fallback price lookup
    pub fallback_batch_cap: usize,

    /// Native-coin balance below this is not counted as a holding
    pub native_dust_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Session store file path
    pub path: String,

    /// Minimum seconds between persisted writes
    pub persist_interval_seconds: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            wallet: WalletConfig {
                address: "0xb1058c959987e3513600eb5b4fd82aeee2a0e4f9".to_string(),
                drb_contract: "0x3ec2156d4c0a9cbdab4a016633b7bcf6a8d68ea2".to_string(),
                weth_contract: "0x4200000000000000000000000000000000000006".to_string(),
                pool_address: "0x5116773e18a9c7bb03ebb961b38678e45e238923".to_string(),
            },
            rpc: RpcConfig {
                url: "https://mainnet.base.org".to_string(),
                request_timeout_seconds: 30,
            },
            logs_api: LogsApiConfig {
                api_base_url: "https://api.basescan.org/api".to_string(),
                api_key: "".to_string(),
                page_size: 1000,
                request_timeout_seconds: 30,
            },
            prices: PriceApiConfig {
                dexscreener_base_url: "https://api.dexscreener.com".to_string(),
                coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
                geckoterminal_base_url: "https://api.geckoterminal.com/api/v2".to_string(),
                request_timeout_seconds: 30,
            },
            indexer: IndexerApiConfig {
                api_base_url: "https://base.blockscout.com/api/v2".to_string(),
                request_timeout_seconds: 30,
            },
            polling: PollingConfig {
                core_interval_seconds: 60,
                fees_interval_seconds: 90,
                large_buys_interval_seconds: 90,
                large_buys_initial_delay_seconds: 8,
                other_tokens_interval_seconds: 120,
                other_tokens_initial_delay_seconds: 5,
                price_history_interval_seconds: 300,
                price_history_days: 7,
            },
            scanner: ScannerConfig {
                average_block_time_seconds: 2,
                window_blocks: 302_400, // ~7 days at 2s blocks
                chunk_blocks: 50_000,
                chunk_batch_size: 2,
                large_buy_threshold_usd: 1_000.0,
                max_large_buys: 10,
                fee_window_cap: 50,
            },
            aggregator: AggregatorConfig {
                materiality_threshold_usd: 1.0,
                fallback_batch_cap: 30,
                native_dust_threshold: 0.0001,
            },
            store: StoreConfig {
                path: "vault_session.json".to_string(),
                persist_interval_seconds: 300,
            },
        }
    }
}

fn is_hex_address(value: &str) -> bool {
    // Compiled per call; validation runs once at startup.
    Regex::new(r"^0x[0-9a-fA-F]{40}$")
        .expect("address pattern is valid")
        .is_match(value)
}

impl WalletConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, address) in [
            ("wallet.address", &self.address),
            ("wallet.drb_contract", &self.drb_contract),
            ("wallet.weth_contract", &self.weth_contract),
            ("wallet.pool_address", &self.pool_address),
        ] {
            if !is_hex_address(address) {
                return Err(ConfigurationError::InvalidValue(format!(
                    "{} is not a 0x-prefixed 20-byte hex address: '{}'",
                    name, address
                )));
            }
        }
        Ok(())
    }
}

impl TrackerConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&TrackerConfig::default())?);

        // Add config file if it exists
        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        // Add environment variables with prefix
        config_builder = config_builder.add_source(
            Environment::with_prefix("VAULT")
                .try_parsing(true)
                .separator("__"),
        );

        let config = config_builder.build()?;
        let mut tracker_config: TrackerConfig = config.try_deserialize()?;

        // Addresses are compared lowercased against wire data everywhere.
        tracker_config.wallet.address = tracker_config.wallet.address.to_lowercase();
        tracker_config.wallet.drb_contract = tracker_config.wallet.drb_contract.to_lowercase();
        tracker_config.wallet.weth_contract = tracker_config.wallet.weth_contract.to_lowercase();
        tracker_config.wallet.pool_address = tracker_config.wallet.pool_address.to_lowercase();

        tracker_config.validate()?;

        Ok(tracker_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.wallet.validate()?;

        for (name, value) in [
            ("rpc.request_timeout_seconds", self.rpc.request_timeout_seconds),
            ("polling.core_interval_seconds", self.polling.core_interval_seconds),
            ("polling.fees_interval_seconds", self.polling.fees_interval_seconds),
            (
                "polling.large_buys_interval_seconds",
                self.polling.large_buys_interval_seconds,
            ),
            (
                "polling.other_tokens_interval_seconds",
                self.polling.other_tokens_interval_seconds,
            ),
            (
                "polling.price_history_interval_seconds",
                self.polling.price_history_interval_seconds,
            ),
            ("scanner.average_block_time_seconds", self.scanner.average_block_time_seconds),
            ("scanner.window_blocks", self.scanner.window_blocks),
            ("scanner.chunk_blocks", self.scanner.chunk_blocks),
        ] {
            if value == 0 {
                return Err(ConfigurationError::InvalidValue(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.scanner.chunk_blocks > self.scanner.window_blocks {
            return Err(ConfigurationError::InvalidValue(
                "scanner.chunk_blocks cannot exceed scanner.window_blocks".to_string(),
            ));
        }

        if self.scanner.chunk_batch_size == 0 {
            return Err(ConfigurationError::InvalidValue(
                "scanner.chunk_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.logs_api.page_size == 0 {
            return Err(ConfigurationError::InvalidValue(
                "logs_api.page_size must be greater than 0".to_string(),
            ));
        }

        if self.scanner.large_buy_threshold_usd < 0.0 {
            return Err(ConfigurationError::InvalidValue(
                "scanner.large_buy_threshold_usd cannot be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Get configuration as a JSON value for diagnostics
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Configuration manager for loading and managing tracker configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: TrackerConfig,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config = TrackerConfig::load()?;
        info!("Configuration loaded successfully");
        debug!("Configuration: {:#?}", config);

        Ok(Self { config })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = TrackerConfig::load_from_path(path)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            config: TrackerConfig::default(),
        })
    }
}
