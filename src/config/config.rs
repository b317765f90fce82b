use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::model::VenueName;

/// One token of the trusted seed list.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenSeed {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub decimals: u8,
}

/// A pair of token addresses to discover pools for at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct WatchedPair {
    pub token_a: String,
    pub token_b: String,
}

/// Protocol-specific deployment addresses, tagged by protocol family.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum DexProtocolConfig {
    V2 {
        factory: String,
        router: String,
        #[serde(default)]
        init_code_hash: Option<String>,
    },
    V3 {
        factory: String,
        router: String,
        quoter: String,
        #[serde(default)]
        init_code_hash: Option<String>,
    },
    V4 {
        pool_manager: String,
        state_view: String,
        quoter: String,
    },
}

/// One DEX deployment on a platform.
#[derive(Debug, Deserialize, Clone)]
pub struct DexConfig {
    pub name: VenueName,
    #[serde(flatten)]
    pub protocol: DexProtocolConfig,
}

/// Arbitrage gating thresholds. The engine carries them for consumers; no
/// path search happens here.
#[derive(Debug, Deserialize, Clone)]
pub struct ArbitrageThresholds {
    #[serde(default = "default_min_gross_profit_usd")]
    pub min_gross_profit_usd: f64,
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
}

impl Default for ArbitrageThresholds {
    fn default() -> Self {
        Self {
            min_gross_profit_usd: default_min_gross_profit_usd(),
            max_slippage_bps: default_max_slippage_bps(),
            min_liquidity_usd: default_min_liquidity_usd(),
            max_hops: default_max_hops(),
        }
    }
}

fn default_min_gross_profit_usd() -> f64 {
    1.0
}

fn default_max_slippage_bps() -> u32 {
    50
}

fn default_min_liquidity_usd() -> f64 {
    10_000.0
}

fn default_max_hops() -> u8 {
    3
}

/// Per-chain RPC token bucket configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            requests_per_second: default_requests_per_second(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_requests_per_second() -> u32 {
    20
}

fn default_batch_delay_ms() -> u64 {
    200
}

/// One blockchain platform watched by its own worker unit.
#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    pub name: String,
    pub chain_id: u64,
    /// WebSocket endpoint for block and log subscriptions.
    pub ws_rpc_url: String,
    /// Optional HTTP endpoint for view calls; falls back to the WS URL.
    #[serde(default)]
    pub http_rpc_url: Option<String>,
    /// The wrapped native token of the chain.
    pub wrapped_native: TokenSeed,
    /// Stable-coin addresses seeding the price oracle at exactly 1.0.
    #[serde(default)]
    pub stablecoins: Vec<String>,
    /// Tokens preferred as borrow legs by downstream consumers.
    #[serde(default)]
    pub preferred_borrow_tokens: Vec<String>,
    /// Trusted token seed list.
    #[serde(default)]
    pub tokens: Vec<TokenSeed>,
    pub dexes: Vec<DexConfig>,
    /// Pairs to discover pools for at startup.
    #[serde(default)]
    pub watched_pairs: Vec<WatchedPair>,
    #[serde(default)]
    pub arbitrage: ArbitrageThresholds,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Root application configuration, loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub platforms: Vec<PlatformConfig>,
    /// Directory holding the per-chain static caches.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Default bus request deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_cache_dir() -> String {
    String::from("./cache")
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        if settings.platforms.iter().filter(|p| p.enabled).count() == 0 {
            return Err(ConfigError::Message(String::from(
                "no enabled platforms configured",
            )));
        }

        Ok(settings)
    }

    pub fn enabled_platforms(&self) -> impl Iterator<Item = &PlatformConfig> {
        self.platforms.iter().filter(|p| p.enabled)
    }
}
