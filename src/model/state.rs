use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use super::pair::TokenPairOnChain;
use super::venue::VenueId;
use crate::math::{sqrt_price_x96_to_price, TickEntry};
use crate::utils::{serde_u128_decimal, serde_u256_decimal, u256_to_f64};

/// Pool identity for DEX venues: `"<chainId>:<poolAddress>"`.
pub fn dex_pool_id(chain_id: u64, pool_address: &str) -> String {
    format!("{}:{}", chain_id, pool_address.to_lowercase())
}

/// Market identity for CEX venues: `"<exchange>:<rawSymbol>"`.
pub fn cex_market_id(exchange: &str, raw_symbol: &str) -> String {
    format!("{exchange}:{raw_symbol}")
}

/// Provenance of the event a state reflects.
///
/// `(block_number, transaction_index, log_index)` is a total order within a
/// chain; a stored state always reflects the maximum metadata seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub block_number: u64,
    pub transaction_index: u32,
    pub log_index: u32,
    pub transaction_hash: String,
    /// Unix millis at which the carrying block was received locally.
    pub block_received_timestamp: i64,
}

impl EventMetadata {
    pub fn ordering_key(&self) -> (u64, u32, u32) {
        (self.block_number, self.transaction_index, self.log_index)
    }

    /// Strict lexicographic ordering; equal metadata is not newer.
    pub fn is_strictly_newer_than(&self, other: &EventMetadata) -> bool {
        self.ordering_key() > other.ordering_key()
    }
}

/// Uniswap-V2-style constant-product pool state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexV2PoolState {
    pub id: String,
    pub venue: VenueId,
    pub pair_id: String,
    pub pair: TokenPairOnChain,
    pub address: String,
    #[serde(with = "serde_u256_decimal")]
    pub reserve0: U256,
    #[serde(with = "serde_u256_decimal")]
    pub reserve1: U256,
    /// Parts per 10 000. Fixed at 30 for V2.
    pub fee_bps: u32,
    pub spot_price_0_to_1: f64,
    pub spot_price_1_to_0: f64,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_usd: f64,
    pub disabled: bool,
}

impl DexV2PoolState {
    /// Derive both spot prices from the stored reserves (raw ratio).
    pub fn recompute_spot_prices(&mut self) {
        let r0 = u256_to_f64(self.reserve0, 0);
        let r1 = u256_to_f64(self.reserve1, 0);
        if r0 > 0.0 && r1 > 0.0 {
            self.spot_price_0_to_1 = r1 / r0;
            self.spot_price_1_to_0 = r0 / r1;
        } else {
            self.spot_price_0_to_1 = 0.0;
            self.spot_price_1_to_0 = 0.0;
        }
    }
}

/// Uniswap-V3-style concentrated-liquidity pool state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexV3PoolState {
    pub id: String,
    pub venue: VenueId,
    pub pair_id: String,
    pub pair: TokenPairOnChain,
    pub address: String,
    #[serde(with = "serde_u256_decimal")]
    pub sqrt_price_x96: U256,
    pub tick: i32,
    #[serde(with = "serde_u128_decimal")]
    pub liquidity: u128,
    pub tick_spacing: i32,
    /// Parts per million (the V3 fee-tier convention): 100, 500, 3000, 10000.
    pub fee_bps: u32,
    /// Strictly sorted ascending by tick; no duplicates.
    pub ticks: Vec<TickEntry>,
    pub spot_price_0_to_1: f64,
    pub spot_price_1_to_0: f64,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_usd: f64,
    pub disabled: bool,
}

impl DexV3PoolState {
    /// Derive both spot prices from the stored sqrt price (decimal adjusted).
    pub fn recompute_spot_prices(&mut self) {
        let price = sqrt_price_x96_to_price(
            self.sqrt_price_x96,
            self.pair.token0.decimals,
            self.pair.token1.decimals,
        );
        self.spot_price_0_to_1 = price;
        self.spot_price_1_to_0 = if price > 0.0 { 1.0 / price } else { 0.0 };
    }

    /// Replace the tick window, enforcing strict ascending order.
    pub fn set_ticks(&mut self, mut ticks: Vec<TickEntry>) {
        ticks.sort_by_key(|entry| entry.tick);
        ticks.dedup_by_key(|entry| entry.tick);
        self.ticks = ticks;
    }
}

/// Uniswap-V4 pool state: V3 semantics plus the singleton-manager identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexV4PoolState {
    pub id: String,
    pub venue: VenueId,
    pub pair_id: String,
    pub pair: TokenPairOnChain,
    /// 32-byte pool key, lowercase hex with 0x prefix.
    pub pool_key: String,
    /// Hook contract, when the pool was initialised with one.
    pub hooks: Option<String>,
    /// The shared pool-manager contract address.
    pub manager: String,
    #[serde(with = "serde_u256_decimal")]
    pub sqrt_price_x96: U256,
    pub tick: i32,
    #[serde(with = "serde_u128_decimal")]
    pub liquidity: u128,
    pub tick_spacing: i32,
    /// Parts per million. May change per swap for dynamic-fee pools.
    pub fee_bps: u32,
    pub ticks: Vec<TickEntry>,
    pub spot_price_0_to_1: f64,
    pub spot_price_1_to_0: f64,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_usd: f64,
    pub disabled: bool,
}

impl DexV4PoolState {
    pub fn recompute_spot_prices(&mut self) {
        let price = sqrt_price_x96_to_price(
            self.sqrt_price_x96,
            self.pair.token0.decimals,
            self.pair.token1.decimals,
        );
        self.spot_price_0_to_1 = price;
        self.spot_price_1_to_0 = if price > 0.0 { 1.0 / price } else { 0.0 };
    }
}

/// Order-book snapshot for a centralised exchange market. Ingestion is an
/// external collaborator; the engine only stores and indexes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CexMarketState {
    pub id: String,
    pub venue: VenueId,
    pub pair_id: String,
    pub raw_symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    /// (price, quantity) ladders, best first.
    pub bid_depth: Vec<(f64, f64)>,
    pub ask_depth: Vec<(f64, f64)>,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_usd: f64,
    pub disabled: bool,
}

/// The state of one venue for one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VenueState {
    DexV2Pool(DexV2PoolState),
    DexV3Pool(DexV3PoolState),
    DexV4Pool(DexV4PoolState),
    CexMarket(CexMarketState),
}

impl VenueState {
    pub fn id(&self) -> &str {
        match self {
            VenueState::DexV2Pool(s) => &s.id,
            VenueState::DexV3Pool(s) => &s.id,
            VenueState::DexV4Pool(s) => &s.id,
            VenueState::CexMarket(s) => &s.id,
        }
    }

    pub fn venue(&self) -> &VenueId {
        match self {
            VenueState::DexV2Pool(s) => &s.venue,
            VenueState::DexV3Pool(s) => &s.venue,
            VenueState::DexV4Pool(s) => &s.venue,
            VenueState::CexMarket(s) => &s.venue,
        }
    }

    pub fn pair_id(&self) -> &str {
        match self {
            VenueState::DexV2Pool(s) => &s.pair_id,
            VenueState::DexV3Pool(s) => &s.pair_id,
            VenueState::DexV4Pool(s) => &s.pair_id,
            VenueState::CexMarket(s) => &s.pair_id,
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.venue().chain_id()
    }

    /// The on-chain token pair; None for CEX markets.
    pub fn pair(&self) -> Option<&TokenPairOnChain> {
        match self {
            VenueState::DexV2Pool(s) => Some(&s.pair),
            VenueState::DexV3Pool(s) => Some(&s.pair),
            VenueState::DexV4Pool(s) => Some(&s.pair),
            VenueState::CexMarket(_) => None,
        }
    }

    pub fn latest_event_meta(&self) -> Option<&EventMetadata> {
        match self {
            VenueState::DexV2Pool(s) => s.latest_event_meta.as_ref(),
            VenueState::DexV3Pool(s) => s.latest_event_meta.as_ref(),
            VenueState::DexV4Pool(s) => s.latest_event_meta.as_ref(),
            VenueState::CexMarket(s) => s.latest_event_meta.as_ref(),
        }
    }

    pub fn set_latest_event_meta(&mut self, meta: EventMetadata) {
        match self {
            VenueState::DexV2Pool(s) => s.latest_event_meta = Some(meta),
            VenueState::DexV3Pool(s) => s.latest_event_meta = Some(meta),
            VenueState::DexV4Pool(s) => s.latest_event_meta = Some(meta),
            VenueState::CexMarket(s) => s.latest_event_meta = Some(meta),
        }
    }

    pub fn spot_price_0_to_1(&self) -> Option<f64> {
        match self {
            VenueState::DexV2Pool(s) => Some(s.spot_price_0_to_1),
            VenueState::DexV3Pool(s) => Some(s.spot_price_0_to_1),
            VenueState::DexV4Pool(s) => Some(s.spot_price_0_to_1),
            VenueState::CexMarket(_) => None,
        }
    }

    pub fn spot_price_1_to_0(&self) -> Option<f64> {
        match self {
            VenueState::DexV2Pool(s) => Some(s.spot_price_1_to_0),
            VenueState::DexV3Pool(s) => Some(s.spot_price_1_to_0),
            VenueState::DexV4Pool(s) => Some(s.spot_price_1_to_0),
            VenueState::CexMarket(_) => None,
        }
    }

    pub fn disabled(&self) -> bool {
        match self {
            VenueState::DexV2Pool(s) => s.disabled,
            VenueState::DexV3Pool(s) => s.disabled,
            VenueState::DexV4Pool(s) => s.disabled,
            VenueState::CexMarket(s) => s.disabled,
        }
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        match self {
            VenueState::DexV2Pool(s) => s.disabled = disabled,
            VenueState::DexV3Pool(s) => s.disabled = disabled,
            VenueState::DexV4Pool(s) => s.disabled = disabled,
            VenueState::CexMarket(s) => s.disabled = disabled,
        }
    }

    pub fn total_liquidity_usd(&self) -> f64 {
        match self {
            VenueState::DexV2Pool(s) => s.total_liquidity_usd,
            VenueState::DexV3Pool(s) => s.total_liquidity_usd,
            VenueState::DexV4Pool(s) => s.total_liquidity_usd,
            VenueState::CexMarket(s) => s.total_liquidity_usd,
        }
    }

    pub fn set_total_liquidity_usd(&mut self, value: f64) {
        match self {
            VenueState::DexV2Pool(s) => s.total_liquidity_usd = value,
            VenueState::DexV3Pool(s) => s.total_liquidity_usd = value,
            VenueState::DexV4Pool(s) => s.total_liquidity_usd = value,
            VenueState::CexMarket(s) => s.total_liquidity_usd = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(block: u64, tx: u32, log: u32) -> EventMetadata {
        EventMetadata {
            block_number: block,
            transaction_index: tx,
            log_index: log,
            transaction_hash: String::new(),
            block_received_timestamp: 0,
        }
    }

    #[test]
    fn metadata_ordering_is_lexicographic() {
        assert!(meta(100, 0, 0).is_strictly_newer_than(&meta(99, 5, 5)));
        assert!(meta(100, 1, 0).is_strictly_newer_than(&meta(100, 0, 9)));
        assert!(meta(100, 0, 1).is_strictly_newer_than(&meta(100, 0, 0)));
        assert!(!meta(100, 0, 0).is_strictly_newer_than(&meta(100, 0, 0)));
        assert!(!meta(99, 9, 9).is_strictly_newer_than(&meta(100, 0, 0)));
    }

    #[test]
    fn tick_window_is_strictly_sorted_without_duplicates() {
        use crate::math::TickEntry;
        use crate::model::{Token, TokenPairOnChain, VenueId, VenueName};
        use alloy::primitives::U256;

        let a = Token::new(1, "0x0000000000000000000000000000000000000001".into(), "A".into(), "A".into(), 18, true);
        let b = Token::new(1, "0x0000000000000000000000000000000000000002".into(), "B".into(), "B".into(), 18, true);
        let pair = TokenPairOnChain::new(a, b);
        let mut pool = DexV3PoolState {
            id: dex_pool_id(1, "0x00000000000000000000000000000000000000aa"),
            venue: VenueId::Dex { name: VenueName::UniswapV3, chain_id: 1 },
            pair_id: pair.pair_id(),
            pair,
            address: "0x00000000000000000000000000000000000000aa".into(),
            sqrt_price_x96: U256::ZERO,
            tick: 0,
            liquidity: 0,
            tick_spacing: 60,
            fee_bps: 3000,
            ticks: Vec::new(),
            spot_price_0_to_1: 0.0,
            spot_price_1_to_0: 0.0,
            latest_event_meta: None,
            total_liquidity_usd: 0.0,
            disabled: false,
        };

        pool.set_ticks(vec![
            TickEntry { tick: 60, liquidity_net: 1 },
            TickEntry { tick: -60, liquidity_net: 2 },
            TickEntry { tick: 60, liquidity_net: 3 },
            TickEntry { tick: 0, liquidity_net: 4 },
        ]);

        let ticks: Vec<i32> = pool.ticks.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![-60, 0, 60]);
    }

    #[test]
    fn dex_pool_id_lowercases_address() {
        assert_eq!(
            dex_pool_id(137, "0xABCDEF0000000000000000000000000000000001"),
            "137:0xabcdef0000000000000000000000000000000001"
        );
        assert_eq!(cex_market_id("binance", "ETHUSDT"), "binance:ETHUSDT");
    }
}
