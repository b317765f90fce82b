//! USD price derivation.
//!
//! Seeded with stable-coin anchors pinned at exactly 1.0, the oracle
//! floods prices outward through pool spot prices as the aggregator
//! delivers updates. Keys are per chain (`"chainId:address"`); no
//! cross-chain unification happens here. Saturation across the pool graph
//! emerges from repeated deterministic delivery, not from explicit search.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::math::virtual_reserves;
use crate::model::VenueState;
use crate::utils::{u256_to_f64, validate_price_ratio, validate_usd_price, MAX_TVL_USD};

pub struct PriceOracle {
    anchors: FxHashSet<String>,
    prices: FxHashMap<String, f64>,
}

impl PriceOracle {
    pub fn new() -> Self {
        Self { anchors: FxHashSet::default(), prices: FxHashMap::default() }
    }

    fn key(chain_id: u64, address: &str) -> String {
        format!("{}:{}", chain_id, address.to_lowercase())
    }

    /// Pin a stable coin at exactly 1.0. Anchor prices never move.
    pub fn add_anchor(&mut self, chain_id: u64, address: &str) {
        let key = Self::key(chain_id, address);
        self.anchors.insert(key.clone());
        self.prices.insert(key, 1.0);
    }

    pub fn price(&self, chain_id: u64, address: &str) -> Option<f64> {
        self.prices.get(&Self::key(chain_id, address)).copied()
    }

    pub fn is_anchor(&self, chain_id: u64, address: &str) -> bool {
        self.anchors.contains(&Self::key(chain_id, address))
    }

    /// Derive prices from a batch of updated pools, in delivery order.
    /// Spot ratios pass plausibility bounds before any derivation; a pool
    /// reporting an absurd ratio contributes nothing.
    pub fn on_pools_updated(&mut self, pools: &[&VenueState]) {
        for pool in pools {
            let (Some(pair), Some(chain_id)) = (pool.pair(), pool.chain_id()) else {
                continue;
            };
            let key0 = Self::key(chain_id, &pair.token0.address);
            let key1 = Self::key(chain_id, &pair.token1.address);

            if let (Some(price0), Some(spot)) = (
                self.prices.get(&key0).copied(),
                pool.spot_price_0_to_1().and_then(validate_price_ratio),
            ) {
                self.write(&key1, price0 / spot);
            }
            if let (Some(price1), Some(spot)) = (
                self.prices.get(&key1).copied(),
                pool.spot_price_1_to_0().and_then(validate_price_ratio),
            ) {
                self.write(&key0, price1 / spot);
            }
        }
    }

    /// Fill `total_liquidity_usd` on a state the oracle can price. V2
    /// pools value their reserves; V3/V4 pools value the virtual reserves
    /// at the current sqrt price. Display quality only.
    pub fn fill_liquidity_usd(&self, state: &mut VenueState) {
        let (Some(pair), Some(chain_id)) = (state.pair(), state.chain_id()) else {
            return;
        };
        let price0 = self.price(chain_id, &pair.token0.address);
        let price1 = self.price(chain_id, &pair.token1.address);
        let decimals0 = pair.token0.decimals;
        let decimals1 = pair.token1.decimals;

        let (amount0, amount1) = match state {
            VenueState::DexV2Pool(pool) => {
                (u256_to_f64(pool.reserve0, decimals0), u256_to_f64(pool.reserve1, decimals1))
            }
            VenueState::DexV3Pool(pool) => {
                match virtual_reserves(pool.sqrt_price_x96, pool.liquidity) {
                    Ok((r0, r1)) => (u256_to_f64(r0, decimals0), u256_to_f64(r1, decimals1)),
                    Err(_) => return,
                }
            }
            VenueState::DexV4Pool(pool) => {
                match virtual_reserves(pool.sqrt_price_x96, pool.liquidity) {
                    Ok((r0, r1)) => (u256_to_f64(r0, decimals0), u256_to_f64(r1, decimals1)),
                    Err(_) => return,
                }
            }
            VenueState::CexMarket(_) => return,
        };

        // Value the priceable sides; a single priced side stands in for
        // both (the standard 50/50 pool assumption).
        let tvl = match (price0, price1) {
            (Some(p0), Some(p1)) => amount0 * p0 + amount1 * p1,
            (Some(p0), None) => amount0 * p0 * 2.0,
            (None, Some(p1)) => amount1 * p1 * 2.0,
            (None, None) => return,
        };

        if tvl.is_finite() && tvl > 0.0 && tvl <= MAX_TVL_USD {
            state.set_total_liquidity_usd(tvl);
        }
    }

    /// Write a derived price unless the target is an anchor or the value
    /// fails plausibility bounds.
    fn write(&mut self, key: &str, value: f64) {
        if self.anchors.contains(key) {
            return;
        }
        let validated = validate_usd_price(value);
        if validated > 0.0 {
            self.prices.insert(key.to_string(), validated);
        } else {
            debug!("oracle rejected implausible price {value} for {key}");
        }
    }
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        dex_pool_id, DexV2PoolState, Token, TokenPairOnChain, VenueId, VenueName,
    };
    use alloy::primitives::U256;

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
    const DAI: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";

    fn token(address: &str, symbol: &str, decimals: u8) -> Token {
        Token::new(1, address.into(), symbol.into(), symbol.into(), decimals, true)
    }

    /// A pool with explicit spot prices; reserves only matter for TVL.
    fn pool_with_spots(
        address: &str,
        a: Token,
        b: Token,
        spot_0_to_1: f64,
        spot_1_to_0: f64,
    ) -> VenueState {
        let pair = TokenPairOnChain::new(a, b);
        VenueState::DexV2Pool(DexV2PoolState {
            id: dex_pool_id(1, address),
            venue: VenueId::Dex { name: VenueName::UniswapV2, chain_id: 1 },
            pair_id: pair.pair_id(),
            pair,
            address: address.into(),
            reserve0: U256::from(10u128.pow(12)),
            reserve1: U256::from(10u128.pow(12)),
            fee_bps: 30,
            spot_price_0_to_1: spot_0_to_1,
            spot_price_1_to_0: spot_1_to_0,
            latest_event_meta: None,
            total_liquidity_usd: 0.0,
            disabled: false,
        })
    }

    #[test]
    fn anchors_are_exactly_one() {
        let mut oracle = PriceOracle::new();
        oracle.add_anchor(1, USDC);
        assert_eq!(oracle.price(1, USDC), Some(1.0));
        assert!(oracle.is_anchor(1, USDC));
    }

    #[test]
    fn prices_flood_across_pools() {
        // USDC anchored; USDC/WETH pool prices WETH at 2500, then a
        // WETH/DAI pool pulls DAI back to ~1.
        let mut oracle = PriceOracle::new();
        oracle.add_anchor(1, USDC);

        // token0 = USDC (lower address... actually 0xa0 < 0xc0), token1 = WETH.
        // spot_0_to_1 = WETH per USDC = 1/2500.
        let usdc_weth = pool_with_spots(
            "0x0000000000000000000000000000000000000011",
            token(USDC, "USDC", 6),
            token(WETH, "WETH", 18),
            1.0 / 2500.0,
            2500.0,
        );
        oracle.on_pools_updated(&[&usdc_weth]);
        let weth = oracle.price(1, WETH).unwrap();
        assert!((weth - 2500.0).abs() < 1e-6, "weth {weth}");

        // token0 = DAI (0x6b < 0xc0), token1 = WETH.
        // spot_1_to_0 = DAI per WETH = 2500.
        let dai_weth = pool_with_spots(
            "0x0000000000000000000000000000000000000012",
            token(DAI, "DAI", 18),
            token(WETH, "WETH", 18),
            1.0 / 2500.0,
            2500.0,
        );
        oracle.on_pools_updated(&[&dai_weth]);
        let dai = oracle.price(1, DAI).unwrap();
        assert!((dai - 1.0).abs() < 1e-9, "dai {dai}");
    }

    #[test]
    fn anchors_never_move() {
        let mut oracle = PriceOracle::new();
        oracle.add_anchor(1, USDC);
        oracle.add_anchor(1, DAI);

        // A skewed pool must not push DAI off its peg.
        let skewed = pool_with_spots(
            "0x0000000000000000000000000000000000000013",
            token(DAI, "DAI", 18),
            token(USDC, "USDC", 6),
            0.5,
            2.0,
        );
        oracle.on_pools_updated(&[&skewed]);
        assert_eq!(oracle.price(1, DAI), Some(1.0));
        assert_eq!(oracle.price(1, USDC), Some(1.0));
    }

    #[test]
    fn prices_are_per_chain() {
        let mut oracle = PriceOracle::new();
        oracle.add_anchor(1, USDC);
        assert_eq!(oracle.price(137, USDC), None);
    }

    #[test]
    fn implausible_prices_are_rejected() {
        let mut oracle = PriceOracle::new();
        oracle.add_anchor(1, USDC);

        // Ratios outside the plausibility bounds never reach derivation.
        let broken = pool_with_spots(
            "0x0000000000000000000000000000000000000014",
            token(USDC, "USDC", 6),
            token(WETH, "WETH", 18),
            1e-13,
            1e13,
        );
        oracle.on_pools_updated(&[&broken]);
        assert_eq!(oracle.price(1, WETH), None);

        // A ratio inside bounds can still derive an absurd USD price; the
        // write-side bound catches that layer.
        let skewed = pool_with_spots(
            "0x0000000000000000000000000000000000000015",
            token(USDC, "USDC", 6),
            token(WETH, "WETH", 18),
            1e-10, // would price WETH at 1e10 USD
            1e10,
        );
        oracle.on_pools_updated(&[&skewed]);
        assert_eq!(oracle.price(1, WETH), None);
    }

    #[test]
    fn liquidity_fill_values_both_sides() {
        let mut oracle = PriceOracle::new();
        oracle.add_anchor(1, USDC);

        let mut pool = pool_with_spots(
            "0x0000000000000000000000000000000000000015",
            token(USDC, "USDC", 6),
            token(WETH, "WETH", 18),
            1.0 / 2500.0,
            2500.0,
        );
        oracle.on_pools_updated(&[&pool]);

        if let VenueState::DexV2Pool(p) = &mut pool {
            p.reserve0 = U256::from(5_000_000_000u64); // 5000 USDC
            p.reserve1 = U256::from(2u128 * 10u128.pow(18)); // 2 WETH
        }
        oracle.fill_liquidity_usd(&mut pool);
        let tvl = pool.total_liquidity_usd();
        assert!((tvl - (5000.0 + 2.0 * 2500.0)).abs() < 1e-6, "tvl {tvl}");
    }
}
