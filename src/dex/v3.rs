//! Concentrated-liquidity (V3 family) adapter.

use alloy::primitives::aliases::{I24, U160, U24};
use alloy::primitives::{Address, U256};
use alloy::providers::MULTICALL3_ADDRESS;
use alloy::sol_types::SolCall;
use log::{debug, warn};
use serde_json::json;

use super::quote::TradeQuote;
use super::AdapterContext;
use crate::abis::v3::{IQuoter, IUniswapV3Factory, IUniswapV3Pool};
use crate::abis::{Call3, IMulticall3};
use crate::errors::EngineError;
use crate::math::{simulate_multi_tick_swap, TickEntry};
use crate::model::{
    dex_pool_id, DexV3PoolState, PoolEvent, PoolEventKind, TokenPairOnChain, VenueId, VenueName,
    VenueState,
};
use crate::rpc::cache_key;
use crate::utils::hex_encode;

/// The closed set of fee tiers probed at discovery, with their canonical
/// tick spacings.
pub const FEE_TIERS: [(u32, i32); 4] = [(100, 1), (500, 10), (3000, 60), (10000, 200)];

/// Initialised ticks are pulled for this many spacing steps on each side
/// of the current tick; both sides together stay within one 500-sub-call
/// multicall.
const TICK_WINDOW_EACH_SIDE: i32 = 250;

/// Hard cap on sub-calls per underlying multicall.
const MULTICALL_BATCH_SIZE: usize = 500;

pub struct V3Adapter {
    venue: VenueName,
    chain_id: u64,
    factory: Address,
    quoter: Address,
}

impl V3Adapter {
    pub fn new(
        venue: VenueName,
        chain_id: u64,
        factory: &str,
        quoter: &str,
    ) -> Result<Self, EngineError> {
        let factory = factory
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad factory address {factory}")))?;
        let quoter = quoter
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad quoter address {quoter}")))?;
        Ok(Self { venue, chain_id, factory, quoter })
    }

    pub fn venue_name(&self) -> VenueName {
        self.venue
    }

    fn venue_id(&self) -> VenueId {
        VenueId::Dex { name: self.venue, chain_id: self.chain_id }
    }

    fn empty_state(
        &self,
        pair: TokenPairOnChain,
        address: &str,
        fee_ppm: u32,
        tick_spacing: i32,
    ) -> DexV3PoolState {
        DexV3PoolState {
            id: dex_pool_id(self.chain_id, address),
            venue: self.venue_id(),
            pair_id: pair.pair_id(),
            pair,
            address: address.to_lowercase(),
            sqrt_price_x96: U256::ZERO,
            tick: 0,
            liquidity: 0,
            tick_spacing,
            fee_bps: fee_ppm,
            ticks: Vec::new(),
            spot_price_0_to_1: 0.0,
            spot_price_1_to_0: 0.0,
            latest_event_meta: None,
            total_liquidity_usd: 0.0,
            disabled: false,
        }
    }

    /// Iterate the closed fee-tier set through the factory; each non-zero
    /// pool becomes a state with dynamic fields zeroed.
    pub async fn discover(
        &self,
        ctx: &AdapterContext,
        pair: &TokenPairOnChain,
    ) -> Result<Vec<VenueState>, EngineError> {
        let token0: Address = pair
            .token0
            .address
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad token address {}", pair.token0.address)))?;
        let token1: Address = pair
            .token1
            .address
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad token address {}", pair.token1.address)))?;

        let factory_hex = format!("{:#x}", self.factory);
        let mut pools = Vec::new();

        for (fee_ppm, tick_spacing) in FEE_TIERS {
            let args = json!([pair.token0.address, pair.token1.address, fee_ppm]);
            let key = cache_key(&factory_hex, "getPool", &args);

            let pool_address = match ctx
                .client
                .cache_get("getPool", &key)
                .await
                .and_then(|v| v.as_str().and_then(|s| s.parse::<Address>().ok()))
            {
                Some(cached) => cached,
                None => {
                    let factory = IUniswapV3Factory::new(self.factory, ctx.client.call_provider());
                    let _permit = ctx.client.limiter().acquire().await;
                    let address = factory
                        .getPool(token0, token1, U24::from(fee_ppm))
                        .call()
                        .await
                        .map_err(|e| EngineError::Rpc(e.to_string()))?;
                    ctx.client.cache_put("getPool", key, json!(format!("{address:#x}"))).await;
                    address
                }
            };

            if pool_address == Address::ZERO {
                continue;
            }
            let address = hex_encode(pool_address.as_slice());
            pools.push(VenueState::DexV3Pool(self.empty_state(
                pair.clone(),
                &address,
                fee_ppm,
                tick_spacing,
            )));
        }

        Ok(pools)
    }

    /// First sight of a pool: static reads (token0, token1, fee,
    /// tickSpacing), then dynamic fields straight from the event.
    pub async fn introspect_from_event(
        &self,
        ctx: &AdapterContext,
        event: &PoolEvent,
    ) -> Result<VenueState, EngineError> {
        let PoolEventKind::V3Swap { sqrt_price_x96, liquidity, tick } = &event.kind else {
            return Err(EngineError::EventKindMismatch {
                expected: "v3-swap",
                got: event.kind.name().to_string(),
            });
        };

        let pool_address: Address = event
            .address
            .parse()
            .map_err(|_| EngineError::UnknownPool(event.pool_id.clone()))?;

        let statics = self.pool_statics(ctx, pool_address).await?;
        let token0 = ctx
            .tokens
            .ensure_registered(statics.token0)
            .await
            .map_err(|_| EngineError::UnknownPool(event.pool_id.clone()))?;
        let token1 = ctx
            .tokens
            .ensure_registered(statics.token1)
            .await
            .map_err(|_| EngineError::UnknownPool(event.pool_id.clone()))?;

        let pair = TokenPairOnChain::new(token0, token1);
        let mut state = self.empty_state(pair, &event.address, statics.fee_ppm, statics.tick_spacing);
        state.sqrt_price_x96 = *sqrt_price_x96;
        state.liquidity = *liquidity;
        state.tick = *tick;
        state.recompute_spot_prices();
        state.latest_event_meta = Some(event.meta.clone());
        Ok(VenueState::DexV3Pool(state))
    }

    pub async fn refresh(
        &self,
        ctx: &AdapterContext,
        state: &mut VenueState,
    ) -> Result<(), EngineError> {
        let VenueState::DexV3Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v3-pool",
                got: String::from("other state shape"),
            });
        };

        let address: Address = pool
            .address
            .parse()
            .map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;
        let contract = IUniswapV3Pool::new(address, ctx.client.call_provider());

        let slot0 = {
            let _permit = ctx.client.limiter().acquire().await;
            contract.slot0().call().await.map_err(|e| EngineError::Rpc(e.to_string()))?
        };
        let liquidity = {
            let _permit = ctx.client.limiter().acquire().await;
            contract.liquidity().call().await.map_err(|e| EngineError::Rpc(e.to_string()))?
        };

        pool.sqrt_price_x96 = U256::from(slot0.sqrtPriceX96);
        pool.tick = slot0.tick.as_i32();
        pool.liquidity = liquidity;
        pool.recompute_spot_prices();

        let ticks = self.fetch_tick_window(ctx, address, pool.tick, pool.tick_spacing).await?;
        pool.set_ticks(ticks);
        Ok(())
    }

    /// Pull the initialised ticks around the current tick through
    /// Multicall3, at most [`MULTICALL_BATCH_SIZE`] sub-calls per batch.
    async fn fetch_tick_window(
        &self,
        ctx: &AdapterContext,
        pool: Address,
        current_tick: i32,
        tick_spacing: i32,
    ) -> Result<Vec<TickEntry>, EngineError> {
        let spacing = tick_spacing.max(1);
        let anchor = current_tick.div_euclid(spacing) * spacing;

        let contract = IUniswapV3Pool::new(pool, ctx.client.call_provider());
        let candidate_ticks: Vec<i32> = (-TICK_WINDOW_EACH_SIDE..TICK_WINDOW_EACH_SIDE)
            .map(|step| anchor + step * spacing)
            .filter(|t| (-887272..=887272).contains(t))
            .collect();

        let multicall = IMulticall3::new(MULTICALL3_ADDRESS, ctx.client.call_provider());
        let mut entries = Vec::new();

        let mut first_batch = true;
        for chunk in candidate_ticks.chunks(MULTICALL_BATCH_SIZE) {
            if !first_batch {
                ctx.client.limiter().batch_pause().await;
            }
            first_batch = false;

            let calls: Vec<Call3> = chunk
                .iter()
                .map(|&t| Call3 {
                    target: pool,
                    allowFailure: true,
                    callData: contract
                        .ticks(I24::try_from(t).unwrap_or_default())
                        .calldata()
                        .to_vec()
                        .into(),
                })
                .collect();

            let _permit = ctx.client.limiter().acquire().await;
            let results = multicall
                .aggregate3(calls)
                .call()
                .await
                .map_err(|e| EngineError::Rpc(e.to_string()))?;

            for (&t, result) in chunk.iter().zip(results.iter()) {
                if !result.success {
                    continue;
                }
                let Ok(info) = IUniswapV3Pool::ticksCall::abi_decode_returns(&result.returnData)
                else {
                    continue;
                };
                if info.initialized {
                    entries.push(TickEntry { tick: t, liquidity_net: info.liquidityNet });
                }
            }
        }

        Ok(entries)
    }

    /// Only `Swap` mutates V3 state. Mint/Burn change tick liquidity the
    /// snapshot cannot see, so they are acknowledged and skipped; a
    /// contract refresh would be required to fold them in.
    pub fn apply_event(&self, state: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError> {
        let VenueState::DexV3Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v3-pool",
                got: String::from("other state shape"),
            });
        };

        match &event.kind {
            PoolEventKind::V3Swap { sqrt_price_x96, liquidity, tick } => {
                pool.sqrt_price_x96 = *sqrt_price_x96;
                pool.liquidity = *liquidity;
                pool.tick = *tick;
                pool.recompute_spot_prices();
                Ok(())
            }
            PoolEventKind::V3Mint { .. } | PoolEventKind::V3Burn { .. } => {
                debug!("{}: liquidity event ignored for state", pool.id);
                Ok(())
            }
            other => Err(EngineError::EventKindMismatch {
                expected: "v3-swap",
                got: other.name().to_string(),
            }),
        }
    }

    pub fn simulate(
        &self,
        state: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<U256, EngineError> {
        let VenueState::DexV3Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v3-pool",
                got: String::from("other state shape"),
            });
        };
        simulate_multi_tick_swap(
            pool.sqrt_price_x96,
            pool.liquidity,
            pool.tick,
            &pool.ticks,
            pool.fee_bps,
            amount_in,
            zero_for_one,
        )
    }

    /// Quotes go through the deployed quoter contract for exactness; the
    /// local simulation stays available for latency-sensitive callers.
    pub async fn quote(
        &self,
        ctx: &AdapterContext,
        state: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<TradeQuote, EngineError> {
        let VenueState::DexV3Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v3-pool",
                got: String::from("other state shape"),
            });
        };
        if amount_in.is_zero() {
            return Err(EngineError::InvalidAmount);
        }

        let (token_in, token_out, decimals_in, decimals_out, spot) = if zero_for_one {
            (
                &pool.pair.token0.address,
                &pool.pair.token1.address,
                pool.pair.token0.decimals,
                pool.pair.token1.decimals,
                pool.spot_price_0_to_1,
            )
        } else {
            (
                &pool.pair.token1.address,
                &pool.pair.token0.address,
                pool.pair.token1.decimals,
                pool.pair.token0.decimals,
                pool.spot_price_1_to_0,
            )
        };
        let token_in: Address =
            token_in.parse().map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;
        let token_out: Address =
            token_out.parse().map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;

        let quoter = IQuoter::new(self.quoter, ctx.client.call_provider());
        let _permit = ctx.client.limiter().acquire().await;
        let amount_out = quoter
            .quoteExactInputSingle(token_in, token_out, U24::from(pool.fee_bps), amount_in, U160::ZERO)
            .call()
            .await
            .map_err(|e| {
                warn!("{}: quoter call failed: {e}", pool.id);
                EngineError::Rpc(e.to_string())
            })?;

        Ok(TradeQuote::build(
            amount_in,
            amount_out,
            decimals_in,
            decimals_out,
            spot,
            self.fee_percent(state),
            1.0,
        ))
    }

    /// Fee tier in percent: ppm / 10^4 (3000 → 0.30%).
    pub fn fee_percent(&self, state: &VenueState) -> f64 {
        match state {
            VenueState::DexV3Pool(pool) => pool.fee_bps as f64 / 10_000.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Q96;
    use crate::model::{EventMetadata, Token};

    fn pair() -> TokenPairOnChain {
        let weth = Token::new(
            1,
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".into(),
            "WETH".into(),
            "Wrapped Ether".into(),
            18,
            true,
        );
        let usdc = Token::new(
            1,
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".into(),
            "USDC".into(),
            "USD Coin".into(),
            6,
            true,
        );
        TokenPairOnChain::new(weth, usdc)
    }

    fn adapter() -> V3Adapter {
        V3Adapter::new(
            VenueName::UniswapV3,
            1,
            "0x1f98431c8ad98523631ae4a59f267346ea31f984",
            "0xb27308f9f90d607463bb33ea1bebb41c27ce5ab6",
        )
        .unwrap()
    }

    fn seeded_state() -> VenueState {
        let adapter = adapter();
        let mut pool = adapter.empty_state(
            pair(),
            "0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8",
            3000,
            60,
        );
        pool.sqrt_price_x96 = Q96;
        pool.liquidity = 10u128.pow(18);
        pool.tick = 0;
        // Equal decimals in tests keep the adjusted price at 1.0.
        pool.pair.token0.decimals = 18;
        pool.pair.token1.decimals = 18;
        pool.recompute_spot_prices();
        VenueState::DexV3Pool(pool)
    }

    fn meta(block: u64) -> EventMetadata {
        EventMetadata {
            block_number: block,
            transaction_index: 0,
            log_index: 0,
            transaction_hash: String::from("0xbeef"),
            block_received_timestamp: 0,
        }
    }

    #[test]
    fn swap_event_updates_price_tick_and_liquidity() {
        // Spec scenario: sqrt price up 1% → spot up ~2.01%.
        let adapter = adapter();
        let mut state = seeded_state();
        let before = state.spot_price_0_to_1().unwrap();

        let bumped = Q96 + Q96 / U256::from(100u64);
        let event = PoolEvent {
            pool_id: state.id().to_string(),
            chain_id: 1,
            address: String::from("0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8"),
            meta: meta(100),
            kind: PoolEventKind::V3Swap {
                sqrt_price_x96: bumped,
                liquidity: 2 * 10u128.pow(18),
                tick: 199,
            },
        };
        adapter.apply_event(&mut state, &event).unwrap();

        let VenueState::DexV3Pool(pool) = &state else { unreachable!() };
        assert_eq!(pool.sqrt_price_x96, bumped);
        assert_eq!(pool.tick, 199);
        assert_eq!(pool.liquidity, 2 * 10u128.pow(18));

        let after = pool.spot_price_0_to_1;
        let growth = after / before - 1.0;
        assert!((growth - 0.0201).abs() < 0.0002, "growth {growth}");
    }

    #[test]
    fn mint_and_burn_are_ignored_for_state() {
        let adapter = adapter();
        let mut state = seeded_state();
        let before = match &state {
            VenueState::DexV3Pool(p) => (p.sqrt_price_x96, p.liquidity, p.tick),
            _ => unreachable!(),
        };

        let mint = PoolEvent {
            pool_id: state.id().to_string(),
            chain_id: 1,
            address: String::from("0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8"),
            meta: meta(101),
            kind: PoolEventKind::V3Mint { tick_lower: -60, tick_upper: 60, amount: 1000 },
        };
        adapter.apply_event(&mut state, &mint).unwrap();

        let after = match &state {
            VenueState::DexV3Pool(p) => (p.sqrt_price_x96, p.liquidity, p.tick),
            _ => unreachable!(),
        };
        assert_eq!(before, after);
    }

    #[test]
    fn v2_event_is_a_kind_mismatch() {
        let adapter = adapter();
        let mut state = seeded_state();
        let event = PoolEvent {
            pool_id: state.id().to_string(),
            chain_id: 1,
            address: String::from("0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8"),
            meta: meta(102),
            kind: PoolEventKind::V2Sync { reserve0: U256::from(1u8), reserve1: U256::from(1u8) },
        };
        let err = adapter.apply_event(&mut state, &event).unwrap_err();
        assert_eq!(err.kind(), "EventKindMismatch");
    }

    #[test]
    fn simulate_uses_the_multi_tick_engine() {
        let adapter = adapter();
        let state = seeded_state();
        let amount_in = U256::from(10u128.pow(15));
        let out = adapter.simulate(&state, amount_in, true).unwrap();
        assert!(out > U256::ZERO);
        assert!(out < amount_in);
    }

    #[test]
    fn tick_window_stays_within_one_multicall() {
        // 2 * TICK_WINDOW_EACH_SIDE candidates must not exceed the batch cap.
        assert!(2 * TICK_WINDOW_EACH_SIDE as usize <= MULTICALL_BATCH_SIZE);
    }
}
