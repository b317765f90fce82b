//! Uniswap V4 (singleton pool manager) adapter.
//!
//! Pools are identified by the keccak hash of their pool key rather than a
//! contract address; state is read through the periphery state-view
//! contract. Hooked pools are accepted for tracking, but local simulation
//! accuracy is not guaranteed for them.

use alloy::primitives::aliases::{I24, U24};
use alloy::primitives::{Address, B256, U256};
use log::{debug, warn};

use super::quote::TradeQuote;
use super::AdapterContext;
use crate::abis::v4::{IStateView, IV4Quoter, PoolKey, QuoteExactSingleParams};
use crate::errors::EngineError;
use crate::math::simulate_multi_tick_swap;
use crate::model::{
    dex_pool_id, DexV4PoolState, PoolEvent, PoolEventKind, TokenPairOnChain, VenueId, VenueName,
    VenueState,
};
use crate::utils::{compute_v4_pool_key, ZERO_ADDRESS};

/// No-hook fee/spacing combinations probed at discovery, mirroring the V3
/// fee tiers.
const PROBED_TIERS: [(u32, i32); 4] = [(100, 1), (500, 10), (3000, 60), (10000, 200)];

pub struct V4Adapter {
    venue: VenueName,
    chain_id: u64,
    manager: Address,
    state_view: Address,
    quoter: Address,
}

impl V4Adapter {
    pub fn new(
        venue: VenueName,
        chain_id: u64,
        pool_manager: &str,
        state_view: &str,
        quoter: &str,
    ) -> Result<Self, EngineError> {
        let manager = pool_manager
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad pool manager address {pool_manager}")))?;
        let state_view = state_view
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad state view address {state_view}")))?;
        let quoter = quoter
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad quoter address {quoter}")))?;
        Ok(Self { venue, chain_id, manager, state_view, quoter })
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
        pool_key: &str,
        fee_ppm: u32,
        tick_spacing: i32,
        hooks: Option<String>,
    ) -> DexV4PoolState {
        DexV4PoolState {
            id: dex_pool_id(self.chain_id, pool_key),
            venue: self.venue_id(),
            pair_id: pair.pair_id(),
            pair,
            pool_key: pool_key.to_lowercase(),
            hooks,
            manager: format!("{:#x}", self.manager),
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

    /// Probe the standard no-hook tiers: a pool exists iff the manager has
    /// a non-zero sqrt price recorded under its key.
    pub async fn discover(
        &self,
        ctx: &AdapterContext,
        pair: &TokenPairOnChain,
    ) -> Result<Vec<VenueState>, EngineError> {
        let currency0: Address = pair
            .token0
            .address
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad token address {}", pair.token0.address)))?;
        let currency1: Address = pair
            .token1
            .address
            .parse()
            .map_err(|_| EngineError::Rpc(format!("bad token address {}", pair.token1.address)))?;

        let view = IStateView::new(self.state_view, ctx.client.call_provider());
        let mut pools = Vec::new();

        for (fee_ppm, tick_spacing) in PROBED_TIERS {
            let key_hex =
                compute_v4_pool_key(currency0, currency1, fee_ppm, tick_spacing, Address::ZERO);
            let key: B256 = key_hex
                .parse()
                .map_err(|_| EngineError::Rpc(format!("bad pool key {key_hex}")))?;

            let _permit = ctx.client.limiter().acquire().await;
            let slot0 = view
                .getSlot0(key)
                .call()
                .await
                .map_err(|e| EngineError::Rpc(e.to_string()))?;
            if U256::from(slot0.sqrtPriceX96).is_zero() {
                continue;
            }

            pools.push(VenueState::DexV4Pool(self.empty_state(
                pair.clone(),
                &key_hex,
                fee_ppm,
                tick_spacing,
                None,
            )));
        }

        Ok(pools)
    }

    /// A pool key is a hash: the constituent currencies cannot be
    /// recovered from an unsolicited event, so unknown V4 pools are
    /// dropped rather than introspected.
    pub async fn introspect_from_event(
        &self,
        _ctx: &AdapterContext,
        event: &PoolEvent,
    ) -> Result<VenueState, EngineError> {
        warn!(
            "v4 pool {} seen in events but not configured; cannot resolve currencies from the key",
            event.pool_id
        );
        Err(EngineError::UnknownPool(event.pool_id.clone()))
    }

    pub async fn refresh(
        &self,
        ctx: &AdapterContext,
        state: &mut VenueState,
    ) -> Result<(), EngineError> {
        let VenueState::DexV4Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v4-pool",
                got: String::from("other state shape"),
            });
        };

        let key: B256 = pool
            .pool_key
            .parse()
            .map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;
        let view = IStateView::new(self.state_view, ctx.client.call_provider());

        let slot0 = {
            let _permit = ctx.client.limiter().acquire().await;
            view.getSlot0(key).call().await.map_err(|e| EngineError::Rpc(e.to_string()))?
        };
        let liquidity = {
            let _permit = ctx.client.limiter().acquire().await;
            view.getLiquidity(key).call().await.map_err(|e| EngineError::Rpc(e.to_string()))?
        };

        pool.sqrt_price_x96 = U256::from(slot0.sqrtPriceX96);
        pool.tick = slot0.tick.as_i32();
        pool.fee_bps = slot0.lpFee.to::<u32>();
        pool.liquidity = liquidity;
        pool.recompute_spot_prices();
        Ok(())
    }

    /// Swap events mirror V3, with the pool's current fee attached
    /// (dynamic-fee pools change it per swap). ModifyLiquidity is
    /// acknowledged but not applied.
    pub fn apply_event(&self, state: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError> {
        let VenueState::DexV4Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v4-pool",
                got: String::from("other state shape"),
            });
        };

        match &event.kind {
            PoolEventKind::V4Swap { sqrt_price_x96, liquidity, tick, fee_ppm } => {
                pool.sqrt_price_x96 = *sqrt_price_x96;
                pool.liquidity = *liquidity;
                pool.tick = *tick;
                if *fee_ppm > 0 {
                    pool.fee_bps = *fee_ppm;
                }
                pool.recompute_spot_prices();
                Ok(())
            }
            PoolEventKind::V4ModifyLiquidity { .. } => {
                debug!("{}: modify-liquidity event ignored for state", pool.id);
                Ok(())
            }
            other => Err(EngineError::EventKindMismatch {
                expected: "v4-swap",
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
        let VenueState::DexV4Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v4-pool",
                got: String::from("other state shape"),
            });
        };

        if pool.hooks.as_deref().is_some_and(|h| h != ZERO_ADDRESS) {
            warn!("{}: pool has hooks; simulation accuracy is not guaranteed", pool.id);
        }

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

    pub async fn quote(
        &self,
        ctx: &AdapterContext,
        state: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<TradeQuote, EngineError> {
        let VenueState::DexV4Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v4-pool",
                got: String::from("other state shape"),
            });
        };
        if amount_in.is_zero() {
            return Err(EngineError::InvalidAmount);
        }

        let currency0: Address = pool
            .pair
            .token0
            .address
            .parse()
            .map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;
        let currency1: Address = pool
            .pair
            .token1
            .address
            .parse()
            .map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;
        let hooks: Address = pool
            .hooks
            .as_deref()
            .unwrap_or(ZERO_ADDRESS)
            .parse()
            .map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;
        let exact_amount =
            u128::try_from(amount_in).map_err(|_| EngineError::InvalidAmount)?;

        let hooked = pool.hooks.as_deref().is_some_and(|h| h != ZERO_ADDRESS);
        let params = QuoteExactSingleParams {
            poolKey: PoolKey {
                currency0,
                currency1,
                fee: U24::from(pool.fee_bps),
                tickSpacing: I24::try_from(pool.tick_spacing).unwrap_or_default(),
                hooks,
            },
            zeroForOne: zero_for_one,
            exactAmount: exact_amount,
            hookData: Default::default(),
        };

        let quoter = IV4Quoter::new(self.quoter, ctx.client.call_provider());
        let _permit = ctx.client.limiter().acquire().await;
        let result = quoter
            .quoteExactInputSingle(params)
            .call()
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))?;

        let (decimals_in, decimals_out, spot) = if zero_for_one {
            (pool.pair.token0.decimals, pool.pair.token1.decimals, pool.spot_price_0_to_1)
        } else {
            (pool.pair.token1.decimals, pool.pair.token0.decimals, pool.spot_price_1_to_0)
        };

        Ok(TradeQuote::build(
            amount_in,
            result.amountOut,
            decimals_in,
            decimals_out,
            spot,
            self.fee_percent(state),
            if hooked { 0.5 } else { 1.0 },
        ))
    }

    pub fn fee_percent(&self, state: &VenueState) -> f64 {
        match state {
            VenueState::DexV4Pool(pool) => pool.fee_bps as f64 / 10_000.0,
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
        let a = Token::new(
            1,
            "0x0000000000000000000000000000000000000001".into(),
            "AAA".into(),
            "Token A".into(),
            18,
            true,
        );
        let b = Token::new(
            1,
            "0x0000000000000000000000000000000000000002".into(),
            "BBB".into(),
            "Token B".into(),
            18,
            true,
        );
        TokenPairOnChain::new(a, b)
    }

    fn adapter() -> V4Adapter {
        V4Adapter::new(
            VenueName::UniswapV4,
            1,
            "0x000000000004444c5dc75cb358380d2e3de08a90",
            "0x7ffe42c4a5deea5b0fec41c94c136cf115597227",
            "0x52f0e24d1c21c8a0cb1e5a5dd6198556bd9e1203",
        )
        .unwrap()
    }

    fn seeded_state() -> VenueState {
        let adapter = adapter();
        let key = compute_v4_pool_key(
            "0x0000000000000000000000000000000000000001".parse().unwrap(),
            "0x0000000000000000000000000000000000000002".parse().unwrap(),
            3000,
            60,
            Address::ZERO,
        );
        let mut pool = adapter.empty_state(pair(), &key, 3000, 60, None);
        pool.sqrt_price_x96 = Q96;
        pool.liquidity = 10u128.pow(18);
        pool.recompute_spot_prices();
        VenueState::DexV4Pool(pool)
    }

    fn meta(block: u64) -> EventMetadata {
        EventMetadata {
            block_number: block,
            transaction_index: 0,
            log_index: 0,
            transaction_hash: String::from("0xfeed"),
            block_received_timestamp: 0,
        }
    }

    #[test]
    fn swap_updates_state_including_dynamic_fee() {
        let adapter = adapter();
        let mut state = seeded_state();
        let event = PoolEvent {
            pool_id: state.id().to_string(),
            chain_id: 1,
            address: match &state {
                VenueState::DexV4Pool(p) => p.pool_key.clone(),
                _ => unreachable!(),
            },
            meta: meta(10),
            kind: PoolEventKind::V4Swap {
                sqrt_price_x96: Q96 + Q96 / U256::from(50u64),
                liquidity: 3 * 10u128.pow(18),
                tick: 396,
                fee_ppm: 4500,
            },
        };
        adapter.apply_event(&mut state, &event).unwrap();

        let VenueState::DexV4Pool(pool) = &state else { unreachable!() };
        assert_eq!(pool.tick, 396);
        assert_eq!(pool.fee_bps, 4500);
        assert_eq!(pool.liquidity, 3 * 10u128.pow(18));
    }

    #[test]
    fn modify_liquidity_is_ignored_for_state() {
        let adapter = adapter();
        let mut state = seeded_state();
        let snapshot = match &state {
            VenueState::DexV4Pool(p) => (p.sqrt_price_x96, p.liquidity, p.tick, p.fee_bps),
            _ => unreachable!(),
        };
        let event = PoolEvent {
            pool_id: state.id().to_string(),
            chain_id: 1,
            address: String::new(),
            meta: meta(11),
            kind: PoolEventKind::V4ModifyLiquidity {
                tick_lower: -120,
                tick_upper: 120,
                liquidity_delta: 5_000_000,
            },
        };
        adapter.apply_event(&mut state, &event).unwrap();
        let after = match &state {
            VenueState::DexV4Pool(p) => (p.sqrt_price_x96, p.liquidity, p.tick, p.fee_bps),
            _ => unreachable!(),
        };
        assert_eq!(snapshot, after);
    }

    #[test]
    fn hooked_pools_still_simulate() {
        let adapter = adapter();
        let mut state = seeded_state();
        if let VenueState::DexV4Pool(pool) = &mut state {
            pool.hooks = Some(String::from("0x1234567890abcdef1234567890abcdef12345678"));
        }
        let out = adapter.simulate(&state, U256::from(10u128.pow(15)), true).unwrap();
        assert!(out > U256::ZERO);
    }
}
