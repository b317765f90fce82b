//! Constant-product (V2 family) adapter.

use alloy::primitives::{Address, U256};
use log::debug;
use serde_json::json;

use super::quote::TradeQuote;
use super::AdapterContext;
use crate::errors::EngineError;
use crate::model::{
    dex_pool_id, DexV2PoolState, PoolEvent, PoolEventKind, TokenPairOnChain, VenueId, VenueName,
    VenueState,
};
use crate::rpc::cache_key;
use crate::utils::hex_encode;

use crate::abis::v2::{IUniswapV2Factory, IUniswapV2Pair};

/// V2 swap fee: 30 parts per 10 000.
const FEE_BPS: u32 = 30;
const FEE_DENOMINATOR: u64 = 10_000;

pub struct V2Adapter {
    venue: VenueName,
    chain_id: u64,
    factory: Address,
    #[allow(dead_code)]
    router: Address,
}

impl V2Adapter {
    pub fn new(
        venue: VenueName,
        chain_id: u64,
        factory: &str,
        router: &str,
    ) -> Result<Self, EngineError> {
        let factory = factory.parse().map_err(|_| EngineError::Rpc(format!("bad factory address {factory}")))?;
        let router = router.parse().map_err(|_| EngineError::Rpc(format!("bad router address {router}")))?;
        Ok(Self { venue, chain_id, factory, router })
    }

    pub fn venue_name(&self) -> VenueName {
        self.venue
    }

    fn venue_id(&self) -> VenueId {
        VenueId::Dex { name: self.venue, chain_id: self.chain_id }
    }

    fn empty_state(&self, pair: TokenPairOnChain, address: &str) -> DexV2PoolState {
        DexV2PoolState {
            id: dex_pool_id(self.chain_id, address),
            venue: self.venue_id(),
            pair_id: pair.pair_id(),
            pair,
            address: address.to_lowercase(),
            reserve0: U256::ZERO,
            reserve1: U256::ZERO,
            fee_bps: FEE_BPS,
            spot_price_0_to_1: 0.0,
            spot_price_1_to_0: 0.0,
            latest_event_meta: None,
            total_liquidity_usd: 0.0,
            disabled: false,
        }
    }

    pub async fn discover(
        &self,
        ctx: &AdapterContext,
        pair: &TokenPairOnChain,
    ) -> Result<Vec<VenueState>, EngineError> {
        let token0: Address = pair.token0.address.parse().map_err(|_| {
            EngineError::Rpc(format!("bad token address {}", pair.token0.address))
        })?;
        let token1: Address = pair.token1.address.parse().map_err(|_| {
            EngineError::Rpc(format!("bad token address {}", pair.token1.address))
        })?;

        let factory_hex = format!("{:#x}", self.factory);
        let args = json!([pair.token0.address, pair.token1.address]);
        let key = cache_key(&factory_hex, "getPair", &args);

        let pool_address = match ctx.client.cache_get("getPair", &key).await.and_then(|v| {
            v.as_str().and_then(|s| s.parse::<Address>().ok())
        }) {
            Some(cached) => cached,
            None => {
                let factory = IUniswapV2Factory::new(self.factory, ctx.client.call_provider());
                let _permit = ctx.client.limiter().acquire().await;
                let address = factory
                    .getPair(token0, token1)
                    .call()
                    .await
                    .map_err(|e| EngineError::Rpc(e.to_string()))?;
                ctx.client.cache_put("getPair", key, json!(format!("{address:#x}"))).await;
                address
            }
        };

        if pool_address == Address::ZERO {
            return Ok(Vec::new());
        }

        let address = hex_encode(pool_address.as_slice());
        Ok(vec![VenueState::DexV2Pool(self.empty_state(pair.clone(), &address))])
    }

    /// First sight of a pool: read token0/token1 (two view calls), register
    /// the tokens, seed the state from the event's reserves.
    pub async fn introspect_from_event(
        &self,
        ctx: &AdapterContext,
        event: &PoolEvent,
    ) -> Result<VenueState, EngineError> {
        let PoolEventKind::V2Sync { reserve0, reserve1 } = &event.kind else {
            return Err(EngineError::EventKindMismatch {
                expected: "v2-sync",
                got: event.kind.name().to_string(),
            });
        };

        let pool_address: Address = event
            .address
            .parse()
            .map_err(|_| EngineError::UnknownPool(event.pool_id.clone()))?;

        let (token0_addr, token1_addr) = self.pool_tokens(ctx, pool_address).await?;

        let token0 = ctx
            .tokens
            .ensure_registered(token0_addr)
            .await
            .map_err(|_| EngineError::UnknownPool(event.pool_id.clone()))?;
        let token1 = ctx
            .tokens
            .ensure_registered(token1_addr)
            .await
            .map_err(|_| EngineError::UnknownPool(event.pool_id.clone()))?;

        let pair = TokenPairOnChain::new(token0, token1);
        let mut state = self.empty_state(pair, &event.address);
        state.reserve0 = *reserve0;
        state.reserve1 = *reserve1;
        state.recompute_spot_prices();
        state.latest_event_meta = Some(event.meta.clone());
        Ok(VenueState::DexV2Pool(state))
    }

    async fn pool_tokens(
        &self,
        ctx: &AdapterContext,
        pool: Address,
    ) -> Result<(Address, Address), EngineError> {
        let pool_hex = format!("{pool:#x}");
        let args = json!([]);
        let key0 = cache_key(&pool_hex, "token0", &args);
        let key1 = cache_key(&pool_hex, "token1", &args);

        let cached0 = ctx.client.cache_get("token0", &key0).await;
        let cached1 = ctx.client.cache_get("token1", &key1).await;
        if let (Some(c0), Some(c1)) = (&cached0, &cached1) {
            if let (Some(a0), Some(a1)) = (
                c0.as_str().and_then(|s| s.parse::<Address>().ok()),
                c1.as_str().and_then(|s| s.parse::<Address>().ok()),
            ) {
                return Ok((a0, a1));
            }
        }

        let contract = IUniswapV2Pair::new(pool, ctx.client.call_provider());
        let _permit = ctx.client.limiter().acquire().await;
        let token0 = contract
            .token0()
            .call()
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))?;
        let token1 = contract
            .token1()
            .call()
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))?;

        ctx.client.cache_put("token0", key0, json!(format!("{token0:#x}"))).await;
        ctx.client.cache_put("token1", key1, json!(format!("{token1:#x}"))).await;

        if token0 == Address::ZERO || token1 == Address::ZERO {
            return Err(EngineError::UnknownPool(hex_encode(pool.as_slice())));
        }
        Ok((token0, token1))
    }

    pub async fn refresh(
        &self,
        ctx: &AdapterContext,
        state: &mut VenueState,
    ) -> Result<(), EngineError> {
        let VenueState::DexV2Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v2-pool",
                got: String::from("other state shape"),
            });
        };

        let address: Address = pool
            .address
            .parse()
            .map_err(|_| EngineError::UnknownPool(pool.id.clone()))?;
        let contract = IUniswapV2Pair::new(address, ctx.client.call_provider());
        let _permit = ctx.client.limiter().acquire().await;
        let reserves = contract
            .getReserves()
            .call()
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))?;

        pool.reserve0 = U256::from(reserves.reserve0);
        pool.reserve1 = U256::from(reserves.reserve1);
        pool.recompute_spot_prices();
        Ok(())
    }

    /// Only `Sync` mutates V2 state; the event carries the full reserve
    /// snapshot after the trade.
    pub fn apply_event(&self, state: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError> {
        let VenueState::DexV2Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v2-pool",
                got: String::from("other state shape"),
            });
        };

        match &event.kind {
            PoolEventKind::V2Sync { reserve0, reserve1 } => {
                pool.reserve0 = *reserve0;
                pool.reserve1 = *reserve1;
                pool.recompute_spot_prices();
                Ok(())
            }
            other => Err(EngineError::EventKindMismatch {
                expected: "v2-sync",
                got: other.name().to_string(),
            }),
        }
    }

    /// Constant-product output with the 30 bps fee taken from the input:
    /// `out = inWithFee * reserveOut / (reserveIn + inWithFee)` where
    /// `inWithFee = in * (10000 - 30) / 10000`.
    pub fn simulate(
        &self,
        state: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<U256, EngineError> {
        let VenueState::DexV2Pool(pool) = state else {
            return Err(EngineError::EventKindMismatch {
                expected: "dex-v2-pool",
                got: String::from("other state shape"),
            });
        };

        if amount_in.is_zero() {
            return Err(EngineError::InvalidAmount);
        }
        let (reserve_in, reserve_out) = if zero_for_one {
            (pool.reserve0, pool.reserve1)
        } else {
            (pool.reserve1, pool.reserve0)
        };
        if reserve_in.is_zero() || reserve_out.is_zero() || amount_in > reserve_in {
            return Err(EngineError::InsufficientLiquidity);
        }

        let amount_in_with_fee =
            amount_in * U256::from(FEE_DENOMINATOR - FEE_BPS as u64) / U256::from(FEE_DENOMINATOR);
        let numerator = amount_in_with_fee * reserve_out;
        let denominator = reserve_in + amount_in_with_fee;
        if denominator.is_zero() {
            return Err(EngineError::InsufficientLiquidity);
        }
        Ok(numerator / denominator)
    }

    pub fn quote(
        &self,
        state: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<TradeQuote, EngineError> {
        let amount_out = self.simulate(state, amount_in, zero_for_one)?;

        let VenueState::DexV2Pool(pool) = state else {
            return Err(EngineError::InvalidAmount);
        };
        let (spot, decimals_in, decimals_out) = if zero_for_one {
            (pool.spot_price_0_to_1, 0, 0)
        } else {
            (pool.spot_price_1_to_0, 0, 0)
        };
        debug!("v2 quote {}: in={} out={}", pool.id, amount_in, amount_out);

        // Spot prices here are raw reserve ratios, so the execution price
        // is compared without decimal adjustment.
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

    pub fn fee_percent(&self, _state: &VenueState) -> f64 {
        FEE_BPS as f64 * 100.0 / FEE_DENOMINATOR as f64
    }
}
