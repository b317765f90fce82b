use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use super::state::EventMetadata;
use crate::utils::{serde_u128_decimal, serde_u256_decimal};

/// A decoded on-chain pool event, one variant per monitored topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEvent {
    /// `"<chainId>:<poolAddress>"` for V2/V3, `"<chainId>:<poolKey>"` for V4.
    pub pool_id: String,
    pub chain_id: u64,
    /// The emitting pool address (V2/V3) or the 32-byte pool key (V4),
    /// lowercase hex.
    pub address: String,
    pub meta: EventMetadata,
    pub kind: PoolEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PoolEventKind {
    V2Sync {
        #[serde(with = "serde_u256_decimal")]
        reserve0: U256,
        #[serde(with = "serde_u256_decimal")]
        reserve1: U256,
    },
    V3Swap {
        #[serde(with = "serde_u256_decimal")]
        sqrt_price_x96: U256,
        #[serde(with = "serde_u128_decimal")]
        liquidity: u128,
        tick: i32,
    },
    V3Mint {
        tick_lower: i32,
        tick_upper: i32,
        #[serde(with = "serde_u128_decimal")]
        amount: u128,
    },
    V3Burn {
        tick_lower: i32,
        tick_upper: i32,
        #[serde(with = "serde_u128_decimal")]
        amount: u128,
    },
    V4Swap {
        #[serde(with = "serde_u256_decimal")]
        sqrt_price_x96: U256,
        #[serde(with = "serde_u128_decimal")]
        liquidity: u128,
        tick: i32,
        fee_ppm: u32,
    },
    V4ModifyLiquidity {
        tick_lower: i32,
        tick_upper: i32,
        liquidity_delta: i128,
    },
}

impl PoolEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolEventKind::V2Sync { .. } => "v2-sync",
            PoolEventKind::V3Swap { .. } => "v3-swap",
            PoolEventKind::V3Mint { .. } => "v3-mint",
            PoolEventKind::V3Burn { .. } => "v3-burn",
            PoolEventKind::V4Swap { .. } => "v4-swap",
            PoolEventKind::V4ModifyLiquidity { .. } => "v4-modify-liquidity",
        }
    }
}
