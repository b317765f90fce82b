//! Raw log decoding.
//!
//! One match arm per monitored topic-0 signature; anything else is not
//! ours and yields `None`.

use alloy::primitives::U256;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

use crate::abis::{v2, v3, v4};
use crate::model::{dex_pool_id, EventMetadata, PoolEvent, PoolEventKind};
use crate::utils::hex_encode;

/// Decode a subscription log into a typed pool event.
///
/// `received_at_ms` is the local receive time of the carrying block; it
/// rides along in the metadata for latency accounting.
pub fn parse_log(chain_id: u64, log: &Log, received_at_ms: i64) -> Option<PoolEvent> {
    let data = log.data();
    let topic0 = *data.topics().first()?;

    let meta = EventMetadata {
        block_number: log.block_number.unwrap_or(0),
        transaction_index: log.transaction_index.unwrap_or(0) as u32,
        log_index: log.log_index.unwrap_or(0) as u32,
        transaction_hash: log
            .transaction_hash
            .map(|h| hex_encode(h.as_slice()))
            .unwrap_or_default(),
        block_received_timestamp: received_at_ms,
    };
    let emitter = hex_encode(log.address().as_slice());

    let (address, kind) = match topic0 {
        t if t == v2::Sync::SIGNATURE_HASH => {
            let event = v2::Sync::decode_log_data(data).ok()?;
            (
                emitter,
                PoolEventKind::V2Sync {
                    reserve0: U256::from(event.reserve0),
                    reserve1: U256::from(event.reserve1),
                },
            )
        }
        t if t == v3::Swap::SIGNATURE_HASH => {
            let event = v3::Swap::decode_log_data(data).ok()?;
            (
                emitter,
                PoolEventKind::V3Swap {
                    sqrt_price_x96: U256::from(event.sqrtPriceX96),
                    liquidity: event.liquidity,
                    tick: event.tick.as_i32(),
                },
            )
        }
        t if t == v3::Mint::SIGNATURE_HASH => {
            let event = v3::Mint::decode_log_data(data).ok()?;
            (
                emitter,
                PoolEventKind::V3Mint {
                    tick_lower: event.tickLower.as_i32(),
                    tick_upper: event.tickUpper.as_i32(),
                    amount: event.amount,
                },
            )
        }
        t if t == v3::Burn::SIGNATURE_HASH => {
            let event = v3::Burn::decode_log_data(data).ok()?;
            (
                emitter,
                PoolEventKind::V3Burn {
                    tick_lower: event.tickLower.as_i32(),
                    tick_upper: event.tickUpper.as_i32(),
                    amount: event.amount,
                },
            )
        }
        t if t == v4::Swap::SIGNATURE_HASH => {
            let event = v4::Swap::decode_log_data(data).ok()?;
            // V4 logs are emitted by the singleton manager; the pool
            // identity is the 32-byte key, not the log address.
            (
                hex_encode(event.id.as_slice()),
                PoolEventKind::V4Swap {
                    sqrt_price_x96: U256::from(event.sqrtPriceX96),
                    liquidity: event.liquidity,
                    tick: event.tick.as_i32(),
                    fee_ppm: event.fee.to::<u32>(),
                },
            )
        }
        t if t == v4::ModifyLiquidity::SIGNATURE_HASH => {
            let event = v4::ModifyLiquidity::decode_log_data(data).ok()?;
            // Signed int256 on the wire; liquidity deltas fit i128.
            let magnitude =
                u128::try_from(event.liquidityDelta.unsigned_abs()).unwrap_or(i128::MAX as u128)
                    as i128;
            let delta = if event.liquidityDelta.is_negative() {
                magnitude.wrapping_neg()
            } else {
                magnitude
            };
            (
                hex_encode(event.id.as_slice()),
                PoolEventKind::V4ModifyLiquidity {
                    tick_lower: event.tickLower.as_i32(),
                    tick_upper: event.tickUpper.as_i32(),
                    liquidity_delta: delta,
                },
            )
        }
        _ => return None,
    };

    Some(PoolEvent { pool_id: dex_pool_id(chain_id, &address), chain_id, address, meta, kind })
}
