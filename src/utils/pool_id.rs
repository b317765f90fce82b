//! Uniswap V4 pool key computation.

use alloy::primitives::{keccak256, Address};
use alloy::sol_types::SolValue;

use super::conversion::hex_encode;

/// Compute the Uniswap V4 pool key from pool parameters:
/// `keccak256(abi.encode(currency0, currency1, fee, tickSpacing, hooks))`.
///
/// Currencies are sorted so the lower address is currency0, matching the
/// manager's `sortsBefore` logic; the native token (zero address) therefore
/// always lands in currency0 when present.
pub fn compute_v4_pool_key(
    currency_a: Address,
    currency_b: Address,
    fee: u32,
    tick_spacing: i32,
    hooks: Address,
) -> String {
    let (currency0, currency1) =
        if currency_a < currency_b { (currency_a, currency_b) } else { (currency_b, currency_a) };

    // ABI encode as (address, address, uint24, int24, address)
    let encoded = (currency0, currency1, fee, tick_spacing, hooks).abi_encode();
    let hash = keccak256(&encoded);

    hex_encode(hash.as_slice())
}
