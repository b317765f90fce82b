//! Sqrt-price step functions and token amount deltas.
//!
//! Direct counterparts of Uniswap V3's SqrtPriceMath: next-price from an
//! input amount, and the amount of each token moved between two sqrt
//! prices. Inputs consumed round up, outputs produced round down.

use alloy::primitives::{U256, U512};
use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use std::str::FromStr;

use super::full_math::{mul_div, mul_div_rounding_up, narrow, widen, Q96};
use crate::errors::EngineError;

/// Convert a sqrt price to a decimal-adjusted f64 price (token1 per token0).
///
/// `(s / Q96)^2 · 10^(d0 − d1)`, computed through BigDecimal so the full
/// 160-bit range survives. Display quality only; swap math must never
/// consume this value.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256, token0_decimals: u8, token1_decimals: u8) -> f64 {
    if sqrt_price_x96.is_zero() || token0_decimals > 24 || token1_decimals > 24 {
        return 0.0;
    }

    let Ok(sqrt_price) = BigDecimal::from_str(&sqrt_price_x96.to_string()) else {
        return 0.0;
    };
    let Ok(q96) = BigDecimal::from_str(&Q96.to_string()) else {
        return 0.0;
    };

    let normalized = &sqrt_price / &q96;
    let raw_price = &normalized * &normalized;

    let decimal_diff = token0_decimals as i32 - token1_decimals as i32;
    let pow10 = BigDecimal::from_str(&format!("1e{}", decimal_diff.abs())).unwrap_or_default();
    let adjusted = if decimal_diff >= 0 { raw_price * pow10 } else { raw_price / pow10 };

    let price = adjusted.to_f64().unwrap_or(0.0);
    if price.is_finite() {
        price
    } else {
        0.0
    }
}

/// Virtual reserves at the current sqrt price: `(L·Q96/s, L·s/Q96)`.
///
/// Returns `(0, 0)` when liquidity is zero; a zero sqrt price is a math
/// precondition failure.
pub fn virtual_reserves(sqrt_price_x96: U256, liquidity: u128) -> Result<(U256, U256), EngineError> {
    if liquidity == 0 {
        return Ok((U256::ZERO, U256::ZERO));
    }
    if sqrt_price_x96.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let l = U256::from(liquidity);
    let reserve0 = mul_div(l, Q96, sqrt_price_x96)?;
    let reserve1 = mul_div(l, sqrt_price_x96, Q96)?;
    Ok((reserve0, reserve1))
}

/// Next sqrt price after consuming `amount` of token0.
///
/// Rounds up so the pool never gives out more than the input pays for.
/// `add` distinguishes adding token0 to the pool (price falls) from
/// removing it (price rises).
pub fn get_next_sqrt_price_from_amount0_rounding_up(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> Result<U256, EngineError> {
    if amount.is_zero() {
        return Ok(sqrt_price_x96);
    }
    let numerator1 = widen(U256::from(liquidity)) << 96usize;
    if numerator1.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let product = widen(amount) * widen(sqrt_price_x96);

    let denominator = if add {
        numerator1 + product
    } else {
        if numerator1 <= product {
            return Err(EngineError::InsufficientLiquidity);
        }
        numerator1 - product
    };
    if denominator.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }

    let one = U512::from(1u8);
    let next = (numerator1 * widen(sqrt_price_x96) + (denominator - one)) / denominator;
    narrow(next)
}

/// Next sqrt price after consuming `amount` of token1.
///
/// Rounds down when adding (price rises by at most the exact amount) and
/// rounds the subtracted delta up when removing.
pub fn get_next_sqrt_price_from_amount1_rounding_down(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> Result<U256, EngineError> {
    let l = U256::from(liquidity);
    if add {
        let quotient = mul_div(amount, Q96, l)?;
        Ok(sqrt_price_x96 + quotient)
    } else {
        let quotient = mul_div_rounding_up(amount, Q96, l)?;
        if sqrt_price_x96 <= quotient {
            return Err(EngineError::InsufficientLiquidity);
        }
        Ok(sqrt_price_x96 - quotient)
    }
}

/// Amount of token0 between two sqrt prices:
/// `L · Q96 · (sb − sa) / (sb · sa)`.
pub fn get_amount0_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, EngineError> {
    let (lower, upper) = if sqrt_ratio_a_x96 <= sqrt_ratio_b_x96 {
        (sqrt_ratio_a_x96, sqrt_ratio_b_x96)
    } else {
        (sqrt_ratio_b_x96, sqrt_ratio_a_x96)
    };
    if lower.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }

    let numerator1 = widen(U256::from(liquidity)) << 96usize;
    let numerator2 = widen(upper - lower);
    let product = numerator1 * numerator2;

    if round_up {
        let one = U512::from(1u8);
        let inner = (product + (widen(upper) - one)) / widen(upper);
        let outer = (inner + (widen(lower) - one)) / widen(lower);
        narrow(outer)
    } else {
        narrow(product / widen(upper) / widen(lower))
    }
}

/// Amount of token1 between two sqrt prices: `L · (sb − sa) / Q96`.
pub fn get_amount1_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, EngineError> {
    let (lower, upper) = if sqrt_ratio_a_x96 <= sqrt_ratio_b_x96 {
        (sqrt_ratio_a_x96, sqrt_ratio_b_x96)
    } else {
        (sqrt_ratio_b_x96, sqrt_ratio_a_x96)
    };
    let l = U256::from(liquidity);
    if round_up {
        mul_div_rounding_up(l, upper - lower, Q96)
    } else {
        mul_div(l, upper - lower, Q96)
    }
}
