//! Tick-to-sqrt-price conversion.
//!
//! Bit-decomposition approach matching Uniswap V3's TickMath: the sqrt
//! ratio is assembled from precomputed multipliers `1.0001^(-2^i / 2)`.
//! The f64 form is used for tick-window targeting; the integer form feeds
//! swap-step targets and is clamped to the admissible ratio range.

use alloy::primitives::U256;

use super::full_math::{MAX_SQRT_RATIO, MIN_SQRT_RATIO};

/// 2^96 as f64 for the final Q64.96 scale-up.
const Q96_F64: f64 = 79228162514264337593543950336.0;

/// Valid tick range (Uniswap V3 limits).
pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

// 1/sqrt(1.0001)^(2^i) = 1.0001^(-0.5 * 2^i) for i = 0..19.
const TICK_MULTIPLIERS: [f64; 20] = [
    0.9999500037496876,
    0.9999000099990001,
    0.9998000299960005,
    0.9996000999800035,
    0.9992003598800331,
    0.9984013591843877,
    0.9968052740212325,
    0.9936207543165446,
    0.9872822034085791,
    0.9747261491672988,
    0.9500910658705113,
    0.9026730334469643,
    0.8148186053123443,
    0.6639293595631539,
    0.4408021944899397,
    0.1943065746671466,
    0.0377550449588794,
    0.0014254434198470,
    0.0000020318889432,
    0.0000000000041286,
];

/// sqrt(1.0001^tick) * 2^96 as f64.
pub fn tick_to_sqrt_price_x96_f64(tick: i32) -> f64 {
    let clamped_tick = tick.clamp(MIN_TICK, MAX_TICK);
    let abs_tick = clamped_tick.unsigned_abs() as usize;

    let mut ratio = 1.0_f64;
    for (i, multiplier) in TICK_MULTIPLIERS.iter().enumerate() {
        if abs_tick & (1 << i) != 0 {
            ratio *= multiplier;
        }
    }

    if clamped_tick > 0 {
        ratio = 1.0 / ratio;
    }

    ratio * Q96_F64
}

/// Integer sqrt ratio at a tick, clamped to the admissible range.
pub fn sqrt_ratio_at_tick(tick: i32) -> U256 {
    let ratio = tick_to_sqrt_price_x96_f64(tick);
    let parsed = U256::from_str_radix(&format!("{ratio:.0}"), 10).unwrap_or(MIN_SQRT_RATIO);
    parsed.clamp(MIN_SQRT_RATIO, MAX_SQRT_RATIO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Q96;

    #[test]
    fn tick_zero_is_unity_ratio() {
        assert_eq!(sqrt_ratio_at_tick(0), Q96);
    }

    #[test]
    fn ratio_is_monotonic_in_tick() {
        let below = sqrt_ratio_at_tick(-100);
        let at = sqrt_ratio_at_tick(0);
        let above = sqrt_ratio_at_tick(100);
        assert!(below < at);
        assert!(at < above);
    }

    #[test]
    fn one_tick_is_half_a_basis_point() {
        let r = tick_to_sqrt_price_x96_f64(1) / Q96_F64;
        assert!((r - 1.0001_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn extreme_ticks_stay_in_bounds() {
        assert!(sqrt_ratio_at_tick(MIN_TICK) >= super::super::MIN_SQRT_RATIO);
        assert!(sqrt_ratio_at_tick(MAX_TICK) <= super::super::MAX_SQRT_RATIO);
        // Out-of-range ticks are clamped, not wrapped.
        assert_eq!(sqrt_ratio_at_tick(MIN_TICK - 10), sqrt_ratio_at_tick(MIN_TICK));
    }
}
