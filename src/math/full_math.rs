//! 512-bit full-precision multiply/divide primitives.

use alloy::primitives::{U256, U512};

use crate::errors::EngineError;

/// Q64.96 fixed-point scaling factor: 2^96.
pub const Q96: U256 = U256::from_limbs([0, 4294967296, 0, 0]);

/// Lowest admissible sqrt price ratio.
pub const MIN_SQRT_RATIO: U256 = U256::from_limbs([4295128740, 0, 0, 0]);

/// Highest admissible sqrt price ratio
/// (1461446703485210103287273052203988822378723970341).
pub const MAX_SQRT_RATIO: U256 =
    U256::from_limbs([6743328256752651557, 17280870778742802505, 4294805859, 0]);

/// Widen a U256 into the low limbs of a U512.
pub(crate) fn widen(x: U256) -> U512 {
    let mut limbs = [0u64; 8];
    limbs[..4].copy_from_slice(x.as_limbs());
    U512::from_limbs(limbs)
}

/// Narrow a U512 back to U256. The upper limbs must be zero; a non-zero
/// high half means a denominator was too small for the product.
pub(crate) fn narrow(x: U512) -> Result<U256, EngineError> {
    let limbs = x.as_limbs();
    if limbs[4..].iter().any(|&l| l != 0) {
        return Err(EngineError::InsufficientLiquidity);
    }
    let mut lo = [0u64; 4];
    lo.copy_from_slice(&limbs[..4]);
    Ok(U256::from_limbs(lo))
}

/// floor(a * b / denominator) with a full 512-bit intermediate product.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, EngineError> {
    if denominator.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let product = widen(a) * widen(b);
    narrow(product / widen(denominator))
}

/// ceil(a * b / denominator) with a full 512-bit intermediate product.
pub fn mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> Result<U256, EngineError> {
    if denominator.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let product = widen(a) * widen(b);
    let denom = widen(denominator);
    let one = U512::from(1u8);
    narrow((product + denom - one) / denom)
}

/// ceil(numerator / denominator).
pub fn div_rounding_up(numerator: U256, denominator: U256) -> Result<U256, EngineError> {
    if denominator.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let (quotient, remainder) = numerator.div_rem(denominator);
    if remainder.is_zero() {
        Ok(quotient)
    } else {
        Ok(quotient + U256::from(1u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q96_is_two_pow_96() {
        assert_eq!(Q96, U256::from(1u8) << 96);
    }

    #[test]
    fn sqrt_ratio_bounds_are_ordered() {
        assert!(MIN_SQRT_RATIO < MAX_SQRT_RATIO);
        assert_eq!(MIN_SQRT_RATIO, U256::from(4295128740u64));
        assert_eq!(
            MAX_SQRT_RATIO.to_string(),
            "1461446703485210103287273052203988822378723970341"
        );
    }

    #[test]
    fn mul_div_survives_256_bit_products() {
        // (2^200 * 2^100) / 2^150 = 2^150: the product does not fit in 256 bits.
        let a = U256::from(1u8) << 200;
        let b = U256::from(1u8) << 100;
        let d = U256::from(1u8) << 150;
        assert_eq!(mul_div(a, b, d).unwrap(), U256::from(1u8) << 150);
    }

    #[test]
    fn mul_div_rounding_up_rounds_up() {
        let a = U256::from(10u8);
        let b = U256::from(10u8);
        let d = U256::from(3u8);
        assert_eq!(mul_div(a, b, d).unwrap(), U256::from(33u8));
        assert_eq!(mul_div_rounding_up(a, b, d).unwrap(), U256::from(34u8));
    }

    #[test]
    fn zero_denominator_is_insufficient_liquidity() {
        let err = mul_div(U256::from(1u8), U256::from(1u8), U256::ZERO).unwrap_err();
        assert_eq!(err, EngineError::InsufficientLiquidity);
        let err = div_rounding_up(U256::from(1u8), U256::ZERO).unwrap_err();
        assert_eq!(err, EngineError::InsufficientLiquidity);
    }

    #[test]
    fn narrow_rejects_overflow() {
        let big = widen(U256::MAX) * widen(U256::from(2u8));
        assert!(narrow(big).is_err());
    }
}
