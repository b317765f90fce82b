//! Type conversion and formatting utilities.
//!
//! Conversions between U256 and f64 go through BigDecimal so values larger
//! than 2^53 keep their leading precision.

use alloy::primitives::{hex, U256};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;

// ============================================
// Hex Encoding
// ============================================

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ============================================
// U256 Conversions
// ============================================

/// Convert U256 to f64 with decimal adjustment.
///
/// Returns 0.0 if the conversion fails or produces a non-finite value.
pub fn u256_to_f64(value: U256, decimals: u8) -> f64 {
    u256_to_f64_safe(value, decimals).unwrap_or(0.0)
}

/// Convert U256 to f64 with decimal adjustment, `None` on failure.
fn u256_to_f64_safe(value: U256, decimals: u8) -> Option<f64> {
    // Convert U256 to BigDecimal via bytes (faster than string parsing)
    let bytes: [u8; 32] = value.to_le_bytes();
    let big_int = BigInt::from_bytes_le(num_bigint::Sign::Plus, &bytes);
    let big_value = BigDecimal::from(big_int);

    let adjusted = big_value / big_pow10(decimals);

    let result = adjusted.to_f64()?;
    if result.is_finite() {
        Some(result)
    } else {
        None
    }
}

// ============================================
// Internal Helpers
// ============================================

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_to_f64_adjusts_decimals() {
        let one_ether = U256::from(10u128.pow(18));
        assert!((u256_to_f64(one_ether, 18) - 1.0).abs() < 1e-12);
        assert!((u256_to_f64(one_ether, 0) - 1e18).abs() / 1e18 < 1e-12);
    }

    #[test]
    fn large_values_keep_leading_precision() {
        // 2^112 - 1 exceeds f64's exact-integer range but the leading
        // digits must survive the conversion.
        let max_reserve = (U256::from(1u8) << 112) - U256::from(1u8);
        let approx = u256_to_f64(max_reserve, 0);
        assert!((approx - 5.192296858534828e33).abs() / 5.19e33 < 1e-9);
    }
}
