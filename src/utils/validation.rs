//! Price plausibility bounds.
//!
//! The oracle refuses to write values outside these bounds: extreme ratios
//! almost always come from decimal or inversion errors, not markets.

// ============================================
// Price Validation Constants
// ============================================

/// Maximum reasonable price ratio between two tokens (token1/token0).
/// 1e12 allows for extreme pairs while catching decimal errors.
pub const MAX_PRICE_RATIO: f64 = 1e12;

/// Minimum reasonable price ratio. Inverse of MAX_PRICE_RATIO.
pub const MIN_PRICE_RATIO: f64 = 1e-12;

/// Maximum reasonable token price in USD.
pub const MAX_TOKEN_USD_PRICE: f64 = 1e6;

/// Maximum reasonable TVL in USD for a single pool.
pub const MAX_TVL_USD: f64 = 1e11;

// ============================================
// Price Validation Helpers
// ============================================

/// Validate a price ratio (token1/token0) is within reasonable bounds.
/// Returns Some(price) if valid, None if invalid.
#[inline]
pub fn validate_price_ratio(price: f64) -> Option<f64> {
    if price > 0.0 && price.is_finite() && price >= MIN_PRICE_RATIO && price <= MAX_PRICE_RATIO {
        Some(price)
    } else {
        None
    }
}

/// Validate a USD price is within reasonable bounds.
/// Returns the price if valid, 0.0 if invalid.
#[inline]
pub fn validate_usd_price(price: f64) -> f64 {
    if price > 0.0 && price.is_finite() && price <= MAX_TOKEN_USD_PRICE {
        price
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_bounds() {
        assert_eq!(validate_price_ratio(2500.0), Some(2500.0));
        assert_eq!(validate_price_ratio(0.0), None);
        assert_eq!(validate_price_ratio(-1.0), None);
        assert_eq!(validate_price_ratio(f64::NAN), None);
        assert_eq!(validate_price_ratio(1e13), None);
    }

    #[test]
    fn usd_bounds() {
        assert_eq!(validate_usd_price(1.0), 1.0);
        assert_eq!(validate_usd_price(2e6), 0.0);
        assert_eq!(validate_usd_price(f64::INFINITY), 0.0);
    }
}
