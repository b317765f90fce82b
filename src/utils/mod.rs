//! Utility functions shared across the engine.
//!
//! - [`conversion`] - type conversions (U256, f64, hex encoding)
//! - [`pool_id`] - Uniswap V4 pool key computation
//! - [`serde_bigint`] - decimal-string serde for arbitrary-precision integers
//! - [`validation`] - price plausibility bounds used by the oracle

mod conversion;
mod pool_id;
mod serde_bigint;
mod validation;

// ============================================
// Common Constants
// ============================================

/// The Ethereum zero address (0x0000000000000000000000000000000000000000)
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ============================================
// Re-exports
// ============================================

pub use conversion::{hex_encode, u256_to_f64};

pub use pool_id::compute_v4_pool_key;

pub use serde_bigint::{serde_u128_decimal, serde_u256_decimal};

pub use validation::{validate_price_ratio, validate_usd_price, MAX_TVL_USD};
