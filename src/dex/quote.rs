use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::utils::{serde_u256_decimal, u256_to_f64};

/// An executable-quality quote for a single-pool swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeQuote {
    #[serde(with = "serde_u256_decimal")]
    pub amount_in: U256,
    #[serde(with = "serde_u256_decimal")]
    pub amount_out: U256,
    /// Realised price of the trade, decimal adjusted (out per in).
    pub execution_price: f64,
    /// Spot price in the trade direction before the swap.
    pub spot_price: f64,
    /// How far the execution price sits below spot, in percent.
    pub price_impact_pct: f64,
    /// Slippage allowance a caller should budget, in basis points.
    pub slippage_bps: u32,
    pub fee_percent: f64,
    /// 1.0 for exact local/quoter math, lower when accuracy is degraded
    /// (e.g. hooked V4 pools).
    pub confidence: f64,
}

impl TradeQuote {
    /// Assemble a quote from raw amounts and the directional spot price.
    pub fn build(
        amount_in: U256,
        amount_out: U256,
        decimals_in: u8,
        decimals_out: u8,
        spot_price: f64,
        fee_percent: f64,
        confidence: f64,
    ) -> Self {
        let in_adj = u256_to_f64(amount_in, decimals_in);
        let out_adj = u256_to_f64(amount_out, decimals_out);
        let execution_price = if in_adj > 0.0 { out_adj / in_adj } else { 0.0 };

        let price_impact_pct = if spot_price > 0.0 && execution_price > 0.0 {
            ((spot_price - execution_price) / spot_price * 100.0).max(0.0)
        } else {
            0.0
        };
        // Impact is the floor for sensible slippage budgeting.
        let slippage_bps = (price_impact_pct * 100.0).ceil().min(u32::MAX as f64) as u32;

        Self {
            amount_in,
            amount_out,
            execution_price,
            spot_price,
            price_impact_pct,
            slippage_bps,
            fee_percent,
            confidence,
        }
    }
}
