//! Fixed-point AMM math for concentrated-liquidity pools.
//!
//! Pure functions over `U256` with 512-bit intermediates. Rounding follows
//! the Uniswap V3 reference discipline: inputs consumed round up, outputs
//! produced round down. Nothing in this module performs I/O.

mod full_math;
mod sqrt_price;
mod swap;
mod tick;

pub use full_math::{
    div_rounding_up, mul_div, mul_div_rounding_up, MAX_SQRT_RATIO, MIN_SQRT_RATIO, Q96,
};
pub use sqrt_price::{
    get_amount0_delta, get_amount1_delta, get_next_sqrt_price_from_amount0_rounding_up,
    get_next_sqrt_price_from_amount1_rounding_down, sqrt_price_x96_to_price, virtual_reserves,
};
pub use swap::{simulate_multi_tick_swap, TickEntry, MAX_SWAP_ITERATIONS};
pub use tick::{sqrt_ratio_at_tick, tick_to_sqrt_price_x96_f64};
