//! Multi-tick swap simulation.
//!
//! Walks the sorted tick sequence in the travel direction, consuming input
//! one tick range at a time. The fee is charged per step in parts per
//! million, matching the V3 convention (the V2 adapter keeps its own
//! parts-per-10000 convention and never calls into this module).

use alloy::primitives::U256;

use super::full_math::{mul_div, mul_div_rounding_up, MAX_SQRT_RATIO, MIN_SQRT_RATIO};
use super::sqrt_price::{
    get_amount0_delta, get_amount1_delta, get_next_sqrt_price_from_amount0_rounding_up,
    get_next_sqrt_price_from_amount1_rounding_down,
};
use super::tick::sqrt_ratio_at_tick;
use crate::errors::EngineError;

/// Hard bound on tick-crossing iterations for a single simulation.
pub const MAX_SWAP_ITERATIONS: usize = 500;

const FEE_DENOMINATOR: u64 = 1_000_000;

/// One initialised tick: the signed liquidity change when crossing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TickEntry {
    pub tick: i32,
    pub liquidity_net: i128,
}

/// Outcome of a single-tick step toward a target price.
struct StepOutcome {
    next_sqrt_price: U256,
    consumed: U256,
    produced: U256,
}

/// Simulate swapping `amount_in` through a concentrated-liquidity pool.
///
/// `ticks` must be strictly sorted ascending by tick. Returns the output
/// amount; the caller's pool state is untouched. Falls back to a
/// single-step estimate with the starting liquidity when no tick data is
/// loaded.
pub fn simulate_multi_tick_swap(
    sqrt_price_x96: U256,
    liquidity: u128,
    tick: i32,
    ticks: &[TickEntry],
    fee_ppm: u32,
    amount_in: U256,
    zero_for_one: bool,
) -> Result<U256, EngineError> {
    if amount_in.is_zero() {
        return Err(EngineError::InvalidAmount);
    }
    if fee_ppm as u64 >= FEE_DENOMINATOR {
        return Err(EngineError::InvalidAmount);
    }

    if ticks.is_empty() {
        let after_fee = take_fee(amount_in, fee_ppm)?;
        let step = swap_step(
            sqrt_price_x96,
            limit_price(zero_for_one),
            liquidity,
            after_fee,
            zero_for_one,
        )?;
        return Ok(step.produced);
    }

    let mut sqrt_price = sqrt_price_x96;
    let mut active_liquidity = liquidity;
    let mut current_tick = tick;
    let mut remaining = amount_in;
    let mut amount_out = U256::ZERO;

    for _ in 0..MAX_SWAP_ITERATIONS {
        if remaining.is_zero() || active_liquidity == 0 {
            break;
        }

        let crossing = next_initialized_tick(ticks, current_tick, zero_for_one);
        let target = match crossing {
            Some(entry) => sqrt_ratio_at_tick(entry.tick),
            None => limit_price(zero_for_one),
        }
        .clamp(MIN_SQRT_RATIO + U256::from(1u8), MAX_SQRT_RATIO - U256::from(1u8));

        let after_fee = take_fee(remaining, fee_ppm)?;
        if after_fee.is_zero() {
            break;
        }

        let step = swap_step(sqrt_price, target, active_liquidity, after_fee, zero_for_one)?;

        // Deduct the consumed input plus its proportional fee.
        let gross =
            mul_div_rounding_up(step.consumed, U256::from(FEE_DENOMINATOR), U256::from(FEE_DENOMINATOR - fee_ppm as u64))?;
        remaining = remaining.saturating_sub(gross);
        amount_out += step.produced;
        sqrt_price = step.next_sqrt_price;

        match crossing {
            Some(entry) if step.next_sqrt_price == target => {
                // Tick boundary reached: cross it and flip the net liquidity.
                let signed = if zero_for_one {
                    entry.liquidity_net.checked_neg().unwrap_or(i128::MAX)
                } else {
                    entry.liquidity_net
                };
                if signed < 0 {
                    let decrease = signed.unsigned_abs();
                    if active_liquidity <= decrease {
                        break;
                    }
                    active_liquidity -= decrease;
                } else {
                    active_liquidity = active_liquidity.saturating_add(signed as u128);
                }
                current_tick = if zero_for_one { entry.tick - 1 } else { entry.tick };
            }
            _ => break, // partial fill within the tick range
        }
    }

    Ok(amount_out)
}

/// Input remaining after the per-step fee: `remaining · (1e6 − fee) / 1e6`.
fn take_fee(amount: U256, fee_ppm: u32) -> Result<U256, EngineError> {
    mul_div(
        amount,
        U256::from(FEE_DENOMINATOR - fee_ppm as u64),
        U256::from(FEE_DENOMINATOR),
    )
}

fn limit_price(zero_for_one: bool) -> U256 {
    if zero_for_one {
        MIN_SQRT_RATIO + U256::from(1u8)
    } else {
        MAX_SQRT_RATIO - U256::from(1u8)
    }
}

/// The next initialised tick in the travel direction: `≤ current` when
/// moving down (zeroForOne), strictly `> current` when moving up.
fn next_initialized_tick(ticks: &[TickEntry], current: i32, zero_for_one: bool) -> Option<&TickEntry> {
    if zero_for_one {
        ticks.iter().rev().find(|entry| entry.tick <= current)
    } else {
        ticks.iter().find(|entry| entry.tick > current)
    }
}

/// A single step within one tick range toward `target`.
fn swap_step(
    sqrt_price: U256,
    target: U256,
    liquidity: u128,
    amount_after_fee: U256,
    zero_for_one: bool,
) -> Result<StepOutcome, EngineError> {
    if zero_for_one {
        let max_in = get_amount0_delta(target, sqrt_price, liquidity, true)?;
        let (next, consumed) = if amount_after_fee >= max_in {
            (target, max_in)
        } else {
            let next = get_next_sqrt_price_from_amount0_rounding_up(
                sqrt_price,
                liquidity,
                amount_after_fee,
                true,
            )?;
            (next, amount_after_fee)
        };
        let produced = get_amount1_delta(next, sqrt_price, liquidity, false)?;
        Ok(StepOutcome { next_sqrt_price: next, consumed, produced })
    } else {
        let max_in = get_amount1_delta(sqrt_price, target, liquidity, true)?;
        let (next, consumed) = if amount_after_fee >= max_in {
            (target, max_in)
        } else {
            let next = get_next_sqrt_price_from_amount1_rounding_down(
                sqrt_price,
                liquidity,
                amount_after_fee,
                true,
            )?;
            (next, amount_after_fee)
        };
        let produced = get_amount0_delta(sqrt_price, next, liquidity, false)?;
        Ok(StepOutcome { next_sqrt_price: next, consumed, produced })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Q96;

    const LIQ: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn zero_input_is_invalid_amount() {
        let err = simulate_multi_tick_swap(Q96, LIQ, 0, &[], 3000, U256::ZERO, true).unwrap_err();
        assert_eq!(err, EngineError::InvalidAmount);
    }

    #[test]
    fn empty_ticks_single_step_estimate() {
        // Price 1, 0.3% fee, small input: output just below in * 0.997.
        let amount_in = U256::from(10u128.pow(15));
        let out = simulate_multi_tick_swap(Q96, LIQ, 0, &[], 3000, amount_in, true).unwrap();
        let fee_only = U256::from(997_000_000_000_000u128);
        assert!(out > U256::ZERO);
        assert!(out < amount_in);
        assert!(out <= fee_only);
        // Within 0.2% of the fee-adjusted input at this impact level.
        assert!(out > fee_only - fee_only / U256::from(500u64));
    }

    #[test]
    fn swap_is_symmetric_at_unity_price() {
        let amount_in = U256::from(10u128.pow(15));
        let out0 = simulate_multi_tick_swap(Q96, LIQ, 0, &[], 3000, amount_in, true).unwrap();
        let out1 = simulate_multi_tick_swap(Q96, LIQ, 0, &[], 3000, amount_in, false).unwrap();
        let diff = if out0 > out1 { out0 - out1 } else { out1 - out0 };
        assert!(diff < out0 / U256::from(100u64));
    }

    #[test]
    fn crossing_a_tick_reduces_liquidity_and_output() {
        // A negative-net tick just below the current price drains liquidity
        // when crossed downward, so the same input yields less output than a
        // pool with no tick data and constant liquidity.
        let ticks = vec![TickEntry { tick: -60, liquidity_net: (LIQ / 2) as i128 }];
        let amount_in = U256::from(10u128.pow(19));
        let out_with_ticks =
            simulate_multi_tick_swap(Q96, LIQ, 0, &ticks, 3000, amount_in, true).unwrap();
        let out_flat = simulate_multi_tick_swap(Q96, LIQ, 0, &[], 3000, amount_in, true).unwrap();
        assert!(out_with_ticks > U256::ZERO);
        assert!(out_with_ticks < out_flat);
    }

    #[test]
    fn drained_liquidity_stops_the_walk() {
        // Crossing this tick downward removes all liquidity; the loop must
        // stop rather than divide by zero.
        let ticks = vec![TickEntry { tick: -10, liquidity_net: LIQ as i128 }];
        let amount_in = U256::from(10u128.pow(21));
        let out = simulate_multi_tick_swap(Q96, LIQ, 0, &ticks, 3000, amount_in, true).unwrap();
        assert!(out > U256::ZERO);
    }

    #[test]
    fn terminates_within_iteration_bound() {
        // A dense ladder of ticks cannot loop more than MAX_SWAP_ITERATIONS.
        let ticks: Vec<TickEntry> = (1..=2000)
            .map(|i| TickEntry { tick: i * 10, liquidity_net: 1_000_000 })
            .collect();
        let amount_in = U256::from(10u128.pow(30));
        let out =
            simulate_multi_tick_swap(Q96, LIQ, 0, &ticks, 3000, amount_in, false).unwrap();
        assert!(out > U256::ZERO);
    }

    #[test]
    fn higher_fee_never_pays_more() {
        let amount_in = U256::from(10u128.pow(16));
        let cheap = simulate_multi_tick_swap(Q96, LIQ, 0, &[], 500, amount_in, true).unwrap();
        let dear = simulate_multi_tick_swap(Q96, LIQ, 0, &[], 10000, amount_in, true).unwrap();
        assert!(dear < cheap);
    }
}
