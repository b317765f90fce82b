use serde::{Deserialize, Serialize};

use super::token::Token;

/// Grouping key for venues offering the same logical market: the two
/// symbols sorted alphabetically and joined with `":"`. Never used for
/// trading-path math.
pub fn canonical_pair_id(symbol_a: &str, symbol_b: &str) -> String {
    if symbol_a <= symbol_b {
        format!("{symbol_a}:{symbol_b}")
    } else {
        format!("{symbol_b}:{symbol_a}")
    }
}

/// An ordered on-chain token pair.
///
/// `token0.address < token1.address` byte-lexicographically, the order the
/// AMM contracts themselves use. This order must never be flipped; price
/// directions everywhere in the engine are expressed against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPairOnChain {
    pub token0: Token,
    pub token1: Token,
}

impl TokenPairOnChain {
    /// Build the pair in on-chain order regardless of argument order.
    pub fn new(a: Token, b: Token) -> Self {
        if a.address < b.address {
            Self { token0: a, token1: b }
        } else {
            Self { token0: b, token1: a }
        }
    }

    /// Advisory display key `"sym0-sym1"` in on-chain order.
    pub fn symbol_key(&self) -> String {
        format!("{}-{}", self.token0.symbol, self.token1.symbol)
    }

    /// Sorted address pair key used by the aggregator index.
    pub fn address_key(&self) -> String {
        format!("{}:{}", self.token0.address, self.token1.address)
    }

    pub fn pair_id(&self) -> String {
        canonical_pair_id(&self.token0.symbol, &self.token1.symbol)
    }
}
