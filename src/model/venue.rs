use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of venue names addressable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VenueName {
    UniswapV2,
    UniswapV3,
    UniswapV4,
    Sushiswap,
    SushiswapV3,
    Pancakeswap,
    Quickswap,
    Binance,
    Coinbase,
}

impl VenueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueName::UniswapV2 => "uniswap-v2",
            VenueName::UniswapV3 => "uniswap-v3",
            VenueName::UniswapV4 => "uniswap-v4",
            VenueName::Sushiswap => "sushiswap",
            VenueName::SushiswapV3 => "sushiswap-v3",
            VenueName::Pancakeswap => "pancakeswap",
            VenueName::Quickswap => "quickswap",
            VenueName::Binance => "binance",
            VenueName::Coinbase => "coinbase",
        }
    }
}

impl fmt::Display for VenueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A place where a pair trades: a DEX pinned to a chain, or a CEX.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum VenueId {
    Dex { name: VenueName, chain_id: u64 },
    Cex { name: VenueName },
}

impl VenueId {
    pub fn name(&self) -> VenueName {
        match self {
            VenueId::Dex { name, .. } => *name,
            VenueId::Cex { name } => *name,
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            VenueId::Dex { chain_id, .. } => Some(*chain_id),
            VenueId::Cex { .. } => None,
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueId::Dex { name, chain_id } => write!(f, "{name}@{chain_id}"),
            VenueId::Cex { name } => write!(f, "{name}"),
        }
    }
}
