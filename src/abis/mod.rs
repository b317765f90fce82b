pub mod erc20;
pub mod multicall;
pub mod v2;
pub mod v3;
pub mod v4;

pub use erc20::IERC20;
pub use multicall::{Call3, IMulticall3, McResult};
pub use v2::{IUniswapV2Factory, IUniswapV2Pair, Sync};
pub use v3::{
    Burn as V3Burn, IQuoter, IUniswapV3Factory, IUniswapV3Pool, Mint as V3Mint, Swap as V3Swap,
};
pub use v4::{IStateView, IV4Quoter, ModifyLiquidity, PoolKey, Swap as V4Swap};
