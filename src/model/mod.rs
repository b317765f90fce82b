pub mod event;
pub mod pair;
pub mod state;
pub mod token;
pub mod venue;

pub use event::{PoolEvent, PoolEventKind};
pub use pair::{canonical_pair_id, TokenPairOnChain};
pub use state::{
    cex_market_id, dex_pool_id, CexMarketState, DexV2PoolState, DexV3PoolState, DexV4PoolState,
    EventMetadata, VenueState,
};
pub use token::Token;
pub use venue::{VenueId, VenueName};
