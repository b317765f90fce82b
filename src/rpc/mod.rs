//! Chain access: provider handles, request pacing and the static call cache.

mod client;
mod rate_limit;
mod static_cache;

pub use client::ChainClient;
pub use rate_limit::RateLimiter;
pub use static_cache::{cache_key, decode_bigint, encode_bigint, is_cacheable_method, StaticCache};
