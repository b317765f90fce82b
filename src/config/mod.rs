mod config;

pub use config::{
    ArbitrageThresholds, DexConfig, DexProtocolConfig, PlatformConfig, RateLimitSettings,
    Settings, TokenSeed, WatchedPair,
};
