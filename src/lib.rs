pub mod abis;
pub mod aggregator;
pub mod bus;
pub mod config;
pub mod dex;
pub mod errors;
pub mod math;
pub mod model;
pub mod rpc;
pub mod tokens;
pub mod utils;
pub mod watcher;

pub use aggregator::{AggregatorStore, AggregatorUnit, PriceOracle};
pub use bus::MessageBus;
pub use config::Settings;
pub use errors::EngineError;
pub use tokens::TokenRegistry;
pub use watcher::{Watcher, WatcherSupervisor};
