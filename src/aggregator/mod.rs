//! Aggregator unit: the multi-index venue store and the USD price oracle
//! fed by its change stream.

mod oracle;
mod store;
mod unit;

pub use oracle::PriceOracle;
pub use store::{AggregatorStore, ChangeKind, ListenerId, StoreStats, VenueChange};
pub use unit::AggregatorUnit;
