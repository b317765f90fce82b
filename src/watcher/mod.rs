//! Per-chain watcher pipeline: log parsing, pool-state management, block
//! and event subscription, the watcher unit itself and its supervisor.

mod parser;
mod pools;
mod subscriber;
mod supervisor;
mod watcher;

pub use parser::parse_log;
pub use pools::{ApplyOutcome, PoolStateManager};
pub use subscriber::{
    AppEvent, BlockInfo, BlockOutcome, ChainSubscriber, HealthStatus, PipelineState,
    PoolEventsBatch, Subscription, DEAD_AFTER, DEBOUNCE_INTERVAL, DEGRADED_AFTER,
};
pub use supervisor::WatcherSupervisor;
pub use watcher::Watcher;
