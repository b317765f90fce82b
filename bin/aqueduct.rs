use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

use aqueduct::aggregator::AggregatorUnit;
use aqueduct::bus::MessageBus;
use aqueduct::config::Settings;
use aqueduct::watcher::WatcherSupervisor;

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .context("logger init failed")?;

    let settings = Settings::new().context("failed to load configuration")?;
    let enabled: Vec<String> =
        settings.enabled_platforms().map(|p| p.name.clone()).collect();
    info!("Starting aqueduct with {} platform(s): {}", enabled.len(), enabled.join(", "));

    let (bus, events_rx) =
        MessageBus::new(Duration::from_millis(settings.request_timeout_ms));

    // Stable-coin anchors across every enabled platform seed the oracle.
    let anchors: Vec<(u64, String)> = settings
        .enabled_platforms()
        .flat_map(|p| p.stablecoins.iter().map(|s| (p.chain_id, s.clone())))
        .collect();

    let cancel = CancellationToken::new();
    let aggregator = AggregatorUnit::new(events_rx, anchors);
    let aggregator_cancel = cancel.clone();
    let aggregator_task = tokio::spawn(async move { aggregator.run(aggregator_cancel).await });

    let mut supervisor =
        WatcherSupervisor::new(bus, PathBuf::from(&settings.cache_dir));
    for platform in settings.enabled_platforms() {
        if let Err(e) = supervisor.start_platform(platform.clone()).await {
            error!("Failed to start platform {}: {e:#}", platform.name);
        }
    }
    if supervisor.running_count() == 0 {
        anyhow::bail!("no platform could be started");
    }
    info!("{} watcher(s) running", supervisor.running_count());

    tokio::signal::ctrl_c().await.context("signal handler failed")?;
    info!("Shutdown signal received");

    supervisor.stop_all().await;
    cancel.cancel();
    match aggregator_task.await {
        Ok((store, _oracle)) => {
            let stats = store.stats();
            info!("Final state: {} venue(s), {} disabled", stats.total, stats.disabled);
        }
        Err(e) => error!("Aggregator task failed: {e}"),
    }

    info!("Shutdown complete");
    Ok(())
}
