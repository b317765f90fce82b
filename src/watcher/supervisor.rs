//! Watcher lifecycle management.
//!
//! Spawns one watcher task per enabled platform. Shutdown is staged: fail
//! the worker's pending requests, ask for a graceful stop, then cancel
//! the task and sweep whatever is left.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::config::PlatformConfig;
use crate::errors::EngineError;

use super::watcher::Watcher;

/// How long a worker gets to acknowledge a graceful stop.
const STOP_ACK_TIMEOUT: Duration = Duration::from_millis(2_000);

/// How long a cancelled task gets to wind down before being abandoned.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningWatcher {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct WatcherSupervisor {
    bus: Arc<MessageBus>,
    cache_dir: PathBuf,
    running: HashMap<String, RunningWatcher>,
}

impl WatcherSupervisor {
    pub fn new(bus: Arc<MessageBus>, cache_dir: PathBuf) -> Self {
        Self { bus, cache_dir, running: HashMap::new() }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Connect and spawn the watcher for one platform.
    pub async fn start_platform(&mut self, platform: PlatformConfig) -> Result<()> {
        let name = platform.name.clone();
        if self.running.contains_key(&name) {
            warn!("Watcher {name} is already running, skipping");
            return Ok(());
        }

        let mailbox = self.bus.register_worker(&name);
        let watcher = Watcher::connect(platform, &self.cache_dir, Arc::clone(&self.bus))
            .await
            .with_context(|| format!("failed to initialize watcher {name}"))?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_bus = Arc::clone(&self.bus);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = watcher.run(mailbox, task_cancel).await {
                error!("Watcher {task_name} failed: {e:#}");
            }
            // Whatever is still pending cannot complete now.
            task_bus.sweep_worker(&task_name, EngineError::WorkerFailed(task_name.clone()));
        });

        self.running.insert(name.clone(), RunningWatcher { handle, cancel });
        info!("Watcher {name} started");
        Ok(())
    }

    /// Stop one watcher: fail its pending requests with `WorkerTerminated`,
    /// await a short graceful acknowledgement, then cancel and sweep.
    pub async fn stop_platform(&mut self, name: &str) {
        let Some(running) = self.running.remove(name) else {
            warn!("Attempted to stop watcher {name} but it was not running");
            return;
        };
        info!("Stopping watcher {name}");

        self.bus.fail_pending(name, EngineError::WorkerTerminated);

        let ack = self
            .bus
            .send_request_with_timeout(name, "stop", Value::Null, STOP_ACK_TIMEOUT)
            .await;
        match ack.wait().await {
            Ok(_) => info!("Watcher {name} acknowledged stop"),
            Err(e) => warn!("Watcher {name} did not acknowledge stop: {e}"),
        }

        running.cancel.cancel();
        match tokio::time::timeout(JOIN_TIMEOUT, running.handle).await {
            Ok(_) => info!("Watcher {name} stopped"),
            Err(_) => warn!("Watcher {name} did not stop within timeout, abandoning"),
        }

        self.bus.sweep_worker(name, EngineError::WorkerTerminated);
    }

    /// Cascade shutdown of every running watcher.
    pub async fn stop_all(&mut self) {
        let names: Vec<String> = self.running.keys().cloned().collect();
        for name in names {
            self.stop_platform(&name).await;
        }
        info!("All watchers stopped");
    }
}
