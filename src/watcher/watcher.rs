//! One watcher unit: the execution context for a single chain.
//!
//! Owns the authoritative pool map, the subscription state machine and the
//! protocol adapters. Communicates with the rest of the process only
//! through the message bus; every handler runs to completion before the
//! next message is taken.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::abis::{v2, v3, v4};
use crate::bus::{BusMessage, MessageBus, Payload, Request, Response, WorkerMailbox};
use crate::config::PlatformConfig;
use crate::dex::{AdapterContext, AdapterRegistry};
use crate::errors::EngineError;
use crate::model::{dex_pool_id, TokenPairOnChain, VenueState};
use crate::rpc::ChainClient;
use crate::tokens::TokenRegistry;
use crate::watcher::{
    AppEvent, BlockOutcome, ChainSubscriber, HealthStatus, PipelineState,
};

use super::parser::parse_log;
use super::pools::PoolStateManager;

/// Interval between connection-health checks.
const HEALTH_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

pub struct Watcher {
    platform: PlatformConfig,
    worker_id: String,
    ctx: AdapterContext,
    registry: AdapterRegistry,
    manager: PoolStateManager,
    subscriber: ChainSubscriber,
    /// Union of monitored pool addresses; logs from anything else are
    /// dropped. V4 pools are recognised by the manager address.
    filter_addresses: HashSet<String>,
    v4_managers: HashSet<String>,
    bus: Arc<MessageBus>,
}

impl Watcher {
    /// Build the unit: provider connections, adapters, token registry.
    pub async fn connect(
        platform: PlatformConfig,
        cache_dir: &Path,
        bus: Arc<MessageBus>,
    ) -> Result<Self> {
        let client = ChainClient::connect(&platform, cache_dir).await?;
        let tokens = TokenRegistry::new(client.clone(), &platform);
        let registry = AdapterRegistry::from_platform(&platform)
            .map_err(|e| anyhow::anyhow!("adapter setup failed: {e}"))?;
        let ctx = AdapterContext { client, tokens };

        let v4_managers = platform
            .dexes
            .iter()
            .filter_map(|dex| match &dex.protocol {
                crate::config::DexProtocolConfig::V4 { pool_manager, .. } => {
                    Some(pool_manager.to_lowercase())
                }
                _ => None,
            })
            .collect();

        Ok(Self {
            worker_id: platform.name.clone(),
            manager: PoolStateManager::new(platform.chain_id),
            subscriber: ChainSubscriber::new(platform.chain_id),
            registry,
            ctx,
            filter_addresses: HashSet::new(),
            v4_managers,
            platform,
            bus,
        })
    }

    /// Resolve the configured watched pairs into ordered on-chain pairs.
    async fn watched_pairs(&self) -> Vec<TokenPairOnChain> {
        let mut pairs = Vec::new();
        for watched in &self.platform.watched_pairs {
            let Ok(a) = watched.token_a.parse() else {
                warn!("{}: bad watched pair address {}", self.worker_id, watched.token_a);
                continue;
            };
            let Ok(b) = watched.token_b.parse() else {
                warn!("{}: bad watched pair address {}", self.worker_id, watched.token_b);
                continue;
            };
            let token_a = match self.ctx.tokens.ensure_registered(a).await {
                Ok(token) => token,
                Err(e) => {
                    warn!("{}: cannot resolve watched token {a:#x}: {e}", self.worker_id);
                    continue;
                }
            };
            let token_b = match self.ctx.tokens.ensure_registered(b).await {
                Ok(token) => token,
                Err(e) => {
                    warn!("{}: cannot resolve watched token {b:#x}: {e}", self.worker_id);
                    continue;
                }
            };
            pairs.push(TokenPairOnChain::new(token_a, token_b));
        }
        pairs
    }

    fn rebuild_filter_addresses(&mut self) {
        self.filter_addresses =
            self.manager.monitored_addresses().into_iter().collect::<HashSet<_>>();
        self.filter_addresses.extend(self.v4_managers.iter().cloned());
    }

    fn log_filter(&self) -> Filter {
        let addresses: Vec<alloy::primitives::Address> = self
            .filter_addresses
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect();
        Filter::new().address(addresses).event_signature(vec![
            v2::Sync::SIGNATURE_HASH,
            v3::Swap::SIGNATURE_HASH,
            v3::Mint::SIGNATURE_HASH,
            v3::Burn::SIGNATURE_HASH,
            v4::Swap::SIGNATURE_HASH,
            v4::ModifyLiquidity::SIGNATURE_HASH,
        ])
    }

    /// Run the unit until cancelled, the stop request arrives, or the
    /// connection dies.
    pub async fn run(mut self, mut mailbox: WorkerMailbox, cancel: CancellationToken) -> Result<()> {
        info!("{}: watcher starting (chain {})", self.worker_id, self.platform.chain_id);

        // Per-kind channels; this unit forwards them onto the bus.
        let mut new_block_rx = self.subscriber.on_new_block();
        let mut batch_rx = self.subscriber.on_pool_events_batch();
        let mut app_rx = self.subscriber.on_app_event();

        let mut block_stream = self
            .ctx
            .client
            .ws_provider()
            .subscribe_blocks()
            .await
            .context("block subscription failed")?
            .into_stream();

        let pairs = self.watched_pairs().await;
        let discovered = self
            .manager
            .discover_and_register(&self.ctx, &self.registry, &pairs)
            .await;
        info!("{}: discovered {discovered} pool(s) for {} pair(s)", self.worker_id, pairs.len());
        self.manager.update_all(&self.ctx, &self.registry).await;

        self.rebuild_filter_addresses();
        let mut log_stream = self
            .ctx
            .client
            .ws_provider()
            .subscribe_logs(&self.log_filter())
            .await
            .context("log subscription failed")?
            .into_stream();

        self.subscriber.mark_initialized();
        // Ship the initial population to the aggregator.
        self.subscriber.flush(self.manager.drain_pending());

        let mut health_timer = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if self.subscriber.state() == PipelineState::Terminated {
                break;
            }
            let debounce = self.subscriber.debounce_deadline();

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("{}: cancellation received", self.worker_id);
                    self.subscriber.terminate();
                }

                message = mailbox.inbox.recv() => {
                    match message {
                        Some(BusMessage::Request(request)) => self.handle_request(request).await,
                        Some(BusMessage::Event(event)) => {
                            debug!("{}: ignoring inbound event {}", self.worker_id, event.name);
                        }
                        None => {
                            warn!("{}: mailbox closed", self.worker_id);
                            self.subscriber.terminate();
                        }
                    }
                }

                header = block_stream.next() => {
                    match header {
                        Some(header) => self.handle_block(header.number, header.base_fee_per_gas).await,
                        None => {
                            error!("{}: block stream ended", self.worker_id);
                            return Err(anyhow::anyhow!(EngineError::Rpc(String::from(
                                "block subscription closed",
                            ))));
                        }
                    }
                }

                log = log_stream.next() => {
                    match log {
                        Some(log) => self.handle_log(&log).await,
                        None => {
                            error!("{}: log stream ended", self.worker_id);
                            return Err(anyhow::anyhow!(EngineError::Rpc(String::from(
                                "log subscription closed",
                            ))));
                        }
                    }
                }

                _ = async { tokio::time::sleep_until(debounce.unwrap()).await }, if debounce.is_some() => {
                    self.subscriber.flush(self.manager.drain_pending());
                }

                _ = health_timer.tick() => {
                    if self.subscriber.health(tokio::time::Instant::now()) == HealthStatus::Dead {
                        error!(
                            "{}: no blocks for over {}s, exiting for respawn",
                            self.worker_id,
                            crate::watcher::DEAD_AFTER.as_secs()
                        );
                        std::process::exit(1);
                    }
                }

                Some(block) = new_block_rx.receiver.recv() => {
                    self.bus
                        .emit_event(&self.worker_id, "newBlock", json!(block))
                        .await;
                }

                Some(batch) = batch_rx.receiver.recv() => {
                    self.bus
                        .emit_event(
                            &self.worker_id,
                            "pool-update-batch",
                            json!({
                                "blockData": batch.block,
                                "events": batch.events,
                                "updatedPoolStates": batch.updated_pool_states,
                            }),
                        )
                        .await;
                }

                Some(app) = app_rx.receiver.recv() => {
                    let (name, data) = match app {
                        AppEvent::WorkerInitialized => ("worker-initialized", Value::Null),
                        AppEvent::ReorgDetected { block_number } => {
                            ("reorg-detected", json!({ "blockNumber": block_number }))
                        }
                        AppEvent::PoolStatesUpdated => ("pool-states-updated", Value::Null),
                        AppEvent::ConnectionDegraded => ("connection-degraded", Value::Null),
                    };
                    self.bus.emit_event(&self.worker_id, name, data).await;
                }
            }
        }

        info!("{}: watcher terminated", self.worker_id);
        Ok(())
    }

    async fn handle_block(&mut self, number: u64, base_fee_per_gas: Option<u64>) {
        let now = tokio::time::Instant::now();
        match self.subscriber.observe_block(number, base_fee_per_gas, Utc::now().timestamp_millis(), now)
        {
            BlockOutcome::InOrder(_) => {}
            BlockOutcome::Reorg(_) => self.recover().await,
        }
    }

    /// Reorg recovery: re-read the head, forget pre-reorg event ordering,
    /// refresh every pool over RPC, then resume listening.
    async fn recover(&mut self) {
        let latest = match self.ctx.client.ws_provider().get_block_number().await {
            Ok(number) => number,
            Err(e) => {
                warn!("{}: could not re-read head during recovery: {e}", self.worker_id);
                self.subscriber.current_block().map(|b| b.number).unwrap_or(0)
            }
        };
        self.manager.reset_event_ordering();
        self.manager.update_all(&self.ctx, &self.registry).await;
        self.subscriber.mark_recovered(latest, Utc::now().timestamp_millis());
        // Refreshed states go out as a batch immediately.
        self.subscriber.flush(self.manager.drain_pending());
    }

    async fn handle_log(&mut self, log: &alloy::rpc::types::Log) {
        if self.subscriber.paused() {
            return;
        }

        let emitter = format!("{:#x}", log.address());
        if !self.filter_addresses.contains(&emitter) {
            debug!("{}: dropping log from unmonitored address {emitter}", self.worker_id);
            return;
        }

        let received_at = self
            .subscriber
            .current_block()
            .map(|b| b.received_at)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let Some(event) = parse_log(self.platform.chain_id, log, received_at) else {
            debug!("{}: unparseable log from {emitter}", self.worker_id);
            return;
        };

        match self.manager.apply_event(&self.ctx, &self.registry, &event).await {
            Ok(outcome) => {
                if outcome == super::pools::ApplyOutcome::Added {
                    self.rebuild_filter_addresses();
                }
                let now = tokio::time::Instant::now();
                self.subscriber.buffer_event(event, now);
            }
            Err(EngineError::OutdatedEvent) => {
                // Expected under reorg; silent.
            }
            Err(e) => {
                warn!("{}: event for {} dropped: {e}", self.worker_id, event.pool_id);
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        let correlation_id = request.correlation_id;
        let outcome = match request.name.as_str() {
            "init" => Ok(json!({
                "chainId": self.platform.chain_id,
                "pools": self.manager.len(),
            })),
            "stop" => {
                self.subscriber.terminate();
                Ok(json!({ "stopped": true }))
            }
            "pause" => {
                self.subscriber.set_paused(true);
                Ok(json!({ "paused": true }))
            }
            "resume" => {
                self.subscriber.set_paused(false);
                Ok(json!({ "paused": false }))
            }
            "fetch-pool" => self.fetch_pool(&request.data),
            "fetch-all" => {
                let states: Vec<&VenueState> = self.manager.states().collect();
                serde_json::to_value(&states)
                    .map_err(|e| EngineError::Rpc(e.to_string()))
            }
            "add-pool" => self.add_pool(&request.data).await,
            "remove-pool" => self.remove_pool(&request.data),
            "update-config" => self.update_config(&request.data).await,
            other => Err(EngineError::Rpc(format!("unknown request {other}"))),
        };

        let response = match outcome {
            Ok(data) => Response { correlation_id, data: Some(data), error: None },
            Err(e) => Response { correlation_id, data: None, error: Some(e.to_wire()) },
        };
        self.bus.respond(&self.worker_id, response);
    }

    fn fetch_pool(&self, data: &Payload) -> Result<Value, EngineError> {
        let address = data
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Rpc(String::from("fetch-pool needs an address")))?;
        let pool_id = dex_pool_id(self.platform.chain_id, address);
        let state = self
            .manager
            .get(&pool_id)
            .ok_or_else(|| EngineError::UnknownPool(pool_id.clone()))?;
        serde_json::to_value(state).map_err(|e| EngineError::Rpc(e.to_string()))
    }

    /// Add a pair to the watch set and discover its pools on every venue.
    async fn add_pool(&mut self, data: &Payload) -> Result<Value, EngineError> {
        let (token_a, token_b) = pair_args(data)?;
        let a = self
            .ctx
            .tokens
            .ensure_registered(token_a)
            .await?;
        let b = self
            .ctx
            .tokens
            .ensure_registered(token_b)
            .await?;
        let pair = TokenPairOnChain::new(a, b);

        let added = self
            .manager
            .discover_and_register(&self.ctx, &self.registry, std::slice::from_ref(&pair))
            .await;
        self.manager.update_all(&self.ctx, &self.registry).await;
        self.rebuild_filter_addresses();
        self.subscriber.flush(self.manager.drain_pending());
        Ok(json!({ "added": added }))
    }

    fn remove_pool(&mut self, data: &Payload) -> Result<Value, EngineError> {
        let address = data
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Rpc(String::from("remove-pool needs an address")))?;
        let pool_id = dex_pool_id(self.platform.chain_id, address);
        let removed = self.manager.remove(&pool_id).is_some();
        if removed {
            self.rebuild_filter_addresses();
        }
        Ok(json!({ "removed": removed, "id": pool_id }))
    }

    /// Accept a new watched-pair list; newly named pairs are discovered.
    async fn update_config(&mut self, data: &Payload) -> Result<Value, EngineError> {
        let pairs_value = data
            .get("watchedPairs")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::Rpc(String::from("update-config needs watchedPairs")))?;

        let mut pairs = Vec::new();
        for entry in pairs_value {
            let (token_a, token_b) = pair_args(entry)?;
            let a = self.ctx.tokens.ensure_registered(token_a).await?;
            let b = self.ctx.tokens.ensure_registered(token_b).await?;
            pairs.push(TokenPairOnChain::new(a, b));
        }

        let added = self.manager.discover_and_register(&self.ctx, &self.registry, &pairs).await;
        if added > 0 {
            self.manager.update_all(&self.ctx, &self.registry).await;
            self.rebuild_filter_addresses();
            self.subscriber.flush(self.manager.drain_pending());
        }
        Ok(json!({ "added": added }))
    }
}

fn pair_args(data: &Payload) -> Result<(alloy::primitives::Address, alloy::primitives::Address), EngineError> {
    let token_a = data
        .get("tokenA")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Rpc(String::from("missing or invalid tokenA")))?;
    let token_b = data
        .get("tokenB")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Rpc(String::from("missing or invalid tokenB")))?;
    Ok((token_a, token_b))
}
