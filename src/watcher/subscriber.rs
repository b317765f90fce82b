//! Block and event subscription state (C5).
//!
//! Tracks the chain head, detects reorgs, buffers decoded events behind a
//! debounce window, and exposes one channel per event kind. The owning
//! watcher drives the actual WebSocket streams and calls back in; all
//! state transitions live here so they stay testable without a provider.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::model::{PoolEvent, VenueState};

/// Quiet period after the last event before a batch is emitted.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(50);

/// No block for this long marks the connection degraded.
pub const DEGRADED_AFTER: Duration = Duration::from_secs(30);

/// No block for this long means the connection is dead and the process
/// should exit for the host to respawn it.
pub const DEAD_AFTER: Duration = Duration::from_secs(60);

/// Watcher pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Listening,
    Recovering,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub number: u64,
    pub chain_id: u64,
    /// Unix millis at local receive time.
    pub received_at: i64,
    pub base_fee_per_gas: Option<u64>,
}

/// A debounced batch: the events since the last flush plus the states they
/// produced, in deterministic order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEventsBatch {
    pub block: Option<BlockInfo>,
    pub events: Vec<PoolEvent>,
    pub updated_pool_states: Vec<VenueState>,
}

/// Application-level notifications that are not blocks or batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AppEvent {
    WorkerInitialized,
    ReorgDetected { block_number: u64 },
    PoolStatesUpdated,
    ConnectionDegraded,
}

/// What a block notification did to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    InOrder(BlockInfo),
    /// Non-increasing block number: recovery required.
    Reorg(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Dead,
}

/// Receiving end of a per-event-kind channel; drop it or call
/// `unsubscribe` on the emitter with its id.
pub struct Subscription<T> {
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<T>,
}

/// Minimal per-kind fan-out with unsubscribe handles.
struct Emitter<T> {
    subscribers: Vec<(u64, mpsc::UnboundedSender<T>)>,
    next_id: u64,
}

impl<T: Clone> Emitter<T> {
    fn new() -> Self {
        Self { subscribers: Vec::new(), next_id: 0 }
    }

    fn subscribe(&mut self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, tx));
        Subscription { id, receiver: rx }
    }

    fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    fn emit(&mut self, value: &T) {
        // Closed receivers are pruned as a side effect of sending.
        self.subscribers.retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }
}

pub struct ChainSubscriber {
    chain_id: u64,
    state: PipelineState,
    current_block: Option<BlockInfo>,
    last_block_at: Option<Instant>,
    degraded: bool,
    paused: bool,
    buffer: Vec<PoolEvent>,
    debounce_deadline: Option<Instant>,
    new_block: Emitter<BlockInfo>,
    batches: Emitter<PoolEventsBatch>,
    app: Emitter<AppEvent>,
}

impl ChainSubscriber {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: PipelineState::Init,
            current_block: None,
            last_block_at: None,
            degraded: false,
            paused: false,
            buffer: Vec::new(),
            debounce_deadline: None,
            new_block: Emitter::new(),
            batches: Emitter::new(),
            app: Emitter::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn current_block(&self) -> Option<&BlockInfo> {
        self.current_block.as_ref()
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn on_new_block(&mut self) -> Subscription<BlockInfo> {
        self.new_block.subscribe()
    }

    pub fn unsubscribe_new_block(&mut self, id: u64) {
        self.new_block.unsubscribe(id);
    }

    pub fn on_pool_events_batch(&mut self) -> Subscription<PoolEventsBatch> {
        self.batches.subscribe()
    }

    pub fn unsubscribe_pool_events_batch(&mut self, id: u64) {
        self.batches.unsubscribe(id);
    }

    pub fn on_app_event(&mut self) -> Subscription<AppEvent> {
        self.app.subscribe()
    }

    pub fn unsubscribe_app_event(&mut self, id: u64) {
        self.app.unsubscribe(id);
    }

    /// `init()` succeeded: streams are up and discovery has run.
    pub fn mark_initialized(&mut self) {
        self.state = PipelineState::Listening;
        self.app.emit(&AppEvent::WorkerInitialized);
    }

    /// Feed a block notification. In-order blocks advance the head and
    /// fan out; a non-increasing number purges the buffer and moves the
    /// pipeline into recovery.
    pub fn observe_block(
        &mut self,
        number: u64,
        base_fee_per_gas: Option<u64>,
        received_at: i64,
        now: Instant,
    ) -> BlockOutcome {
        self.last_block_at = Some(now);
        if self.degraded {
            info!("Chain {}: block {} arrived, connection no longer degraded", self.chain_id, number);
            self.degraded = false;
        }

        if let Some(current) = &self.current_block {
            if number <= current.number {
                warn!(
                    "Chain {}: reorg detected, block {} after {}",
                    self.chain_id, number, current.number
                );
                self.buffer.clear();
                self.debounce_deadline = None;
                self.state = PipelineState::Recovering;
                self.app.emit(&AppEvent::ReorgDetected { block_number: number });
                return BlockOutcome::Reorg(number);
            }
        }

        let info = BlockInfo {
            number,
            chain_id: self.chain_id,
            received_at,
            base_fee_per_gas,
        };
        self.current_block = Some(info.clone());
        self.new_block.emit(&info);
        BlockOutcome::InOrder(info)
    }

    /// Recovery finished: the head was re-read and every pool refreshed.
    pub fn mark_recovered(&mut self, latest_block: u64, received_at: i64) {
        self.current_block = Some(BlockInfo {
            number: latest_block,
            chain_id: self.chain_id,
            received_at,
            base_fee_per_gas: None,
        });
        self.state = PipelineState::Listening;
        self.app.emit(&AppEvent::PoolStatesUpdated);
    }

    /// Append an applied event and (re)arm the debounce timer.
    pub fn buffer_event(&mut self, event: PoolEvent, now: Instant) {
        self.buffer.push(event);
        self.debounce_deadline = Some(now + DEBOUNCE_INTERVAL);
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce_deadline
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Debounce fired: emit the batch if anything changed. A batch with
    /// states but no events carries discovery or refresh results.
    pub fn flush(&mut self, updated_pool_states: Vec<VenueState>) -> Option<PoolEventsBatch> {
        self.debounce_deadline = None;
        if self.buffer.is_empty() && updated_pool_states.is_empty() {
            return None;
        }
        let batch = PoolEventsBatch {
            block: self.current_block.clone(),
            events: std::mem::take(&mut self.buffer),
            updated_pool_states,
        };
        self.batches.emit(&batch);
        Some(batch)
    }

    /// Periodic connection check against the last block arrival.
    pub fn health(&mut self, now: Instant) -> HealthStatus {
        let Some(last) = self.last_block_at else {
            return HealthStatus::Healthy;
        };
        let silence = now.saturating_duration_since(last);
        if silence > DEAD_AFTER {
            return HealthStatus::Dead;
        }
        if silence > DEGRADED_AFTER {
            if !self.degraded {
                warn!(
                    "Chain {}: no blocks for {}s, marking connection degraded",
                    self.chain_id,
                    silence.as_secs()
                );
                self.degraded = true;
                self.app.emit(&AppEvent::ConnectionDegraded);
            }
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }

    pub fn terminate(&mut self) {
        self.state = PipelineState::Terminated;
    }
}
