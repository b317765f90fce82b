//! In-process message bus with correlated request/response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};

use super::messages::{BusEvent, BusMessage, Payload, Request, Response};
use crate::errors::EngineError;

/// Default deadline for a bus request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Mailbox capacity per worker. Control-plane traffic is low volume; a
/// full mailbox back-pressures the sender.
const MAILBOX_CAPACITY: usize = 64;

/// Event stream capacity from all workers toward the aggregator.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

type PendingSender = oneshot::Sender<Result<Payload, EngineError>>;

/// Pending entries are keyed worker-first so a dead worker is swept in one
/// map removal, O(its own pending).
type PendingMap = FxHashMap<String, FxHashMap<u64, PendingSender>>;

pub struct MessageBus {
    workers: Mutex<FxHashMap<String, mpsc::Sender<BusMessage>>>,
    pending: Arc<Mutex<PendingMap>>,
    next_correlation: AtomicU64,
    default_timeout: Duration,
    events_tx: mpsc::Sender<(String, BusEvent)>,
}

/// Receiving side handed to a spawned worker.
pub struct WorkerMailbox {
    pub worker_id: String,
    pub inbox: mpsc::Receiver<BusMessage>,
}

impl MessageBus {
    /// Create the bus plus the aggregator-side event stream.
    pub fn new(default_timeout: Duration) -> (Arc<Self>, mpsc::Receiver<(String, BusEvent)>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let bus = Arc::new(Self {
            workers: Mutex::new(FxHashMap::default()),
            pending: Arc::new(Mutex::new(PendingMap::default())),
            next_correlation: AtomicU64::new(1),
            default_timeout,
            events_tx,
        });
        (bus, events_rx)
    }

    /// Register an execution unit and hand back its mailbox.
    pub fn register_worker(&self, worker_id: &str) -> WorkerMailbox {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        if let Ok(mut workers) = self.workers.lock() {
            workers.insert(worker_id.to_string(), tx);
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.entry(worker_id.to_string()).or_default();
        }
        WorkerMailbox { worker_id: worker_id.to_string(), inbox: rx }
    }

    /// Post a request and return its completion handle.
    pub async fn send_request(
        &self,
        worker_id: &str,
        name: &str,
        data: Payload,
    ) -> RequestHandle {
        self.send_request_with_timeout(worker_id, name, data, self.default_timeout).await
    }

    pub async fn send_request_with_timeout(
        &self,
        worker_id: &str,
        name: &str,
        data: Payload,
        timeout: Duration,
    ) -> RequestHandle {
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if let Ok(mut pending) = self.pending.lock() {
            pending.entry(worker_id.to_string()).or_default().insert(correlation_id, tx);
        }

        let handle = RequestHandle {
            correlation_id,
            worker_id: worker_id.to_string(),
            receiver: rx,
            pending: Arc::clone(&self.pending),
            timeout,
        };

        let sender = self
            .workers
            .lock()
            .ok()
            .and_then(|workers| workers.get(worker_id).cloned());
        let request =
            Request { correlation_id, name: name.to_string(), data };

        match sender {
            Some(sender) => {
                if sender.send(BusMessage::Request(request)).await.is_err() {
                    self.complete_entry(
                        worker_id,
                        correlation_id,
                        Err(EngineError::WorkerFailed(worker_id.to_string())),
                    );
                }
            }
            None => {
                self.complete_entry(
                    worker_id,
                    correlation_id,
                    Err(EngineError::WorkerFailed(worker_id.to_string())),
                );
            }
        }

        handle
    }

    /// Deliver a worker's response to the matching pending handle.
    pub fn respond(&self, worker_id: &str, response: Response) {
        let outcome = match response.error {
            Some(raw) => Err(EngineError::from_wire(&raw)),
            None => Ok(response.data.unwrap_or(Payload::Null)),
        };
        self.complete_entry(worker_id, response.correlation_id, outcome);
    }

    /// Fire-and-forget event toward the aggregator unit.
    pub async fn emit_event(&self, worker_id: &str, name: &str, data: Payload) {
        let event = BusEvent { name: name.to_string(), data };
        if self.events_tx.send((worker_id.to_string(), event)).await.is_err() {
            debug!("event stream closed; dropping {name} from {worker_id}");
        }
    }

    /// Fail every pending request of a worker without unregistering it.
    /// Used by the stop sequence before the graceful shutdown request.
    pub fn fail_pending(&self, worker_id: &str, error: EngineError) {
        let drained = match self.pending.lock() {
            Ok(mut pending) => pending.get_mut(worker_id).map(std::mem::take),
            Err(_) => None,
        };
        if let Some(entries) = drained {
            if !entries.is_empty() {
                warn!("failing {} pending request(s) for {worker_id}", entries.len());
            }
            for (_, sender) in entries {
                let _ = sender.send(Err(error.clone()));
            }
        }
    }

    /// Fail every pending request of a dead or stopped worker and drop its
    /// mailbox. O(pending entries of that worker).
    pub fn sweep_worker(&self, worker_id: &str, error: EngineError) {
        if let Ok(mut workers) = self.workers.lock() {
            workers.remove(worker_id);
        }
        let drained = match self.pending.lock() {
            Ok(mut pending) => pending.remove(worker_id),
            Err(_) => None,
        };
        if let Some(entries) = drained {
            if !entries.is_empty() {
                warn!("sweeping {} pending request(s) for {worker_id}", entries.len());
            }
            for (_, sender) in entries {
                let _ = sender.send(Err(error.clone()));
            }
        }
    }

    pub fn pending_count(&self, worker_id: &str) -> usize {
        self.pending
            .lock()
            .ok()
            .and_then(|pending| pending.get(worker_id).map(FxHashMap::len))
            .unwrap_or(0)
    }

    fn complete_entry(
        &self,
        worker_id: &str,
        correlation_id: u64,
        outcome: Result<Payload, EngineError>,
    ) {
        let sender = match self.pending.lock() {
            Ok(mut pending) => {
                pending.get_mut(worker_id).and_then(|entries| entries.remove(&correlation_id))
            }
            Err(_) => None,
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => debug!("no pending entry for {worker_id}#{correlation_id} (late response?)"),
        }
    }
}

/// Completion handle for one in-flight request.
pub struct RequestHandle {
    correlation_id: u64,
    worker_id: String,
    receiver: oneshot::Receiver<Result<Payload, EngineError>>,
    pending: Arc<Mutex<PendingMap>>,
    timeout: Duration,
}

impl RequestHandle {
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// Wait for the response, failing with `Timeout` at the deadline. The
    /// pending entry is cleared on every exit path.
    pub async fn wait(self) -> Result<Payload, EngineError> {
        let deadline = self.timeout;
        match tokio::time::timeout(deadline, self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Completion sender dropped without a verdict.
                Err(EngineError::WorkerFailed(self.worker_id))
            }
            Err(_) => {
                remove_pending(&self.pending, &self.worker_id, self.correlation_id);
                Err(EngineError::Timeout)
            }
        }
    }

    /// Abandon the request. Any in-flight work continues; its result is
    /// discarded.
    pub fn cancel(self) -> EngineError {
        remove_pending(&self.pending, &self.worker_id, self.correlation_id);
        EngineError::Cancelled
    }
}

fn remove_pending(pending: &Arc<Mutex<PendingMap>>, worker_id: &str, correlation_id: u64) {
    if let Ok(mut map) = pending.lock() {
        if let Some(entries) = map.get_mut(worker_id) {
            entries.remove(&correlation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn response_completes_the_handle_with_data() {
        let (bus, _events) = MessageBus::new(DEFAULT_REQUEST_TIMEOUT);
        let mut mailbox = bus.register_worker("polygon");

        let handle = bus.send_request("polygon", "fetch-pool", json!({"address": "0xabc"})).await;
        let BusMessage::Request(request) = mailbox.inbox.recv().await.unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(request.name, "fetch-pool");

        bus.respond(
            "polygon",
            Response {
                correlation_id: request.correlation_id,
                data: Some(json!({"ok": true})),
                error: None,
            },
        );
        let payload = handle.wait().await.unwrap();
        assert_eq!(payload["ok"], true);
        assert_eq!(bus.pending_count("polygon"), 0);
    }

    #[tokio::test]
    async fn silent_worker_times_out_and_clears_pending() {
        let (bus, _events) = MessageBus::new(DEFAULT_REQUEST_TIMEOUT);
        let _mailbox = bus.register_worker("polygon");

        let handle = bus
            .send_request_with_timeout(
                "polygon",
                "fetch-all",
                Payload::Null,
                Duration::from_millis(50),
            )
            .await;
        assert_eq!(bus.pending_count("polygon"), 1);

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err, EngineError::Timeout);
        // The pending map no longer contains the correlation id.
        assert_eq!(bus.pending_count("polygon"), 0);
    }

    #[tokio::test]
    async fn response_errors_come_back_typed() {
        let (bus, _events) = MessageBus::new(DEFAULT_REQUEST_TIMEOUT);
        let mut mailbox = bus.register_worker("base");

        let handle = bus.send_request("base", "fetch-pool", Payload::Null).await;
        let BusMessage::Request(request) = mailbox.inbox.recv().await.unwrap() else {
            panic!("expected a request");
        };
        bus.respond(
            "base",
            Response {
                correlation_id: request.correlation_id,
                data: None,
                error: Some(EngineError::UnknownPool(String::from("8453:0xdead")).to_wire()),
            },
        );
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), "UnknownPool");
    }

    #[tokio::test]
    async fn sweep_fails_all_pending_for_that_worker_only() {
        let (bus, _events) = MessageBus::new(DEFAULT_REQUEST_TIMEOUT);
        let _polygon = bus.register_worker("polygon");
        let _base = bus.register_worker("base");

        let h1 = bus.send_request("polygon", "fetch-all", Payload::Null).await;
        let h2 = bus.send_request("polygon", "fetch-all", Payload::Null).await;
        let h3 = bus.send_request("base", "fetch-all", Payload::Null).await;
        assert_eq!(bus.pending_count("polygon"), 2);

        bus.sweep_worker("polygon", EngineError::WorkerTerminated);
        assert_eq!(h1.wait().await.unwrap_err(), EngineError::WorkerTerminated);
        assert_eq!(h2.wait().await.unwrap_err(), EngineError::WorkerTerminated);
        assert_eq!(bus.pending_count("polygon"), 0);
        assert_eq!(bus.pending_count("base"), 1);
        drop(h3);
    }

    #[tokio::test]
    async fn cancel_clears_the_pending_entry() {
        let (bus, _events) = MessageBus::new(DEFAULT_REQUEST_TIMEOUT);
        let _mailbox = bus.register_worker("polygon");

        let handle = bus.send_request("polygon", "pause", Payload::Null).await;
        assert_eq!(bus.pending_count("polygon"), 1);
        assert_eq!(handle.cancel(), EngineError::Cancelled);
        assert_eq!(bus.pending_count("polygon"), 0);
    }

    #[tokio::test]
    async fn unknown_worker_fails_immediately() {
        let (bus, _events) = MessageBus::new(DEFAULT_REQUEST_TIMEOUT);
        let handle = bus.send_request("nowhere", "stop", Payload::Null).await;
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), "WorkerFailed");
    }

    #[tokio::test]
    async fn events_reach_the_aggregator_stream() {
        let (bus, mut events) = MessageBus::new(DEFAULT_REQUEST_TIMEOUT);
        let _mailbox = bus.register_worker("polygon");

        bus.emit_event("polygon", "newBlock", json!({"number": 42, "chainId": 137})).await;
        let (from, event) = events.recv().await.unwrap();
        assert_eq!(from, "polygon");
        assert_eq!(event.name, "newBlock");
        assert_eq!(event.data["number"], 42);
    }
}
