//! Typed request/response/event channel between watcher units and the
//! aggregator.
//!
//! Every payload crosses as a structural copy (`serde_json::Value`) with
//! arbitrary-precision integers encoded as decimal strings; nothing shares
//! memory across unit boundaries.

mod bus;
mod messages;

pub use bus::{MessageBus, RequestHandle, WorkerMailbox};
pub use messages::{BusEvent, BusMessage, Payload, Request, Response};
