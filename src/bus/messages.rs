use serde::{Deserialize, Serialize};

/// Structural-copy payload. Big integers travel as decimal strings; the
/// receive side decodes them back with full precision.
pub type Payload = serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: u64,
    pub name: String,
    pub data: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: u64,
    #[serde(default)]
    pub data: Option<Payload>,
    /// Wire-encoded engine error (`"<Kind>: <message>"`).
    #[serde(default)]
    pub error: Option<String>,
}

/// Fire-and-forget notification; no correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub name: String,
    pub data: Payload,
}

/// Envelope delivered to a unit's mailbox.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Request(Request),
    Event(BusEvent),
}
