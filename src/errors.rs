use std::fmt;

/// Engine error taxonomy.
///
/// These are kinds, not call-site types: the same kind can surface from
/// several components and each carries the policy described in the variant
/// docs. Adapter errors never abort a watcher; only `ConnectionDead` (and
/// unrecoverable configuration errors at startup) terminate the process.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Provider call failed or timed out. Retried at the next event.
    Rpc(String),
    /// Adapter was handed an event shape it does not understand.
    /// Fatal for that event only; logged and dropped.
    EventKindMismatch { expected: &'static str, got: String },
    /// Introspection could not resolve both tokens of a pool.
    UnknownPool(String),
    /// Event metadata was not strictly newer than the stored state.
    /// Expected under reorg; dropped silently.
    OutdatedEvent,
    /// Math precondition failed: a denominator reached zero or a
    /// subtraction underflowed.
    InsufficientLiquidity,
    /// Quote/simulation input was non-positive or exceeded reserves.
    InvalidAmount,
    /// ERC-20 metadata read reverted; the token stays unregistered.
    IntrospectionFailed(String),
    /// A bus request exceeded its deadline.
    Timeout,
    /// The target worker died with pending requests outstanding.
    WorkerFailed(String),
    /// The target worker was stopped while requests were pending.
    WorkerTerminated,
    /// The request handle was cancelled by its originator.
    Cancelled,
    /// The provider advertised a non-increasing block number.
    /// Triggers recovery; not surfaced to callers as a failure.
    ReorgDetected(u64),
    /// No block arrived for longer than the dead threshold.
    ConnectionDead,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Rpc(msg) => write!(f, "rpc call failed: {msg}"),
            EngineError::EventKindMismatch { expected, got } => {
                write!(f, "event kind mismatch: adapter expects {expected}, got {got}")
            }
            EngineError::UnknownPool(id) => {
                write!(f, "cannot resolve tokens for unknown pool {id}")
            }
            EngineError::OutdatedEvent => write!(f, "event metadata is not strictly newer"),
            EngineError::InsufficientLiquidity => write!(f, "insufficient liquidity"),
            EngineError::InvalidAmount => write!(f, "invalid amount"),
            EngineError::IntrospectionFailed(addr) => {
                write!(f, "erc20 metadata introspection failed for {addr}")
            }
            EngineError::Timeout => write!(f, "request timed out"),
            EngineError::WorkerFailed(name) => write!(f, "worker {name} failed"),
            EngineError::WorkerTerminated => write!(f, "worker terminated"),
            EngineError::Cancelled => write!(f, "request cancelled"),
            EngineError::ReorgDetected(block) => {
                write!(f, "reorg detected at block {block}")
            }
            EngineError::ConnectionDead => write!(f, "no blocks received, connection dead"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Stable kind tag used when an error crosses the bus as a payload string.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Rpc(_) => "RpcError",
            EngineError::EventKindMismatch { .. } => "EventKindMismatch",
            EngineError::UnknownPool(_) => "UnknownPool",
            EngineError::OutdatedEvent => "OutdatedEvent",
            EngineError::InsufficientLiquidity => "InsufficientLiquidity",
            EngineError::InvalidAmount => "InvalidAmount",
            EngineError::IntrospectionFailed(_) => "IntrospectionFailed",
            EngineError::Timeout => "Timeout",
            EngineError::WorkerFailed(_) => "WorkerFailed",
            EngineError::WorkerTerminated => "WorkerTerminated",
            EngineError::Cancelled => "Cancelled",
            EngineError::ReorgDetected(_) => "ReorgDetected",
            EngineError::ConnectionDead => "ConnectionDead",
        }
    }

    /// Encode for a bus response: `"<Kind>: <message>"`.
    pub fn to_wire(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Decode a bus-carried error back into its kind. Unknown kinds come
    /// back as `Rpc` so the message is never lost.
    pub fn from_wire(raw: &str) -> EngineError {
        let (kind, message) = match raw.split_once(": ") {
            Some((kind, message)) => (kind, message),
            None => (raw, raw),
        };
        match kind {
            "EventKindMismatch" => {
                EngineError::EventKindMismatch { expected: "unknown", got: message.to_string() }
            }
            "UnknownPool" => EngineError::UnknownPool(message.to_string()),
            "OutdatedEvent" => EngineError::OutdatedEvent,
            "InsufficientLiquidity" => EngineError::InsufficientLiquidity,
            "InvalidAmount" => EngineError::InvalidAmount,
            "IntrospectionFailed" => EngineError::IntrospectionFailed(message.to_string()),
            "Timeout" => EngineError::Timeout,
            "WorkerFailed" => EngineError::WorkerFailed(message.to_string()),
            "WorkerTerminated" => EngineError::WorkerTerminated,
            "Cancelled" => EngineError::Cancelled,
            "ConnectionDead" => EngineError::ConnectionDead,
            _ => EngineError::Rpc(message.to_string()),
        }
    }
}
