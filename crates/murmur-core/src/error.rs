// ABOUTME: Error types for the murmur-core crate.
// ABOUTME: One variant per core failure condition, each with a stable kind string.

use thiserror::Error;

/// Errors surfaced by the registry, router, and transport layers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// An agent with this id is already registered and alive.
    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    /// Target agent is unknown or not alive.
    #[error("agent {0} is not available")]
    AgentUnavailable(String),

    /// No response arrived before the deadline.
    #[error("request {correlation_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        correlation_id: String,
        timeout_ms: u64,
    },

    /// Transport calls are being rejected by the circuit breaker.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Message failed schema or signature validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Underlying publish/subscribe failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// History export or import failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration rejected when building the bus.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl BusError {
    /// Stable name for the error kind, used in structured failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            BusError::DuplicateAgent(_) => "DuplicateAgentError",
            BusError::AgentUnavailable(_) => "AgentUnavailableError",
            BusError::RequestTimeout { .. } => "RequestTimeoutError",
            BusError::CircuitOpen => "CircuitOpenError",
            BusError::InvalidMessage(_) => "InvalidMessageError",
            BusError::Transport(_) => "TransportError",
            BusError::Persistence(_) => "PersistenceError",
            BusError::InvalidConfig(_) => "ConfigError",
        }
    }

    /// Whether this failure counts against the circuit breaker.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, BusError::Transport(_))
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::InvalidMessage(err.to_string())
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
