// ABOUTME: Inter-agent messaging core for murmur.
// ABOUTME: Registry, router, heartbeat monitor, circuit breaker, and transport abstraction.

//! # murmur-core
//!
//! Agents register with an [`AgentBus`], exchange messages through a
//! publish/subscribe [`Transport`], and report liveness with heartbeats.
//!
//! ```no_run
//! use murmur_core::{AgentBus, AgentInfo, AgentRole, Config, SendOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> murmur_core::Result<()> {
//! let bus = AgentBus::in_memory(Config::default()).await?;
//! bus.register_agent(AgentInfo::new("worker-1", AgentRole::Builder)).await?;
//! let id = bus
//!     .send_to_agent("orchestrator", "worker-1", json!({"cmd": "build"}), SendOptions::default())
//!     .await?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod history;
pub mod message;
pub mod registry;
pub mod router;
pub mod signing;
pub mod status;
pub mod transport;

pub use bus::{AgentBus, HistoryExport};
pub use circuit_breaker::{CircuitBreaker, CircuitState, GuardedTransport};
pub use config::Config;
pub use error::{BusError, Result};
pub use handler::{FnHandler, MessageHandler};
pub use heartbeat::HeartbeatMonitor;
pub use history::{HistoryFilter, MessageHistory};
pub use message::{
    Codec, Compression, Message, MessageMetadata, MessageType, Priority, BROADCAST_TARGET,
    SYSTEM_SENDER,
};
pub use registry::{AgentInfo, AgentRecord, AgentRegistry, AgentRole, AgentStatus, Staleness};
pub use router::{MetricsSnapshot, Router, SendOptions, SubscriptionFilter, SubscriptionInfo};
pub use signing::MessageSigner;
pub use status::{HealthReport, HealthState, SystemStatus};
pub use transport::{Delivery, DeliverySink, MemoryTransport, SubscriptionId, Transport};
