// ABOUTME: Tool-call boundary for the murmur agent bus.
// ABOUTME: Named tools with JSON schemas, argument validation, and structured failures.

//! # murmur-tools
//!
//! Maps `name + JSON arguments` calls onto an [`murmur_core::AgentBus`].
//! Arguments are validated here, so the bus only fails on its own
//! conditions (unknown agent, timeout, open circuit).
//!
//! ```no_run
//! use murmur_core::{AgentBus, Config};
//! use murmur_tools::BusTools;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> murmur_core::Result<()> {
//! let bus = Arc::new(AgentBus::in_memory(Config::default()).await?);
//! let tools = BusTools::new(bus);
//! let outcome = tools
//!     .call("register_agent", &json!({"agentId": "qa-1", "role": "qa"}))
//!     .await;
//! assert!(!outcome.is_error);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handler;
pub mod inputs;
pub mod schema;
pub mod tools;

pub use error::ToolError;
pub use handler::{ToolDefinition, ToolHandler};
pub use schema::SchemaBuilder;
pub use tools::{tool_definitions, BusTools, ToolOutcome};
