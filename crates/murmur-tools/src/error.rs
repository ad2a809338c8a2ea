// ABOUTME: Error types for tool execution.
// ABOUTME: Wraps core bus errors and adds boundary-level validation failures.

use murmur_core::BusError;
use serde_json::json;
use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The requested tool does not exist.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments failed validation before reaching the bus.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The bus rejected the operation.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Internal error during tool execution.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Stable error kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "UnknownToolError",
            ToolError::InvalidInput(_) => "InvalidInputError",
            ToolError::Bus(err) => err.kind(),
            ToolError::Internal(_) => "InternalError",
        }
    }

    /// Structured failure body: `{"success": false, "error": {kind, message}}`.
    pub fn to_failure_json(&self) -> String {
        json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
        .to_string()
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidInput(err.to_string())
    }
}
