// ABOUTME: ToolHandler trait and the ToolDefinition advertised for each tool.
// ABOUTME: Implementors map a tool name plus JSON arguments to JSON text.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// A named tool, its human description, and the JSON schema of its arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute `tool_name` with `input_json` (a JSON object) and return JSON text.
    async fn execute(&self, tool_name: &str, input_json: &str) -> Result<String, ToolError>;

    /// Tools this handler understands.
    fn definitions(&self) -> Vec<ToolDefinition>;
}
