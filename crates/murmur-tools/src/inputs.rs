// ABOUTME: Argument and result shapes for each bus tool.
// ABOUTME: Deserialization enforces required fields and enum membership.

use chrono::{DateTime, Utc};
use murmur_core::{
    AgentRecord, AgentRole, AgentStatus, MessageMetadata, MessageType, SubscriptionFilter,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// Reject blank identifiers before they reach the bus.
pub(crate) fn require(field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::InvalidInput(format!("`{field}` must not be empty")));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageInput {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageType>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub requires_response: bool,
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageOutput {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeInput {
    pub agent_id: String,
    pub topics: Vec<String>,
    pub filter: Option<SubscriptionFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeInput {
    pub agent_id: String,
    pub topics: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOutput {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesInput {
    pub agent_id: String,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageType>,
    pub from: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetMessagesOutput {
    pub messages: Vec<murmur_core::Message>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentInput {
    pub agent_id: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RegisterAgentOutput {
    pub agent: AgentRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusInput {
    pub agent_id: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusOutput {
    pub agent_id: String,
    pub updated: bool,
}

/// Arguments for tools that only name an agent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdInput {
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterAgentOutput {
    pub agent_id: String,
    pub removed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatOutput {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastToRoleInput {
    pub from: String,
    pub role: AgentRole,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageType>,
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastToRoleOutput {
    pub role: AgentRole,
    pub message_ids: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponseInput {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub payload: Value,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RequestResponseOutput {
    pub response: Value,
}
