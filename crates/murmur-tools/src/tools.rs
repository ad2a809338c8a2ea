// ABOUTME: BusTools dispatches named tool calls onto an AgentBus.
// ABOUTME: Validates arguments, invokes one core method, and shapes the JSON result.

use async_trait::async_trait;
use chrono::Utc;
use murmur_core::{
    AgentBus, AgentInfo, AgentRole, AgentStatus, HistoryFilter, MessageType, SendOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::handler::{ToolDefinition, ToolHandler};
use crate::inputs::{
    require, AgentIdInput, BroadcastToRoleInput, BroadcastToRoleOutput, GetMessagesInput,
    GetMessagesOutput, HeartbeatOutput, RegisterAgentInput, RegisterAgentOutput,
    RequestResponseInput, RequestResponseOutput, SendMessageInput, SendMessageOutput,
    SubscribeInput, SubscriptionOutput, UnregisterAgentOutput, UnsubscribeInput,
    UpdateStatusInput, UpdateStatusOutput,
};
use crate::schema::SchemaBuilder;

const MESSAGE_TYPES: &[&str] = &[
    "direct",
    "broadcast",
    "request",
    "response",
    "event",
    "command",
    "query",
];
const PRIORITIES: &[&str] = &["low", "normal", "high", "critical"];

/// Result of a tool call as a protocol layer reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

/// Tool surface over a shared [`AgentBus`].
#[derive(Clone)]
pub struct BusTools {
    bus: Arc<AgentBus>,
}

impl BusTools {
    pub fn new(bus: Arc<AgentBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<AgentBus> {
        &self.bus
    }

    /// Run a tool and fold any failure into a structured error body.
    pub async fn call(&self, tool_name: &str, arguments: &Value) -> ToolOutcome {
        let input_json = if arguments.is_null() {
            "{}".to_string()
        } else {
            arguments.to_string()
        };

        match self.execute(tool_name, &input_json).await {
            Ok(text) => ToolOutcome {
                text,
                is_error: false,
            },
            Err(e) => {
                warn!(tool = %tool_name, kind = e.kind(), error = %e, "Tool call failed");
                ToolOutcome {
                    text: e.to_failure_json(),
                    is_error: true,
                }
            }
        }
    }
}

fn parse<T: DeserializeOwned>(input_json: &str) -> Result<T, ToolError> {
    let input_json = if input_json.trim().is_empty() {
        "{}"
    } else {
        input_json
    };
    serde_json::from_str(input_json).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

/// Serialize `body` and mark it successful.
fn success<T: Serialize>(body: &T) -> Result<String, ToolError> {
    let mut value = serde_json::to_value(body).map_err(|e| ToolError::Internal(e.to_string()))?;
    match value.as_object_mut() {
        Some(object) => {
            object.insert("success".to_string(), Value::Bool(true));
        }
        None => value = json!({ "success": true, "result": value }),
    }
    Ok(value.to_string())
}

#[async_trait]
impl ToolHandler for BusTools {
    async fn execute(&self, tool_name: &str, input_json: &str) -> Result<String, ToolError> {
        info!(tool = %tool_name, "Executing tool");
        debug!(tool = %tool_name, input = %input_json, "Tool input");

        match tool_name {
            "send_message" => {
                let input: SendMessageInput = parse(input_json)?;
                require("from", &input.from)?;
                require("to", &input.to)?;

                let options = SendOptions {
                    kind: input.kind.unwrap_or(MessageType::Direct),
                    correlation_id: input.correlation_id,
                    reply_to: input.reply_to,
                    requires_response: input.requires_response,
                    metadata: input.metadata,
                };
                let message_id = self
                    .bus
                    .send_message(&input.from, &input.to, input.payload, options)
                    .await?;

                success(&SendMessageOutput { message_id })
            }

            "subscribe" => {
                let input: SubscribeInput = parse(input_json)?;
                require("agentId", &input.agent_id)?;
                if input.topics.is_empty() {
                    return Err(ToolError::InvalidInput(
                        "`topics` must name at least one topic".to_string(),
                    ));
                }
                for topic in &input.topics {
                    require("topics", topic)?;
                }

                self.bus
                    .subscribe(&input.agent_id, &input.topics, input.filter)
                    .await?;

                success(&SubscriptionOutput {
                    agent_id: input.agent_id,
                    topics: Some(input.topics),
                })
            }

            "unsubscribe" => {
                let input: UnsubscribeInput = parse(input_json)?;
                require("agentId", &input.agent_id)?;

                self.bus
                    .unsubscribe(&input.agent_id, input.topics.as_deref())
                    .await?;

                success(&SubscriptionOutput {
                    agent_id: input.agent_id,
                    topics: input.topics,
                })
            }

            "get_messages" => {
                let input: GetMessagesInput = parse(input_json)?;
                require("agentId", &input.agent_id)?;

                let filter = HistoryFilter {
                    kind: input.kind,
                    from: input.from,
                    correlation_id: input.correlation_id,
                };
                let messages = self
                    .bus
                    .get_messages(&input.agent_id, input.since, input.limit, &filter)
                    .await;

                let count = messages.len();
                success(&GetMessagesOutput { messages, count })
            }

            "health_check" => {
                let health = self.bus.health_check().await;
                success(&json!({ "health": health }))
            }

            "get_metrics" => success(&json!({ "metrics": self.bus.metrics() })),

            "register_agent" => {
                let input: RegisterAgentInput = parse(input_json)?;
                require("agentId", &input.agent_id)?;

                let mut info = AgentInfo::new(input.agent_id, input.role)
                    .with_capabilities(input.capabilities);
                if let Some(metadata) = input.metadata {
                    info = info.with_metadata(metadata);
                }
                let agent = self.bus.register_agent(info).await?;

                success(&RegisterAgentOutput { agent })
            }

            "update_status" => {
                let input: UpdateStatusInput = parse(input_json)?;
                require("agentId", &input.agent_id)?;

                let updated = self
                    .bus
                    .update_status(&input.agent_id, input.status, input.current_task)
                    .await;

                success(&UpdateStatusOutput {
                    agent_id: input.agent_id,
                    updated,
                })
            }

            "get_system_status" => {
                let system = self.bus.system_status().await;
                success(&json!({ "system": system }))
            }

            "unregister_agent" => {
                let input: AgentIdInput = parse(input_json)?;
                require("agentId", &input.agent_id)?;

                let removed = self.bus.unregister_agent(&input.agent_id).await?;

                success(&UnregisterAgentOutput {
                    agent_id: input.agent_id,
                    removed,
                })
            }

            "heartbeat" => {
                let input: AgentIdInput = parse(input_json)?;
                require("agentId", &input.agent_id)?;

                self.bus.send_heartbeat(&input.agent_id).await?;

                success(&HeartbeatOutput {
                    agent_id: input.agent_id,
                    timestamp: Utc::now(),
                })
            }

            "broadcast_to_role" => {
                let input: BroadcastToRoleInput = parse(input_json)?;
                require("from", &input.from)?;

                let mut options = SendOptions::of_kind(input.kind.unwrap_or(MessageType::Direct));
                if let Some(metadata) = input.metadata {
                    options = options.with_metadata(metadata);
                }
                let message_ids = self
                    .bus
                    .broadcast_to_role(&input.from, input.role, input.payload, options)
                    .await;

                let count = message_ids.len();
                success(&BroadcastToRoleOutput {
                    role: input.role,
                    message_ids,
                    count,
                })
            }

            "request_response" => {
                let input: RequestResponseInput = parse(input_json)?;
                require("from", &input.from)?;
                require("to", &input.to)?;
                if input.timeout_ms == Some(0) {
                    return Err(ToolError::InvalidInput(
                        "`timeoutMs` must be positive".to_string(),
                    ));
                }

                let response = self
                    .bus
                    .request_response(
                        &input.from,
                        &input.to,
                        input.payload,
                        input.timeout_ms.map(Duration::from_millis),
                    )
                    .await?;

                success(&RequestResponseOutput { response })
            }

            _ => Err(ToolError::UnknownTool(tool_name.to_string())),
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }
}

fn agent_id_property(description: &str) -> SchemaBuilder {
    SchemaBuilder::string().description(description)
}

fn payload_property() -> SchemaBuilder {
    SchemaBuilder::any().description("Arbitrary JSON payload")
}

fn metadata_property() -> SchemaBuilder {
    SchemaBuilder::object()
        .description("Delivery hints")
        .property(
            "priority",
            SchemaBuilder::string().enumerated(PRIORITIES),
        )
        .property(
            "ttl",
            SchemaBuilder::integer()
                .minimum(1)
                .description("Seconds before the message expires from history"),
        )
        .property(
            "topic",
            SchemaBuilder::string().description("Topic to broadcast on instead of `broadcast`"),
        )
}

fn role_property() -> SchemaBuilder {
    let roles: Vec<&str> = AgentRole::ALL.iter().map(|r| r.as_str()).collect();
    SchemaBuilder::string().enumerated(&roles)
}

fn status_property() -> SchemaBuilder {
    let statuses: Vec<&str> = AgentStatus::ALL.iter().map(|s| s.as_str()).collect();
    SchemaBuilder::string().enumerated(&statuses)
}

/// Definitions for every tool [`BusTools`] dispatches.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "send_message",
            "Publish a message without checking that the recipient is registered",
            SchemaBuilder::object()
                .property("from", agent_id_property("Sender agent id"))
                .property(
                    "to",
                    agent_id_property("Recipient agent id, or `all` for a broadcast"),
                )
                .property("payload", payload_property())
                .property(
                    "type",
                    SchemaBuilder::string()
                        .enumerated(MESSAGE_TYPES)
                        .description("Message type, `direct` when omitted"),
                )
                .property("correlationId", SchemaBuilder::string())
                .property("replyTo", SchemaBuilder::string())
                .property("requiresResponse", SchemaBuilder::boolean())
                .property("metadata", metadata_property())
                .required(&["from", "to"])
                .build(),
        ),
        ToolDefinition::new(
            "subscribe",
            "Subscribe an agent to one or more topics",
            SchemaBuilder::object()
                .property("agentId", agent_id_property("Subscribing agent"))
                .property(
                    "topics",
                    SchemaBuilder::array(SchemaBuilder::string())
                        .description("Topic names; `broadcast` is the shared channel"),
                )
                .property(
                    "filter",
                    SchemaBuilder::object()
                        .property(
                            "types",
                            SchemaBuilder::array(
                                SchemaBuilder::string().enumerated(MESSAGE_TYPES),
                            ),
                        )
                        .property(
                            "priorities",
                            SchemaBuilder::array(SchemaBuilder::string().enumerated(PRIORITIES)),
                        ),
                )
                .required(&["agentId", "topics"])
                .build(),
        ),
        ToolDefinition::new(
            "unsubscribe",
            "Drop some or all of an agent's topic subscriptions",
            SchemaBuilder::object()
                .property("agentId", agent_id_property("Subscribed agent"))
                .property(
                    "topics",
                    SchemaBuilder::array(SchemaBuilder::string())
                        .description("Topics to drop; omit to drop every subscription"),
                )
                .required(&["agentId"])
                .build(),
        ),
        ToolDefinition::new(
            "get_messages",
            "Read an agent's message history, oldest first",
            SchemaBuilder::object()
                .property("agentId", agent_id_property("Agent whose history to read"))
                .property(
                    "since",
                    SchemaBuilder::string().description("RFC 3339 timestamp, exclusive"),
                )
                .property(
                    "limit",
                    SchemaBuilder::integer()
                        .minimum(0)
                        .description("Most recent messages to return"),
                )
                .property("type", SchemaBuilder::string().enumerated(MESSAGE_TYPES))
                .property("from", SchemaBuilder::string())
                .property("correlationId", SchemaBuilder::string())
                .required(&["agentId"])
                .build(),
        ),
        ToolDefinition::new(
            "health_check",
            "Probe the transport and report overall bus health",
            SchemaBuilder::object().build(),
        ),
        ToolDefinition::new(
            "get_metrics",
            "Report message, error, and request counters",
            SchemaBuilder::object().build(),
        ),
        ToolDefinition::new(
            "register_agent",
            "Register an agent and subscribe it to broadcast and its role topic",
            SchemaBuilder::object()
                .property("agentId", agent_id_property("Unique agent id"))
                .property("role", role_property())
                .property(
                    "capabilities",
                    SchemaBuilder::array(SchemaBuilder::string()),
                )
                .property("metadata", SchemaBuilder::any())
                .required(&["agentId", "role"])
                .build(),
        ),
        ToolDefinition::new(
            "update_status",
            "Set an agent's status and current task",
            SchemaBuilder::object()
                .property("agentId", agent_id_property("Registered agent"))
                .property("status", status_property())
                .property("currentTask", SchemaBuilder::string())
                .required(&["agentId", "status"])
                .build(),
        ),
        ToolDefinition::new(
            "get_system_status",
            "Summarize agents, subscriptions, history, and breaker state",
            SchemaBuilder::object().build(),
        ),
        ToolDefinition::new(
            "unregister_agent",
            "Remove an agent and its subscriptions",
            SchemaBuilder::object()
                .property("agentId", agent_id_property("Registered agent"))
                .required(&["agentId"])
                .build(),
        ),
        ToolDefinition::new(
            "heartbeat",
            "Report that an agent is alive",
            SchemaBuilder::object()
                .property("agentId", agent_id_property("Registered agent"))
                .required(&["agentId"])
                .build(),
        ),
        ToolDefinition::new(
            "broadcast_to_role",
            "Send a message to every live agent with a role",
            SchemaBuilder::object()
                .property("from", agent_id_property("Sender agent id"))
                .property("role", role_property())
                .property("payload", payload_property())
                .property("type", SchemaBuilder::string().enumerated(MESSAGE_TYPES))
                .property("metadata", metadata_property())
                .required(&["from", "role"])
                .build(),
        ),
        ToolDefinition::new(
            "request_response",
            "Send a request and wait for the correlated response",
            SchemaBuilder::object()
                .property("from", agent_id_property("Requesting agent id"))
                .property("to", agent_id_property("Registered responder"))
                .property("payload", payload_property())
                .property(
                    "timeoutMs",
                    SchemaBuilder::integer()
                        .minimum(1)
                        .description("Milliseconds to wait before failing"),
                )
                .required(&["from", "to"])
                .build(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::Config;

    async fn tools() -> BusTools {
        let bus = AgentBus::in_memory(Config::default()).await.unwrap();
        BusTools::new(Arc::new(bus))
    }

    fn body(outcome: &ToolOutcome) -> Value {
        serde_json::from_str(&outcome.text).unwrap()
    }

    #[test]
    fn test_definitions_are_unique_and_described() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 13);
        let mut names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 13);
        assert!(defs.iter().all(|d| !d.description.is_empty()));
        assert!(defs.iter().all(|d| d.input_schema["type"] == "object"));
    }

    #[test]
    fn test_role_enum_lists_every_role() {
        let register = tool_definitions()
            .into_iter()
            .find(|d| d.name == "register_agent")
            .unwrap();
        let roles = register.input_schema["properties"]["role"]["enum"]
            .as_array()
            .unwrap()
            .len();
        assert_eq!(roles, AgentRole::ALL.len());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured_failure() {
        let outcome = tools().await.call("teleport", &json!({})).await;
        assert!(outcome.is_error);
        let body = body(&outcome);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "UnknownToolError");
    }

    #[tokio::test]
    async fn test_blank_agent_id_is_rejected() {
        let outcome = tools()
            .await
            .call("register_agent", &json!({"agentId": " ", "role": "qa"}))
            .await;
        assert!(outcome.is_error);
        assert_eq!(body(&outcome)["error"]["kind"], "InvalidInputError");
    }

    #[tokio::test]
    async fn test_empty_topics_are_rejected() {
        let outcome = tools()
            .await
            .call("subscribe", &json!({"agentId": "w1", "topics": []}))
            .await;
        assert!(outcome.is_error);
        assert_eq!(body(&outcome)["error"]["kind"], "InvalidInputError");
    }

    #[tokio::test]
    async fn test_null_arguments_for_argless_tools() {
        let outcome = tools().await.call("get_metrics", &Value::Null).await;
        assert!(!outcome.is_error);
        let body = body(&outcome);
        assert_eq!(body["success"], true);
        assert_eq!(body["metrics"]["messagesPublished"], 0);
    }

    #[test]
    fn test_success_wraps_non_objects() {
        let text = success(&vec![1, 2]).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"success": true, "result": [1, 2]}));
    }
}
