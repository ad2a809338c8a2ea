// ABOUTME: Integration tests driving the bus through tool calls only.
// ABOUTME: Registration, messaging, requests, status, and failure shapes.

use murmur_core::{AgentBus, Config, FnHandler, Message};
use murmur_tools::{BusTools, ToolHandler};
use serde_json::{json, Value};
use std::sync::Arc;

async fn tools() -> BusTools {
    BusTools::new(Arc::new(
        AgentBus::in_memory(Config::default()).await.unwrap(),
    ))
}

async fn ok(tools: &BusTools, name: &str, args: Value) -> Value {
    let outcome = tools.call(name, &args).await;
    assert!(!outcome.is_error, "{name} failed: {}", outcome.text);
    let body: Value = serde_json::from_str(&outcome.text).unwrap();
    assert_eq!(body["success"], true);
    body
}

async fn failure_kind(tools: &BusTools, name: &str, args: Value) -> String {
    let outcome = tools.call(name, &args).await;
    assert!(outcome.is_error, "{name} unexpectedly succeeded");
    let body: Value = serde_json::from_str(&outcome.text).unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"]["message"].as_str().is_some());
    body["error"]["kind"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_register_send_and_read_back() {
    let tools = tools().await;
    let body = ok(
        &tools,
        "register_agent",
        json!({"agentId": "worker-1", "role": "builder", "capabilities": ["rust"]}),
    )
    .await;
    assert_eq!(body["agent"]["id"], "worker-1");
    assert_eq!(body["agent"]["status"], "idle");

    let sent = ok(
        &tools,
        "send_message",
        json!({"from": "orchestrator", "to": "worker-1", "payload": {"cmd": "build"}}),
    )
    .await;
    let id = sent["messageId"].as_str().unwrap().to_string();

    let read = ok(
        &tools,
        "get_messages",
        json!({"agentId": "worker-1", "from": "orchestrator"}),
    )
    .await;
    assert_eq!(read["count"], 1);
    assert_eq!(read["messages"][0]["id"], id.as_str());
    assert_eq!(read["messages"][0]["payload"], json!({"cmd": "build"}));
}

#[tokio::test]
async fn test_unrepresentable_ttl_is_kept() {
    let tools = tools().await;
    ok(&tools, "register_agent", json!({"agentId": "b", "role": "qa"})).await;

    for ttl in [json!(100_000_000_000_000u64), json!(u64::MAX)] {
        ok(
            &tools,
            "send_message",
            json!({"from": "a", "to": "b", "payload": {}, "metadata": {"ttl": ttl}}),
        )
        .await;
    }

    let read = ok(&tools, "get_messages", json!({"agentId": "b"})).await;
    assert_eq!(read["count"], 2);
}

#[tokio::test]
async fn test_duplicate_registration_reports_kind() {
    let tools = tools().await;
    ok(&tools, "register_agent", json!({"agentId": "a", "role": "qa"})).await;
    assert_eq!(
        failure_kind(&tools, "register_agent", json!({"agentId": "a", "role": "qa"})).await,
        "DuplicateAgentError"
    );

    // The server keeps serving after a failure.
    ok(&tools, "get_metrics", json!({})).await;
}

#[tokio::test]
async fn test_validation_happens_before_the_bus() {
    let tools = tools().await;
    assert_eq!(
        failure_kind(&tools, "send_message", json!({"from": "a"})).await,
        "InvalidInputError"
    );
    assert_eq!(
        failure_kind(
            &tools,
            "update_status",
            json!({"agentId": "a", "status": "sleeping"})
        )
        .await,
        "InvalidInputError"
    );
    assert_eq!(
        failure_kind(
            &tools,
            "request_response",
            json!({"from": "a", "to": "b", "timeoutMs": 0})
        )
        .await,
        "InvalidInputError"
    );
    assert_eq!(tools.bus().metrics().messages_published, 0);
}

#[tokio::test]
async fn test_request_response_round_trip() {
    let tools = tools().await;
    ok(&tools, "register_agent", json!({"agentId": "qa-1", "role": "qa"})).await;
    tools
        .bus()
        .register_handler(
            "qa-1",
            Arc::new(FnHandler::new(|msg: Message| async move {
                anyhow::Ok(Some(json!({ "seen": msg.payload })))
            })),
        )
        .await;

    let body = ok(
        &tools,
        "request_response",
        json!({"from": "cli", "to": "qa-1", "payload": {"q": 1}, "timeoutMs": 2000}),
    )
    .await;
    assert_eq!(body["response"], json!({"seen": {"q": 1}}));

    assert_eq!(
        failure_kind(
            &tools,
            "request_response",
            json!({"from": "cli", "to": "ghost", "timeoutMs": 50})
        )
        .await,
        "AgentUnavailableError"
    );
}

#[tokio::test]
async fn test_status_heartbeat_and_unregister() {
    let tools = tools().await;
    ok(&tools, "register_agent", json!({"agentId": "t1", "role": "task"})).await;
    ok(&tools, "register_agent", json!({"agentId": "t2", "role": "task"})).await;

    let updated = ok(
        &tools,
        "update_status",
        json!({"agentId": "t1", "status": "working", "currentTask": "T-1"}),
    )
    .await;
    assert_eq!(updated["updated"], true);
    let missing = ok(
        &tools,
        "update_status",
        json!({"agentId": "ghost", "status": "idle"}),
    )
    .await;
    assert_eq!(missing["updated"], false);

    ok(&tools, "heartbeat", json!({"agentId": "t2"})).await;
    assert_eq!(
        failure_kind(&tools, "heartbeat", json!({"agentId": "ghost"})).await,
        "AgentUnavailableError"
    );

    let broadcast = ok(
        &tools,
        "broadcast_to_role",
        json!({"from": "orch", "role": "task", "payload": {"go": true}}),
    )
    .await;
    assert_eq!(broadcast["count"], 2);

    let status = ok(&tools, "get_system_status", json!({})).await;
    assert_eq!(status["system"]["totalAgents"], 2);

    let removed = ok(&tools, "unregister_agent", json!({"agentId": "t1"})).await;
    assert_eq!(removed["removed"], true);
    let again = ok(&tools, "unregister_agent", json!({"agentId": "t1"})).await;
    assert_eq!(again["removed"], false);

    let health = ok(&tools, "health_check", Value::Null).await;
    assert_eq!(health["health"]["status"], "healthy");
}

#[tokio::test]
async fn test_subscribe_and_unsubscribe_topics() {
    let tools = tools().await;
    ok(
        &tools,
        "subscribe",
        json!({"agentId": "w1", "topics": ["deploys"], "filter": {"types": ["event"]}}),
    )
    .await;
    assert_eq!(tools.bus().router().subscription_count().await, 1);

    ok(&tools, "unsubscribe", json!({"agentId": "w1"})).await;
    assert_eq!(tools.bus().router().subscription_count().await, 0);
}

#[tokio::test]
async fn test_execute_returns_typed_errors() {
    let tools = tools().await;
    let err = tools.execute("nope", "{}").await.unwrap_err();
    assert_eq!(err.kind(), "UnknownToolError");
    assert_eq!(tools.definitions().len(), 13);
}
