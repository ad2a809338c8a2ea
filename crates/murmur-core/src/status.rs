// ABOUTME: Point-in-time snapshots of registry and router state.
// ABOUTME: SystemStatus for dashboards and HealthReport for liveness probes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::registry::{AgentRegistry, AgentRole, AgentStatus};
use crate::router::{MetricsSnapshot, Router};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub capabilities: BTreeSet<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    pub total_agents: usize,
    pub online_agents: usize,
    pub available_agents: usize,
    pub by_role: BTreeMap<AgentRole, usize>,
    pub by_status: BTreeMap<AgentStatus, usize>,
    pub agents: Vec<AgentSummary>,
    pub subscriptions: usize,
    pub history_agents: usize,
    pub history_messages: usize,
    pub pending_requests: usize,
    pub circuit_state: CircuitState,
    pub metrics: MetricsSnapshot,
}

impl SystemStatus {
    pub async fn collect(
        registry: &AgentRegistry,
        router: &Router,
        breaker: &CircuitBreaker,
    ) -> Self {
        let records = registry.list().await;
        let mut by_role = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut agents = Vec::with_capacity(records.len());

        for record in records {
            *by_role.entry(record.role).or_insert(0) += 1;
            *by_status.entry(record.status).or_insert(0) += 1;
            let alive = registry.is_alive(&record.id).await;
            agents.push(AgentSummary {
                id: record.id,
                role: record.role,
                status: record.status,
                current_task: record.current_task,
                capabilities: record.capabilities,
                last_heartbeat: record.last_heartbeat,
                alive,
            });
        }

        let online_agents = agents
            .iter()
            .filter(|a| a.alive && a.status != AgentStatus::Offline)
            .count();
        let (history_agents, history_messages) = router.history_stats().await;

        Self {
            timestamp: Utc::now(),
            total_agents: agents.len(),
            online_agents,
            available_agents: registry.available_agents().await.len(),
            by_role,
            by_status,
            agents,
            subscriptions: router.subscription_count().await,
            history_agents,
            history_messages,
            pending_requests: router.pending_count().await,
            circuit_state: breaker.state(),
            metrics: router.metrics(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportHealth {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub transport: TransportHealth,
    pub circuit_breaker: CircuitState,
    pub subscriptions: usize,
    pub history_agents: usize,
    pub pending_requests: usize,
    pub overdue_requests: usize,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    /// Healthy when the transport answers a ping and the circuit is not open.
    pub async fn probe(router: &Router, breaker: &CircuitBreaker) -> Self {
        let transport = match router.ping().await {
            Ok(latency) => TransportHealth {
                connected: true,
                latency_ms: Some(latency.as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => TransportHealth {
                connected: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        };

        let circuit_breaker = breaker.state();
        let status = if transport.connected && circuit_breaker != CircuitState::Open {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        let (history_agents, _) = router.history_stats().await;

        Self {
            status,
            timestamp: Utc::now(),
            transport,
            circuit_breaker,
            subscriptions: router.subscription_count().await,
            history_agents,
            pending_requests: router.pending_count().await,
            overdue_requests: router.overdue_requests().await,
            metrics: router.metrics(),
        }
    }
}
