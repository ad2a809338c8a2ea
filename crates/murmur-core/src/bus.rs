// ABOUTME: AgentBus facade wiring registry, router, breaker, and heartbeat monitor.
// ABOUTME: The API agent processes and the tool boundary call into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, GuardedTransport};
use crate::config::Config;
use crate::error::{BusError, Result};
use crate::handler::MessageHandler;
use crate::heartbeat::HeartbeatMonitor;
use crate::history::HistoryFilter;
use crate::message::{Codec, Message, MessageType, BROADCAST_TARGET, SYSTEM_SENDER};
use crate::registry::{AgentInfo, AgentRecord, AgentRegistry, AgentRole, AgentStatus};
use crate::router::{MetricsSnapshot, Router, SendOptions, SubscriptionFilter, BROADCAST_TOPIC};
use crate::signing::MessageSigner;
use crate::status::{HealthReport, SystemStatus};
use crate::transport::{MemoryTransport, Transport};

/// On-disk form of an exported history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryExport {
    pub agent_id: String,
    pub exported_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// Import accepts the export document or a bare array of messages.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryImport {
    Document(HistoryExport),
    Messages(Vec<Message>),
}

/// The assembled message bus.
pub struct AgentBus {
    config: Config,
    registry: Arc<AgentRegistry>,
    router: Arc<Router>,
    breaker: Arc<CircuitBreaker>,
    monitor: HeartbeatMonitor,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
}

impl AgentBus {
    /// Build a bus over `transport`, guarded by a circuit breaker.
    pub async fn new(transport: Arc<dyn Transport>, config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| BusError::InvalidConfig(format!("{e:#}")))?;

        let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));
        let guarded: Arc<dyn Transport> = Arc::new(GuardedTransport::new(transport, breaker.clone()));

        let registry = Arc::new(AgentRegistry::new(config.registry.liveness_window()));
        let signer = config.signing.secret.as_deref().map(MessageSigner::new);
        let router = Router::new(
            guarded,
            registry.clone(),
            Codec::new(signer),
            config.router.clone(),
        );
        router.start().await?;

        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            router.clone(),
            config.registry.heartbeat_interval(),
        );
        let housekeeping = tokio::spawn(run_housekeeping(
            Arc::downgrade(&router),
            config.registry.heartbeat_interval(),
        ));

        info!(
            liveness_window_ms = config.registry.liveness_window_ms,
            signing = config.signing.secret.is_some(),
            "Agent bus started"
        );

        Ok(Self {
            config,
            registry,
            router,
            breaker,
            monitor,
            housekeeping: Mutex::new(Some(housekeeping)),
        })
    }

    /// Build a bus over a fresh in-process broker.
    pub async fn in_memory(config: Config) -> Result<Self> {
        Self::new(Arc::new(MemoryTransport::new()), config).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register an agent, subscribe it to `broadcast` and its role topic,
    /// start its heartbeat monitor, and announce it.
    pub async fn register_agent(&self, info: AgentInfo) -> Result<AgentRecord> {
        let record = self.registry.insert(info).await?;
        let topics = [BROADCAST_TOPIC.to_string(), record.role.topic()];

        if let Err(e) = self.router.subscribe(&record.id, &topics, None).await {
            self.registry.remove(&record.id).await;
            return Err(e);
        }
        self.monitor.start(&record.id);

        info!(agent_id = %record.id, role = %record.role, "Agent registered");
        self.announce("agent_registered", json!({ "agent": record }))
            .await;
        Ok(record)
    }

    /// Remove an agent. Unknown ids are a no-op; returns whether one was removed.
    pub async fn unregister_agent(&self, agent_id: &str) -> Result<bool> {
        if !self.registry.contains(agent_id).await {
            debug!(agent_id = %agent_id, "Unregister of unknown agent ignored");
            return Ok(false);
        }

        self.monitor.stop(agent_id);
        if let Err(e) = self.router.unsubscribe(agent_id, None).await {
            warn!(agent_id = %agent_id, error = %e, "Failed to drop subscriptions");
        }
        self.router.remove_handler(agent_id).await;
        self.registry.remove(agent_id).await;

        info!(agent_id = %agent_id, "Agent unregistered");
        self.announce("agent_unregistered", json!({ "agentId": agent_id }))
            .await;
        Ok(true)
    }

    async fn announce(&self, event: &str, mut payload: Value) {
        if let Some(object) = payload.as_object_mut() {
            object.insert("event".to_string(), Value::String(event.to_string()));
        }
        let options = SendOptions::of_kind(MessageType::Event);
        if let Err(e) = self
            .router
            .send_message(SYSTEM_SENDER, BROADCAST_TARGET, payload, options)
            .await
        {
            warn!(event = %event, error = %e, "Failed to publish bus event");
        }
    }

    /// No-op for unknown agents; returns whether the agent was found.
    pub async fn update_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<String>,
    ) -> bool {
        self.registry
            .update_status(agent_id, status, current_task)
            .await
    }

    /// Refresh liveness and publish a heartbeat on the agent's own channel.
    pub async fn send_heartbeat(&self, agent_id: &str) -> Result<()> {
        if !self.registry.touch(agent_id).await {
            return Err(BusError::AgentUnavailable(agent_id.to_string()));
        }
        self.router
            .send_message(
                agent_id,
                agent_id,
                json!({ "event": "heartbeat" }),
                SendOptions::of_kind(MessageType::Event),
            )
            .await
            .map(|_| ())
    }

    pub async fn register_handler(&self, agent_id: &str, handler: Arc<dyn MessageHandler>) {
        self.router.register_handler(agent_id, handler).await;
    }

    pub async fn is_alive(&self, agent_id: &str) -> bool {
        self.registry.is_alive(agent_id).await
    }

    pub async fn available_agents(&self) -> Vec<AgentRecord> {
        self.registry.available_agents().await
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        options: SendOptions,
    ) -> Result<String> {
        self.router.send_message(from, to, payload, options).await
    }

    pub async fn send_to_agent(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        options: SendOptions,
    ) -> Result<String> {
        self.router.send_to_agent(from, to, payload, options).await
    }

    pub async fn broadcast_to_role(
        &self,
        from: &str,
        role: AgentRole,
        payload: Value,
        options: SendOptions,
    ) -> Vec<String> {
        self.router
            .broadcast_to_role(from, role, payload, options)
            .await
    }

    pub async fn request_response(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.router.request_response(from, to, payload, timeout).await
    }

    pub async fn subscribe(
        &self,
        agent_id: &str,
        topics: &[String],
        filter: Option<SubscriptionFilter>,
    ) -> Result<()> {
        self.router.subscribe(agent_id, topics, filter).await
    }

    pub async fn unsubscribe(&self, agent_id: &str, topics: Option<&[String]>) -> Result<()> {
        self.router.unsubscribe(agent_id, topics).await
    }

    pub async fn get_messages(
        &self,
        agent_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
        filter: &HistoryFilter,
    ) -> Vec<Message> {
        self.router
            .get_messages(agent_id, since, limit, filter)
            .await
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write an agent's history to `path` as JSON. Returns the message count.
    pub async fn save_history(&self, agent_id: &str, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let export = HistoryExport {
            agent_id: agent_id.to_string(),
            exported_at: Utc::now(),
            messages: self.router.history_snapshot(agent_id).await,
        };
        let json = serde_json::to_vec_pretty(&export)
            .map_err(|e| BusError::Persistence(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;

        info!(agent_id = %agent_id, path = %path.display(), count = export.messages.len(), "Saved history");
        Ok(export.messages.len())
    }

    /// Replay an exported history through `send_message`, in original order.
    /// Returns the ids of the re-sent messages.
    pub async fn load_history(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let messages = match serde_json::from_slice::<HistoryImport>(&bytes)
            .map_err(|e| BusError::Persistence(format!("{}: {e}", path.display())))?
        {
            HistoryImport::Document(export) => export.messages,
            HistoryImport::Messages(messages) => messages,
        };

        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let options = SendOptions {
                kind: message.kind,
                correlation_id: message.correlation_id,
                reply_to: message.reply_to,
                requires_response: message.requires_response,
                metadata: message.metadata,
            };
            let id = self
                .router
                .send_message(&message.from, &message.to, message.payload, options)
                .await?;
            ids.push(id);
        }

        info!(path = %path.display(), count = ids.len(), "Loaded history");
        Ok(ids)
    }

    // ========================================================================
    // Observability
    // ========================================================================

    pub async fn health_check(&self) -> HealthReport {
        HealthReport::probe(&self.router, &self.breaker).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.router.metrics()
    }

    pub async fn system_status(&self) -> SystemStatus {
        SystemStatus::collect(&self.registry, &self.router, &self.breaker).await
    }

    /// Stop monitors, housekeeping, and subscriptions; fail pending requests.
    pub async fn shutdown(&self) {
        if let Some(task) = self
            .housekeeping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.monitor.stop_all();
        self.router.shutdown().await;
        info!("Agent bus shut down");
    }
}

impl Drop for AgentBus {
    fn drop(&mut self) {
        if let Some(task) = self
            .housekeeping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn run_housekeeping(router: Weak<Router>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(router) = router.upgrade() else {
            break;
        };
        let purged = router.purge_expired().await;
        if purged > 0 {
            debug!(purged, "Purged expired history entries");
        }
    }
}
