// ABOUTME: Per-agent heartbeat monitor that demotes silent agents to offline.
// ABOUTME: Publishes agent_offline once per transition, not on every check.

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::message::{MessageType, BROADCAST_TARGET, SYSTEM_SENDER};
use crate::registry::{AgentRegistry, Staleness};
use crate::router::{Router, SendOptions};

/// Runs one periodic liveness check per registered agent.
pub struct HeartbeatMonitor {
    registry: Arc<AgentRegistry>,
    router: Arc<Router>,
    interval: Duration,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<AgentRegistry>, router: Arc<Router>, interval: Duration) -> Self {
        Self {
            registry,
            router,
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start monitoring `agent_id`, replacing any existing monitor for it.
    pub fn start(&self, agent_id: &str) {
        let task = tokio::spawn(monitor_agent(
            self.registry.clone(),
            self.router.clone(),
            agent_id.to_string(),
            self.interval,
        ));
        if let Some(previous) = self.tasks().insert(agent_id.to_string(), task) {
            previous.abort();
        }
        debug!(agent_id = %agent_id, interval_ms = self.interval.as_millis() as u64, "Heartbeat monitor started");
    }

    pub fn stop(&self, agent_id: &str) {
        if let Some(task) = self.tasks().remove(agent_id) {
            task.abort();
            debug!(agent_id = %agent_id, "Heartbeat monitor stopped");
        }
    }

    pub fn stop_all(&self) {
        for (_, task) in self.tasks().drain() {
            task.abort();
        }
    }

    pub fn is_monitoring(&self, agent_id: &str) -> bool {
        self.tasks()
            .get(agent_id)
            .is_some_and(|task| !task.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.tasks().values().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn monitor_agent(
    registry: Arc<AgentRegistry>,
    router: Arc<Router>,
    agent_id: String,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match registry.check_staleness(&agent_id).await {
            Staleness::Unknown => break,
            Staleness::Alive | Staleness::StillOffline => {}
            Staleness::WentOffline => {
                warn!(agent_id = %agent_id, "Agent missed heartbeat window, marking offline");
                let payload = json!({
                    "event": "agent_offline",
                    "agentId": agent_id,
                });
                if let Err(e) = router
                    .send_message(
                        SYSTEM_SENDER,
                        BROADCAST_TARGET,
                        payload,
                        SendOptions::of_kind(MessageType::Event),
                    )
                    .await
                {
                    warn!(agent_id = %agent_id, error = %e, "Failed to publish agent_offline");
                }
            }
        }
    }
    debug!(agent_id = %agent_id, "Heartbeat monitor exited");
}
