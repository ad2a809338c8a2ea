// ABOUTME: Agent registry tracking identity, role, status, and heartbeat liveness.
// ABOUTME: Owns every AgentRecord; callers only see cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{BusError, Result};

/// Domain role an agent plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Prd,
    Task,
    Architect,
    Builder,
    Qa,
    Orchestrator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Prd,
        AgentRole::Task,
        AgentRole::Architect,
        AgentRole::Builder,
        AgentRole::Qa,
        AgentRole::Orchestrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Prd => "prd",
            AgentRole::Task => "task",
            AgentRole::Architect => "architect",
            AgentRole::Builder => "builder",
            AgentRole::Qa => "qa",
            AgentRole::Orchestrator => "orchestrator",
        }
    }

    /// Topic every agent of this role is subscribed to.
    pub fn topic(&self) -> String {
        format!("role.{}", self.as_str())
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AgentRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Blocked,
    Offline,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 4] = [
        AgentStatus::Idle,
        AgentStatus::Working,
        AgentStatus::Blocked,
        AgentStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AgentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// Registration input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AgentInfo {
    pub fn new(id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            role,
            capabilities: BTreeSet::new(),
            metadata: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Everything the registry knows about one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AgentRecord {
    fn from_info(info: AgentInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: info.id,
            role: info.role,
            status: AgentStatus::Idle,
            capabilities: info.capabilities,
            current_task: None,
            last_heartbeat: now,
            registered_at: now,
            metadata: info.metadata,
        }
    }

    /// Heartbeats never move backwards.
    fn beat(&mut self, now: DateTime<Utc>) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }

    fn is_alive_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let elapsed = (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO);
        elapsed < window
    }
}

/// Outcome of a liveness check by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Unknown,
    Alive,
    /// The agent just crossed the liveness window and was marked offline.
    WentOffline,
    /// Already marked offline by an earlier check.
    StillOffline,
}

/// Registry of known agents, guarded by a single lock.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentRecord>>,
    liveness_window: Duration,
}

impl AgentRegistry {
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Insert a record for `info`, replacing a stale or offline one.
    pub async fn insert(&self, info: AgentInfo) -> Result<AgentRecord> {
        let now = Utc::now();
        let mut agents = self.agents.write().await;

        if let Some(existing) = agents.get(&info.id) {
            if existing.status != AgentStatus::Offline
                && existing.is_alive_at(now, self.liveness_window)
            {
                return Err(BusError::DuplicateAgent(info.id));
            }
            info!(agent_id = %info.id, "Replacing stale registration");
        }

        let record = AgentRecord::from_info(info, now);
        agents.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Remove a record. Returns it if it existed.
    pub async fn remove(&self, id: &str) -> Option<AgentRecord> {
        self.agents.write().await.remove(id)
    }

    /// Set status and current task, refreshing the heartbeat. False if unknown.
    pub async fn update_status(
        &self,
        id: &str,
        status: AgentStatus,
        current_task: Option<String>,
    ) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.current_task = current_task;
                record.beat(Utc::now());
                true
            }
            None => {
                debug!(agent_id = %id, "Ignoring status update for unknown agent");
                false
            }
        }
    }

    /// Record a heartbeat. An offline agent that beats again comes back idle.
    pub async fn touch(&self, id: &str) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(id) {
            Some(record) => {
                record.beat(Utc::now());
                if record.status == AgentStatus::Offline {
                    info!(agent_id = %id, "Agent back online");
                    record.status = AgentStatus::Idle;
                }
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<AgentRecord> {
        self.agents.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.agents.read().await.contains_key(id)
    }

    /// Snapshot of every record, ordered by id.
    pub async fn list(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self.agents.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn agents_by_role(&self, role: AgentRole) -> Vec<AgentRecord> {
        self.list()
            .await
            .into_iter()
            .filter(|r| r.role == role)
            .collect()
    }

    /// Agents of `role` that are alive right now.
    pub async fn live_agents_by_role(&self, role: AgentRole) -> Vec<AgentRecord> {
        let now = Utc::now();
        self.list()
            .await
            .into_iter()
            .filter(|r| r.role == role && r.is_alive_at(now, self.liveness_window))
            .collect()
    }

    /// Idle agents whose heartbeat is within the liveness window.
    pub async fn available_agents(&self) -> Vec<AgentRecord> {
        let now = Utc::now();
        self.list()
            .await
            .into_iter()
            .filter(|r| {
                r.status == AgentStatus::Idle && r.is_alive_at(now, self.liveness_window)
            })
            .collect()
    }

    pub async fn is_alive(&self, id: &str) -> bool {
        let now = Utc::now();
        self.agents
            .read()
            .await
            .get(id)
            .is_some_and(|r| r.is_alive_at(now, self.liveness_window))
    }

    /// Check liveness and mark the agent offline on the first missed window.
    pub async fn check_staleness(&self, id: &str) -> Staleness {
        let now = Utc::now();
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get_mut(id) else {
            return Staleness::Unknown;
        };

        if record.is_alive_at(now, self.liveness_window) {
            Staleness::Alive
        } else if record.status == AgentStatus::Offline {
            Staleness::StillOffline
        } else {
            record.status = AgentStatus::Offline;
            Staleness::WentOffline
        }
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_insert_sets_idle_and_heartbeat() {
        let registry = AgentRegistry::new(WINDOW);
        let record = registry
            .insert(AgentInfo::new("w1", AgentRole::Builder).with_capabilities(["rust"]))
            .await
            .unwrap();
        assert_eq!(record.status, AgentStatus::Idle);
        assert_eq!(record.last_heartbeat, record.registered_at);
        assert!(record.capabilities.contains("rust"));
        assert!(registry.is_alive("w1").await);
    }

    #[tokio::test]
    async fn test_duplicate_alive_agent_rejected() {
        let registry = AgentRegistry::new(WINDOW);
        registry.insert(AgentInfo::new("w1", AgentRole::Builder)).await.unwrap();
        let err = registry
            .insert(AgentInfo::new("w1", AgentRole::Qa))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::DuplicateAgent("w1".to_string()));
    }

    #[tokio::test]
    async fn test_stale_agent_can_reregister() {
        let registry = AgentRegistry::new(WINDOW);
        registry.insert(AgentInfo::new("w1", AgentRole::Builder)).await.unwrap();
        tokio::time::sleep(WINDOW + Duration::from_millis(20)).await;

        let record = registry
            .insert(AgentInfo::new("w1", AgentRole::Qa))
            .await
            .unwrap();
        assert_eq!(record.role, AgentRole::Qa);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_status_unknown_is_noop() {
        let registry = AgentRegistry::new(WINDOW);
        assert!(!registry.update_status("ghost", AgentStatus::Working, None).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_status_refreshes_heartbeat() {
        let registry = AgentRegistry::new(WINDOW);
        let before = registry
            .insert(AgentInfo::new("w1", AgentRole::Builder))
            .await
            .unwrap()
            .last_heartbeat;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(
            registry
                .update_status("w1", AgentStatus::Working, Some("T-1".to_string()))
                .await
        );
        let record = registry.get("w1").await.unwrap();
        assert_eq!(record.status, AgentStatus::Working);
        assert_eq!(record.current_task.as_deref(), Some("T-1"));
        assert!(record.last_heartbeat > before);
    }

    #[tokio::test]
    async fn test_available_agents_requires_idle_and_alive() {
        let registry = AgentRegistry::new(WINDOW);
        registry.insert(AgentInfo::new("a", AgentRole::Task)).await.unwrap();
        registry.insert(AgentInfo::new("b", AgentRole::Task)).await.unwrap();
        registry.update_status("b", AgentStatus::Working, None).await;

        let ids: Vec<String> = registry
            .available_agents()
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string()]);

        tokio::time::sleep(WINDOW + Duration::from_millis(20)).await;
        assert!(registry.available_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_is_alive_unknown_false() {
        let registry = AgentRegistry::new(WINDOW);
        assert!(!registry.is_alive("nobody").await);
    }

    #[tokio::test]
    async fn test_check_staleness_transitions_once() {
        let registry = AgentRegistry::new(WINDOW);
        registry.insert(AgentInfo::new("w1", AgentRole::Builder)).await.unwrap();

        assert_eq!(registry.check_staleness("w1").await, Staleness::Alive);
        tokio::time::sleep(WINDOW + Duration::from_millis(20)).await;

        assert_eq!(registry.check_staleness("w1").await, Staleness::WentOffline);
        assert_eq!(registry.check_staleness("w1").await, Staleness::StillOffline);
        assert_eq!(
            registry.get("w1").await.unwrap().status,
            AgentStatus::Offline
        );
        assert_eq!(registry.check_staleness("ghost").await, Staleness::Unknown);
    }

    #[tokio::test]
    async fn test_touch_revives_offline_agent() {
        let registry = AgentRegistry::new(WINDOW);
        registry.insert(AgentInfo::new("w1", AgentRole::Builder)).await.unwrap();
        tokio::time::sleep(WINDOW + Duration::from_millis(20)).await;
        registry.check_staleness("w1").await;

        assert!(registry.touch("w1").await);
        let record = registry.get("w1").await.unwrap();
        assert_eq!(record.status, AgentStatus::Idle);
        assert!(registry.is_alive("w1").await);
    }

    #[tokio::test]
    async fn test_live_agents_by_role() {
        let registry = AgentRegistry::new(WINDOW);
        registry.insert(AgentInfo::new("t1", AgentRole::Task)).await.unwrap();
        registry.insert(AgentInfo::new("t2", AgentRole::Task)).await.unwrap();
        registry.insert(AgentInfo::new("b1", AgentRole::Builder)).await.unwrap();

        let tasks = registry.live_agents_by_role(AgentRole::Task).await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(registry.agents_by_role(AgentRole::Builder).await.len(), 1);
    }

    #[test]
    fn test_role_and_status_parse() {
        assert_eq!("qa".parse::<AgentRole>().unwrap(), AgentRole::Qa);
        assert!("manager".parse::<AgentRole>().is_err());
        assert_eq!(AgentRole::Builder.topic(), "role.builder");
        assert_eq!("blocked".parse::<AgentStatus>().unwrap(), AgentStatus::Blocked);
        assert!("asleep".parse::<AgentStatus>().is_err());
    }
}
