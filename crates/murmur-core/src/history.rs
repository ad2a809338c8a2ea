// ABOUTME: Bounded per-agent message history with FIFO eviction and ttl purging.
// ABOUTME: Owned by the router; every read returns cloned messages, most recent last.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::message::{Message, MessageType};

/// Criteria for history reads. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl HistoryFilter {
    pub fn matches(&self, message: &Message) -> bool {
        self.kind.map_or(true, |kind| message.kind == kind)
            && self.from.as_deref().map_or(true, |from| message.from == from)
            && self
                .correlation_id
                .as_deref()
                .map_or(true, |cid| message.correlation_id.as_deref() == Some(cid))
    }
}

#[derive(Debug)]
pub struct MessageHistory {
    max_per_agent: usize,
    entries: HashMap<String, VecDeque<Message>>,
}

impl MessageHistory {
    pub fn new(max_per_agent: usize) -> Self {
        Self {
            max_per_agent: max_per_agent.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn max_per_agent(&self) -> usize {
        self.max_per_agent
    }

    /// Append a message, evicting the oldest entries past the cap.
    pub fn append(&mut self, agent_id: &str, message: Message) {
        let queue = self.entries.entry(agent_id.to_string()).or_default();
        queue.push_back(message);
        while queue.len() > self.max_per_agent {
            queue.pop_front();
        }
    }

    /// The most recent `limit` messages newer than `since` that match `filter`.
    pub fn query(
        &mut self,
        agent_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
        filter: &HistoryFilter,
    ) -> Vec<Message> {
        self.purge_agent(agent_id, Utc::now());
        let Some(queue) = self.entries.get(agent_id) else {
            return Vec::new();
        };

        let matching: Vec<&Message> = queue
            .iter()
            .filter(|m| since.map_or(true, |since| m.timestamp > since))
            .filter(|m| filter.matches(m))
            .collect();

        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Every unexpired message for an agent, oldest first.
    pub fn snapshot(&mut self, agent_id: &str) -> Vec<Message> {
        self.purge_agent(agent_id, Utc::now());
        self.entries
            .get(agent_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, agent_id: &str) -> usize {
        self.entries.get(agent_id).map_or(0, VecDeque::len)
    }

    pub fn remove(&mut self, agent_id: &str) {
        self.entries.remove(agent_id);
    }

    /// Number of agents with at least one stored message.
    pub fn agent_count(&self) -> usize {
        self.entries.values().filter(|q| !q.is_empty()).count()
    }

    pub fn total_messages(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }

    fn purge_agent(&mut self, agent_id: &str, now: DateTime<Utc>) -> usize {
        match self.entries.get_mut(agent_id) {
            Some(queue) => {
                let before = queue.len();
                queue.retain(|m| !m.is_expired(now));
                before - queue.len()
            }
            None => 0,
        }
    }

    /// Drop ttl-expired messages for every agent. Returns how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for queue in self.entries.values_mut() {
            let before = queue.len();
            queue.retain(|m| !m.is_expired(now));
            removed += before - queue.len();
        }
        self.entries.retain(|_, q| !q.is_empty());
        removed
    }
}
