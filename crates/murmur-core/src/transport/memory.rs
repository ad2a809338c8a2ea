// ABOUTME: In-process broker implementing the Transport trait.
// ABOUTME: Preserves per-channel publish order; used by the CLI server and tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Delivery, DeliverySink, SubscriptionId, Transport};
use crate::error::{BusError, Result};

struct ChannelSub {
    channel: String,
    sink: DeliverySink,
}

struct PatternSub {
    raw: String,
    pattern: glob::Pattern,
    sink: DeliverySink,
}

struct StoredList {
    items: VecDeque<Vec<u8>>,
    expires_at: Option<Instant>,
}

impl StoredList {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct BrokerState {
    next_id: SubscriptionId,
    channels: HashMap<SubscriptionId, ChannelSub>,
    patterns: HashMap<SubscriptionId, PatternSub>,
    lists: HashMap<String, StoredList>,
}

impl BrokerState {
    fn allocate_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        self.next_id
    }

    fn live_list(&mut self, key: &str) -> Option<&mut StoredList> {
        let now = Instant::now();
        if self.lists.get(key).is_some_and(|l| l.is_expired(now)) {
            self.lists.remove(key);
        }
        self.lists.get_mut(key)
    }
}

/// Single-process broker. Subscribers receive deliveries through their sinks.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<BrokerState>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disconnect; every later call fails with a transport error.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.channels.clear();
        state.patterns.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live channel and pattern subscriptions.
    pub async fn subscription_count(&self) -> usize {
        let state = self.state.lock().await;
        state.channels.len() + state.patterns.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(BusError::Transport("transport closed".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Resolve a possibly negative index against a list length.
fn resolve_index(index: i64, len: usize) -> i64 {
    if index < 0 {
        len as i64 + index
    } else {
        index
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;

        // Collect targets, then send without holding the lock.
        let targets: Vec<(SubscriptionId, Option<String>, DeliverySink)> = {
            let state = self.state.lock().await;
            let exact = state
                .channels
                .iter()
                .filter(|(_, sub)| sub.channel == channel)
                .map(|(id, sub)| (*id, None, sub.sink.clone()));
            let patterned = state
                .patterns
                .iter()
                .filter(|(_, sub)| sub.pattern.matches(channel))
                .map(|(id, sub)| (*id, Some(sub.raw.clone()), sub.sink.clone()));
            exact.chain(patterned).collect()
        };

        let mut dead = Vec::new();
        for (id, pattern, sink) in targets {
            let delivery = Delivery {
                channel: channel.to_string(),
                pattern,
                payload: payload.to_vec(),
            };
            if sink.send(delivery).is_err() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            debug!(channel = %channel, dropped = dead.len(), "Pruning closed subscriber sinks");
            let mut state = self.state.lock().await;
            for id in dead {
                state.channels.remove(&id);
                state.patterns.remove(&id);
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str, sink: DeliverySink) -> Result<SubscriptionId> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        state.channels.insert(
            id,
            ChannelSub {
                channel: channel.to_string(),
                sink,
            },
        );
        Ok(id)
    }

    async fn psubscribe(&self, pattern: &str, sink: DeliverySink) -> Result<SubscriptionId> {
        self.ensure_open()?;
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| BusError::Transport(format!("invalid pattern {pattern}: {e}")))?;
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        state.patterns.insert(
            id,
            PatternSub {
                raw: pattern.to_string(),
                pattern: compiled,
                sink,
            },
        );
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.channels.remove(&id);
        state.patterns.remove(&id);
        Ok(())
    }

    async fn push_list(&self, key: &str, value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.live_list(key).is_none() {
            state.lists.insert(
                key.to_string(),
                StoredList {
                    items: VecDeque::new(),
                    expires_at: None,
                },
            );
        }
        if let Some(list) = state.lists.get_mut(key) {
            list.items.push_front(value.to_vec());
        }
        Ok(())
    }

    async fn range_list(&self, key: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let Some(list) = state.live_list(key) else {
            return Ok(Vec::new());
        };

        let len = list.items.len();
        let start = resolve_index(start, len).max(0);
        let end = resolve_index(end, len).min(len as i64 - 1);
        if len == 0 || start > end {
            return Ok(Vec::new());
        }

        Ok(list
            .items
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn set_expiry(&self, key: &str, seconds: u64) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if let Some(list) = state.live_list(key) {
            list.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        self.ensure_open()?;
        drop(self.state.lock().await);
        Ok(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_reaches_exact_subscribers_in_order() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe("agent:a", tx).await.unwrap();

        transport.publish("agent:a", b"one").await.unwrap();
        transport.publish("agent:b", b"ignored").await.unwrap();
        transport.publish("agent:a", b"two").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, b"one");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload, b"two");
        assert_eq!(second.channel, "agent:a");
        assert!(second.pattern.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pattern_subscription() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.psubscribe("agent:*", tx).await.unwrap();

        transport.publish("agent:x", b"1").await.unwrap();
        transport.publish("topic:x", b"2").await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.channel, "agent:x");
        assert_eq!(delivery.pattern.as_deref(), Some("agent:*"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = transport.subscribe("c", tx).await.unwrap();
        transport.unsubscribe(id).await.unwrap();
        transport.publish("c", b"x").await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let transport = MemoryTransport::new();
        let (tx, rx) = mpsc::unbounded_channel();
        transport.subscribe("c", tx).await.unwrap();
        drop(rx);
        transport.publish("c", b"x").await.unwrap();
        assert_eq!(transport.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_list_range_semantics() {
        let transport = MemoryTransport::new();
        for v in [b"a", b"b", b"c"] {
            transport.push_list("queue:x", v).await.unwrap();
        }

        let all = transport.range_list("queue:x", 0, -1).await.unwrap();
        assert_eq!(all, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);

        let head = transport.range_list("queue:x", 0, 1).await.unwrap();
        assert_eq!(head, vec![b"c".to_vec(), b"b".to_vec()]);

        let tail = transport.range_list("queue:x", -1, -1).await.unwrap();
        assert_eq!(tail, vec![b"a".to_vec()]);

        assert!(transport.range_list("queue:x", 5, 10).await.unwrap().is_empty());
        assert!(transport.range_list("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_expiry() {
        let transport = MemoryTransport::new();
        transport.push_list("k", b"v").await.unwrap();
        transport.set_expiry("k", 0).await.unwrap();
        assert!(transport.range_list("k", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_fails_explicitly() {
        let transport = MemoryTransport::new();
        assert!(transport.ping().await.is_ok());
        transport.close().await;

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            transport.publish("c", b"x").await,
            Err(BusError::Transport(_))
        ));
        assert!(transport.subscribe("c", tx).await.is_err());
        assert!(transport.ping().await.is_err());
    }
}
