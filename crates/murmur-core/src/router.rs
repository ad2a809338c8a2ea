// ABOUTME: Message router: delivery targets, subscriptions, history, and request/response.
// ABOUTME: One pump task per subscribed agent plus one correlation listener on agent:*.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RouterConfig;
use crate::error::{BusError, Result};
use crate::handler::MessageHandler;
use crate::history::{HistoryFilter, MessageHistory};
use crate::message::{
    generate_correlation_id, Codec, Message, MessageMetadata, MessageType, Priority,
};
use crate::registry::{AgentRegistry, AgentRole};
use crate::transport::{Delivery, DeliverySink, SubscriptionId, Transport};

/// Reserved topic every registered agent listens on.
pub const BROADCAST_TOPIC: &str = "broadcast";

/// Channel carrying point-to-point messages for `agent_id`.
pub fn agent_channel(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

/// Channel carrying a topic. The reserved broadcast topic maps to `agent:broadcast`.
pub fn topic_channel(topic: &str) -> String {
    if topic == BROADCAST_TOPIC {
        agent_channel(BROADCAST_TOPIC)
    } else {
        format!("topic:{topic}")
    }
}

/// Transport list holding persisted messages for `agent_id`.
pub fn queue_key(agent_id: &str) -> String {
    format!("queue:{agent_id}")
}

const CORRELATION_PATTERN: &str = "agent:*";

/// Envelope fields a caller may set when sending.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub kind: MessageType,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub requires_response: bool,
    pub metadata: Option<MessageMetadata>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            kind: MessageType::Direct,
            correlation_id: None,
            reply_to: None,
            requires_response: false,
            metadata: None,
        }
    }
}

impl SendOptions {
    pub fn of_kind(kind: MessageType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Restricts which broadcast and topic deliveries reach a subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<BTreeSet<MessageType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priorities: Option<BTreeSet<Priority>>,
}

impl SubscriptionFilter {
    pub fn matches(&self, message: &Message) -> bool {
        self.types
            .as_ref()
            .map_or(true, |types| types.contains(&message.kind))
            && self
                .priorities
                .as_ref()
                .map_or(true, |p| p.contains(&message.priority()))
    }
}

/// Public view of one agent's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub agent_id: String,
    pub topics: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<SubscriptionFilter>,
}

struct Subscription {
    topics: BTreeSet<String>,
    filter: Option<SubscriptionFilter>,
    /// Transport subscription per channel; `None` while the subscribe call is in flight.
    channels: HashMap<String, Option<SubscriptionId>>,
    sink: DeliverySink,
    pump: JoinHandle<()>,
}

struct PendingRequest {
    tx: oneshot::Sender<Value>,
    to: String,
    deadline: Instant,
}

/// Counters exposed through `metrics()`.
#[derive(Debug, Default)]
struct RouterMetrics {
    published: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
    invalid: AtomicU64,
    responses_matched: AtomicU64,
    late_responses: AtomicU64,
    timeouts: AtomicU64,
    last_error: std::sync::Mutex<Option<String>>,
}

impl RouterMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, message: String) {
        Self::bump(&self.errors);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_published: self.published.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            invalid_messages: self.invalid.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            requests_timed_out: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub messages_published: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub invalid_messages: u64,
    pub responses_matched: u64,
    pub late_responses: u64,
    pub requests_timed_out: u64,
}

/// Routes messages between agents over a transport.
pub struct Router {
    this: Weak<Router>,
    transport: Arc<dyn Transport>,
    registry: Arc<AgentRegistry>,
    codec: Codec,
    config: RouterConfig,
    history: Mutex<MessageHistory>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    correlation: Mutex<Option<(SubscriptionId, JoinHandle<()>)>>,
    metrics: RouterMetrics,
}

impl Router {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<AgentRegistry>,
        codec: Codec,
        config: RouterConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            transport,
            registry,
            codec,
            history: Mutex::new(MessageHistory::new(config.max_history)),
            config,
            subscriptions: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            correlation: Mutex::new(None),
            metrics: RouterMetrics::default(),
        })
    }

    /// Start the correlation listener that matches responses to pending requests.
    pub async fn start(&self) -> Result<()> {
        let mut correlation = self.correlation.lock().await;
        if correlation.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.transport.psubscribe(CORRELATION_PATTERN, tx).await?;
        let pump = tokio::spawn(run_correlation_pump(self.this.clone(), rx));
        *correlation = Some((id, pump));
        debug!(pattern = CORRELATION_PATTERN, "Correlation listener started");
        Ok(())
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send without checking the recipient's liveness. Broadcasts go to the
    /// topic channel when `metadata.topic` is set, otherwise to `agent:broadcast`.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        options: SendOptions,
    ) -> Result<String> {
        let message = Message {
            correlation_id: options.correlation_id,
            reply_to: options.reply_to,
            requires_response: options.requires_response,
            metadata: options.metadata,
            ..Message::new(from, to, options.kind, payload)
        };
        self.publish_message(message).await
    }

    /// Point-to-point delivery to a live agent.
    pub async fn send_to_agent(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        options: SendOptions,
    ) -> Result<String> {
        if !self.registry.is_alive(to).await {
            return Err(BusError::AgentUnavailable(to.to_string()));
        }
        self.send_message(from, to, payload, options).await
    }

    /// Send to every live agent of `role` at call time. Per-target failures are
    /// logged and skipped; the ids of successful sends come back in send order.
    pub async fn broadcast_to_role(
        &self,
        from: &str,
        role: AgentRole,
        payload: Value,
        options: SendOptions,
    ) -> Vec<String> {
        let targets = self.registry.live_agents_by_role(role).await;
        let mut ids = Vec::with_capacity(targets.len());

        for target in targets {
            match self
                .send_message(from, &target.id, payload.clone(), options.clone())
                .await
            {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(agent_id = %target.id, role = %role, error = %e, "Broadcast to agent failed")
                }
            }
        }

        ids
    }

    /// Send a request and wait for the matching response or the deadline.
    pub async fn request_response(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if !self.registry.is_alive(to).await {
            return Err(BusError::AgentUnavailable(to.to_string()));
        }

        let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
        let correlation_id = generate_correlation_id();
        let (tx, mut rx) = oneshot::channel();

        self.pending.lock().await.insert(
            correlation_id.clone(),
            PendingRequest {
                tx,
                to: to.to_string(),
                deadline: Instant::now() + timeout,
            },
        );

        let options = SendOptions {
            kind: MessageType::Request,
            correlation_id: Some(correlation_id.clone()),
            reply_to: Some(from.to_string()),
            requires_response: true,
            metadata: None,
        };
        if let Err(e) = self.send_message(from, to, payload, options).await {
            self.pending.lock().await.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BusError::Transport(
                "request cancelled: router shut down".to_string(),
            )),
            Err(_) => {
                // Whoever removes the pending entry wins. The resolver sends while
                // holding the lock, so a missing entry means the value is waiting.
                let removed = self.pending.lock().await.remove(&correlation_id);
                if removed.is_none() {
                    if let Ok(value) = rx.try_recv() {
                        return Ok(value);
                    }
                }
                RouterMetrics::bump(&self.metrics.timeouts);
                warn!(correlation_id = %correlation_id, to = %to, "Request timed out");
                Err(BusError::RequestTimeout {
                    correlation_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn publish_message(&self, mut message: Message) -> Result<String> {
        message.validate()?;
        self.codec.seal(&mut message)?;
        let bytes = self.codec.encode(&message)?;

        let broadcast = message.is_broadcast();
        let channel = if broadcast {
            message
                .topic()
                .map(topic_channel)
                .unwrap_or_else(|| topic_channel(BROADCAST_TOPIC))
        } else {
            agent_channel(&message.to)
        };

        if let Err(e) = self.transport.publish(&channel, &bytes).await {
            self.metrics.record_error(e.to_string());
            return Err(e);
        }
        RouterMetrics::bump(&self.metrics.published);

        if !message.is_heartbeat() {
            let mut history = self.history.lock().await;
            history.append(&message.from, message.clone());
            if !broadcast && message.to != message.from {
                history.append(&message.to, message.clone());
            }
        }

        if self.config.persist_history && !message.is_heartbeat() {
            self.persist(&message.to, &bytes).await;
        }

        debug!(message_id = %message.id, channel = %channel, kind = %message.kind, "Published message");
        Ok(message.id)
    }

    async fn persist(&self, to: &str, bytes: &[u8]) {
        let key = queue_key(to);
        let result = async {
            self.transport.push_list(&key, bytes).await?;
            self.transport
                .set_expiry(&key, self.config.queue_ttl_secs)
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to persist message");
            self.metrics.record_error(e.to_string());
        }
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    async fn on_delivery(&self, agent_id: &str, delivery: Delivery) {
        let message = match self.codec.decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                RouterMetrics::bump(&self.metrics.invalid);
                warn!(agent_id = %agent_id, channel = %delivery.channel, error = %e, "Dropping invalid message");
                return;
            }
        };
        RouterMetrics::bump(&self.metrics.received);

        // The correlation listener owns responses; uncorrelated ones go nowhere.
        if message.kind == MessageType::Response {
            if message.correlation_id.is_none() {
                info!(agent_id = %agent_id, message_id = %message.id, "Dropping response with no correlation id");
            }
            return;
        }

        let own_channel = delivery.channel == agent_channel(agent_id);
        if !own_channel {
            if message.from == agent_id {
                return;
            }
            let filter = {
                let subscriptions = self.subscriptions.lock().await;
                match subscriptions.get(agent_id) {
                    Some(sub) => sub.filter.clone(),
                    None => return,
                }
            };
            if filter.as_ref().is_some_and(|f| !f.matches(&message)) {
                debug!(agent_id = %agent_id, message_id = %message.id, "Filtered out delivery");
                return;
            }
            if !message.is_heartbeat() {
                self.history.lock().await.append(agent_id, message.clone());
            }
        }

        self.handle_incoming(agent_id, message).await;
    }

    /// Process a message delivered to `agent_id`.
    ///
    /// Heartbeats only refresh liveness, responses settle their pending request
    /// or are dropped, and everything else goes to the recipient's handler. Handler errors are
    /// logged and never propagate.
    pub async fn handle_incoming(&self, agent_id: &str, message: Message) {
        self.registry.touch(&message.from).await;

        if message.is_heartbeat() {
            return;
        }

        if message.kind == MessageType::Response {
            match message.correlation_id.as_deref() {
                Some(correlation_id) => {
                    self.resolve_pending(correlation_id, message.payload.clone())
                        .await;
                }
                None => {
                    info!(message_id = %message.id, "Dropping response with no correlation id");
                }
            }
            return;
        }

        let target = if message.is_broadcast() {
            agent_id.to_string()
        } else {
            message.to.clone()
        };
        let handler = self.handlers.read().await.get(&target).cloned();
        let Some(handler) = handler else {
            debug!(agent_id = %target, message_id = %message.id, "No handler registered");
            return;
        };

        let expects_reply = message.expects_reply();
        let reply_to = message
            .reply_to
            .clone()
            .unwrap_or_else(|| message.from.clone());
        let correlation_id = message.correlation_id.clone();
        let message_id = message.id.clone();

        match handler.handle(message).await {
            Ok(Some(reply)) if expects_reply => {
                let options = SendOptions {
                    kind: MessageType::Response,
                    correlation_id,
                    ..Default::default()
                };
                if let Err(e) = self.send_message(&target, &reply_to, reply, options).await {
                    error!(agent_id = %target, error = %e, "Failed to send auto-reply");
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(agent_id = %target, message_id = %message_id, error = %e, "Message handler failed");
                self.metrics.record_error(format!("handler for {target}: {e}"));
            }
        }
    }

    async fn resolve_pending(&self, correlation_id: &str, payload: Value) {
        let mut pending = self.pending.lock().await;
        match pending.remove(correlation_id) {
            Some(request) => {
                if request.tx.send(payload).is_ok() {
                    RouterMetrics::bump(&self.metrics.responses_matched);
                    debug!(correlation_id = %correlation_id, responder = %request.to, "Matched response");
                }
            }
            None => {
                RouterMetrics::bump(&self.metrics.late_responses);
                info!(correlation_id = %correlation_id, "Dropping response with no pending request");
            }
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Add `topics` to the agent's subscription and replace its filter.
    /// The agent's own channel is always included.
    pub async fn subscribe(
        &self,
        agent_id: &str,
        topics: &[String],
        filter: Option<SubscriptionFilter>,
    ) -> Result<()> {
        let (sink, needed) = {
            let mut subscriptions = self.subscriptions.lock().await;
            let sub = subscriptions
                .entry(agent_id.to_string())
                .or_insert_with(|| self.new_subscription(agent_id));
            sub.filter = filter;

            let mut needed = Vec::new();
            let own = agent_channel(agent_id);
            if !sub.channels.contains_key(&own) {
                sub.channels.insert(own.clone(), None);
                needed.push(own);
            }
            for topic in topics {
                sub.topics.insert(topic.clone());
                let channel = topic_channel(topic);
                if !sub.channels.contains_key(&channel) {
                    sub.channels.insert(channel.clone(), None);
                    needed.push(channel);
                }
            }
            (sub.sink.clone(), needed)
        };

        let mut results = Vec::with_capacity(needed.len());
        for channel in needed {
            let result = self.transport.subscribe(&channel, sink.clone()).await;
            results.push((channel, result));
        }

        let mut first_error = None;
        let mut orphaned = Vec::new();
        {
            let mut subscriptions = self.subscriptions.lock().await;
            let sub = subscriptions.get_mut(agent_id);
            match sub {
                Some(sub) => {
                    for (channel, result) in results {
                        match result {
                            Ok(id) if sub.channels.contains_key(&channel) => {
                                sub.channels.insert(channel, Some(id));
                            }
                            Ok(id) => orphaned.push(id),
                            Err(e) => {
                                sub.channels.remove(&channel);
                                sub.topics.retain(|t| topic_channel(t) != channel);
                                first_error.get_or_insert(e);
                            }
                        }
                    }
                }
                None => {
                    for (_, result) in results {
                        match result {
                            Ok(id) => orphaned.push(id),
                            Err(e) => {
                                first_error.get_or_insert(e);
                            }
                        }
                    }
                }
            }
        }

        for id in orphaned {
            self.transport.unsubscribe(id).await.ok();
        }

        match first_error {
            Some(e) => {
                self.metrics.record_error(e.to_string());
                Err(e)
            }
            None => {
                debug!(agent_id = %agent_id, topics = ?topics, "Subscribed");
                Ok(())
            }
        }
    }

    fn new_subscription(&self, agent_id: &str) -> Subscription {
        let (sink, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_agent_pump(self.this.clone(), agent_id.to_string(), rx));
        Subscription {
            topics: BTreeSet::new(),
            filter: None,
            channels: HashMap::new(),
            sink,
            pump,
        }
    }

    /// Drop `topics` from the agent's subscription, or the whole subscription
    /// when `topics` is `None`. Unknown agents are ignored.
    pub async fn unsubscribe(&self, agent_id: &str, topics: Option<&[String]>) -> Result<()> {
        let ids: Vec<SubscriptionId> = {
            let mut subscriptions = self.subscriptions.lock().await;
            match topics {
                None => match subscriptions.remove(agent_id) {
                    Some(sub) => sub.channels.into_values().flatten().collect(),
                    None => return Ok(()),
                },
                Some(topics) => match subscriptions.get_mut(agent_id) {
                    Some(sub) => {
                        let mut ids = Vec::new();
                        for topic in topics {
                            if sub.topics.remove(topic.as_str()) {
                                if let Some(Some(id)) = sub.channels.remove(&topic_channel(topic)) {
                                    ids.push(id);
                                }
                            }
                        }
                        ids
                    }
                    None => return Ok(()),
                },
            }
        };

        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.transport.unsubscribe(id).await {
                first_error.get_or_insert(e);
            }
        }

        debug!(agent_id = %agent_id, topics = ?topics, "Unsubscribed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let subscriptions = self.subscriptions.lock().await;
        let mut out: Vec<SubscriptionInfo> = subscriptions
            .iter()
            .map(|(agent_id, sub)| SubscriptionInfo {
                agent_id: agent_id.clone(),
                topics: sub.topics.clone(),
                filter: sub.filter.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        out
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    pub async fn register_handler(&self, agent_id: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .await
            .insert(agent_id.to_string(), handler);
    }

    pub async fn remove_handler(&self, agent_id: &str) {
        self.handlers.write().await.remove(agent_id);
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Most recent `limit` (default from config) messages newer than `since`,
    /// most recent last.
    pub async fn get_messages(
        &self,
        agent_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
        filter: &HistoryFilter,
    ) -> Vec<Message> {
        let limit = limit.unwrap_or(self.config.default_limit);
        self.history
            .lock()
            .await
            .query(agent_id, since, limit, filter)
    }

    /// Full unexpired history for an agent, oldest first.
    pub async fn history_snapshot(&self, agent_id: &str) -> Vec<Message> {
        self.history.lock().await.snapshot(agent_id)
    }

    pub async fn purge_expired(&self) -> usize {
        self.history.lock().await.purge_expired(Utc::now())
    }

    /// (agents with history, total stored messages)
    pub async fn history_stats(&self) -> (usize, usize) {
        let history = self.history.lock().await;
        (history.agent_count(), history.total_messages())
    }

    /// Messages persisted in the transport list for `agent_id`, newest first.
    pub async fn stored_messages(&self, agent_id: &str, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .transport
            .range_list(&queue_key(agent_id), 0, limit as i64 - 1)
            .await?;

        Ok(raw
            .iter()
            .filter_map(|bytes| match self.codec.decode(bytes) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Skipping invalid stored message");
                    None
                }
            })
            .collect())
    }

    // ========================================================================
    // Observability
    // ========================================================================

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Pending requests whose deadline has already passed.
    pub async fn overdue_requests(&self) -> usize {
        let now = Instant::now();
        self.pending
            .lock()
            .await
            .values()
            .filter(|p| p.deadline <= now)
            .count()
    }

    pub async fn ping(&self) -> Result<Duration> {
        self.transport.ping().await
    }

    /// Stop every pump, drop all subscriptions, and fail outstanding requests.
    pub async fn shutdown(&self) {
        let subscriptions: Vec<Subscription> = {
            let mut map = self.subscriptions.lock().await;
            map.drain().map(|(_, sub)| sub).collect()
        };
        for sub in subscriptions {
            for id in sub.channels.into_values().flatten() {
                self.transport.unsubscribe(id).await.ok();
            }
            sub.pump.abort();
        }

        if let Some((id, pump)) = self.correlation.lock().await.take() {
            self.transport.unsubscribe(id).await.ok();
            pump.abort();
        }

        let dropped = {
            let mut pending = self.pending.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            info!(count = dropped, "Cancelled pending requests on shutdown");
        }
    }
}

async fn run_agent_pump(
    router: Weak<Router>,
    agent_id: String,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    while let Some(delivery) = rx.recv().await {
        let Some(router) = router.upgrade() else {
            break;
        };
        router.on_delivery(&agent_id, delivery).await;
    }
    debug!(agent_id = %agent_id, "Subscription pump stopped");
}

async fn run_correlation_pump(router: Weak<Router>, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        let Some(router) = router.upgrade() else {
            break;
        };
        let message = match router.codec.decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(channel = %delivery.channel, error = %e, "Correlation listener skipped message");
                continue;
            }
        };
        if message.kind == MessageType::Response && message.correlation_id.is_some() {
            let to = message.to.clone();
            router.handle_incoming(&to, message).await;
        }
    }
    debug!("Correlation listener stopped");
}
