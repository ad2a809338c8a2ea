// ABOUTME: Publish/subscribe transport abstraction consumed by the router.
// ABOUTME: Channels, pattern subscriptions, and expiring lists for persistence.

mod memory;

pub use memory::MemoryTransport;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Handle returned by subscribe calls, used to cancel them.
pub type SubscriptionId = u64;

/// A payload delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel the payload was published on.
    pub channel: String,
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    pub payload: Vec<u8>,
}

/// Where a transport pushes deliveries for one subscription.
pub type DeliverySink = mpsc::UnboundedSender<Delivery>;

/// Broker operations the router relies on.
///
/// Implementations own their connection lifecycle. Calls must fail with
/// `BusError::Transport` on disconnection rather than hang.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload to every subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Subscribe to an exact channel name.
    async fn subscribe(&self, channel: &str, sink: DeliverySink) -> Result<SubscriptionId>;

    /// Subscribe to every channel matching a glob-style pattern (`agent:*`).
    async fn psubscribe(&self, pattern: &str, sink: DeliverySink) -> Result<SubscriptionId>;

    /// Cancel a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Push a value onto the head of the list at `key`.
    async fn push_list(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Inclusive range over the list at `key`; negative indices count from the tail.
    async fn range_list(&self, key: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>>;

    /// Expire the list at `key` after `seconds`.
    async fn set_expiry(&self, key: &str, seconds: u64) -> Result<()>;

    /// Round-trip latency to the broker.
    async fn ping(&self) -> Result<Duration>;
}
