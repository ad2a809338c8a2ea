// ABOUTME: Message handler trait invoked when a message is dispatched to an agent.
// ABOUTME: FnHandler adapts async closures so callers need not write a struct.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

use crate::message::Message;

/// Processes messages addressed to one agent.
///
/// Returning `Some(value)` for a message that expects a reply sends `value`
/// back to the requester as a response. Errors are logged by the router and
/// never reach the transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Value>>;
}

/// Handler backed by an async closure.
///
/// ```
/// use murmur_core::{FnHandler, Message};
///
/// let echo = FnHandler::new(|msg: Message| async move { anyhow::Ok(Some(msg.payload)) });
/// # let _ = echo;
/// ```
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send,
{
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Value>> {
        (self.func)(message).await
    }
}
