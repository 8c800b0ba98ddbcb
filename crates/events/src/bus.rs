//! Notification publish/watch abstraction (mechanics only).
//!
//! Peers use notifications to nudge each other ("new scan tasks exist,
//! re-poll"). Delivery is best effort: a missed notification only delays
//! work until the next periodic tick, so consumers never depend on it for
//! correctness.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};

/// A stream of messages from a bus.
///
/// Designed for a single consumer. Once every sender is gone, `recv`
/// returns `None`.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// A message published on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Topic-based notification transport.
///
/// Each `watch` returns an independent subscription that receives every
/// notification published on its topic after the call.
pub trait NotificationBus: Send + Sync {
    fn notify(&self, topic: &str, payload: &str) -> Result<(), BusError>;

    fn watch(&self, topic: &str) -> Subscription<Notification>;
}

impl<B> NotificationBus for Arc<B>
where
    B: NotificationBus + ?Sized,
{
    fn notify(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        (**self).notify(topic, payload)
    }

    fn watch(&self, topic: &str) -> Subscription<Notification> {
        (**self).watch(topic)
    }
}
