//! Message channel between the coordinator and its workers.
//!
//! Two named queues carry JSON messages: [`Queue::Orders`] from the
//! coordinator to workers and [`Queue::Status`] back. Delivery is
//! at-least-once and unordered; nothing downstream relies on either ordering
//! or exactly-once delivery.
//!
//! | Adapter | Backing | Durability |
//! |---------|---------|------------|
//! | [`InMemoryChannel`] | tokio mpsc | process lifetime |
//! | `RedisChannel` (feature `redis`) | Redis lists | broker |

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::constants::{ORDERS_QUEUE, STATUS_QUEUE};
use crate::error::{Error, Result};
use crate::types::{Mission, StatusUpdate};

pub use memory::InMemoryChannel;
#[cfg(feature = "redis")]
pub use self::redis::RedisChannel;

/// The two queues of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Mission orders, coordinator to workers.
    Orders,
    /// Status updates, workers to coordinator.
    Status,
}

impl Queue {
    /// Both queues.
    pub const ALL: [Queue; 2] = [Queue::Orders, Queue::Status];

    /// Broker-level queue name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Orders => ORDERS_QUEUE,
            Self::Status => STATUS_QUEUE,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One message taken off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message came from.
    pub queue: Queue,
    /// Raw message body.
    pub body: Vec<u8>,
}

impl Delivery {
    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the body is not valid JSON for `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Stream of deliveries from one queue. Ends when the queue is closed or
/// the consumer's cancellation token fires.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Publish/consume access to the two queues.
///
/// Several consumers of the same queue compete: each message is handed to
/// one of them.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Appends `body` to `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueUnavailable`] if the queue cannot accept it.
    async fn publish(&self, queue: Queue, body: Vec<u8>) -> Result<()>;

    /// Opens a consumer on `queue` that stops taking messages once `cancel`
    /// fires.
    ///
    /// Cancellation only ends the stream between messages. A take already
    /// issued to the broker completes and its message is still yielded, so
    /// callers should keep polling until the stream ends rather than racing
    /// `next()` against their own shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueUnavailable`] if the consumer cannot be set up.
    async fn consume_until(&self, queue: Queue, cancel: CancellationToken)
        -> Result<DeliveryStream>;

    /// Opens a consumer on `queue` that runs until the queue is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueUnavailable`] if the consumer cannot be set up.
    async fn consume(&self, queue: Queue) -> Result<DeliveryStream> {
        self.consume_until(queue, CancellationToken::new()).await
    }

    /// Publishes a mission record on the orders queue.
    async fn publish_order(&self, mission: &Mission) -> Result<()> {
        let body = serde_json::to_vec(mission)
            .map_err(|e| Error::internal(format!("failed to encode order: {}", e)))?;
        self.publish(Queue::Orders, body).await
    }

    /// Publishes a status update on the status queue.
    async fn publish_status(&self, update: &StatusUpdate) -> Result<()> {
        let body = serde_json::to_vec(update)
            .map_err(|e| Error::internal(format!("failed to encode status update: {}", e)))?;
        self.publish(Queue::Status, body).await
    }
}
