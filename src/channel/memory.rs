//! In-process channel backed by tokio mpsc queues.

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Delivery, DeliveryStream, MessageChannel, Queue};
use crate::error::{Error, Result};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>;

struct QueueSlot {
    sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    receiver: SharedReceiver,
}

impl QueueSlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// Both queues held in memory.
///
/// Consumers of the same queue share one receiver, so each message reaches
/// exactly one of them. [`close`](Self::close) lets consumers drain what is
/// already queued and then ends their streams.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use mission_control::channel::{InMemoryChannel, MessageChannel, Queue};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let channel = InMemoryChannel::new();
/// let mut orders = channel.consume(Queue::Orders).await.unwrap();
/// channel.publish(Queue::Orders, b"{}".to_vec()).await.unwrap();
/// assert_eq!(orders.next().await.unwrap().body, b"{}");
/// # }
/// ```
pub struct InMemoryChannel {
    queues: HashMap<Queue, QueueSlot>,
}

impl InMemoryChannel {
    /// Creates an open channel with both queues empty.
    pub fn new() -> Self {
        Self {
            queues: Queue::ALL
                .into_iter()
                .map(|queue| (queue, QueueSlot::new()))
                .collect(),
        }
    }

    /// Stops accepting messages on `queue`.
    pub fn close(&self, queue: Queue) {
        if let Some(slot) = self.queues.get(&queue) {
            if slot.sender.lock().take().is_some() {
                tracing::debug!("Closed in-memory queue {}", queue);
            }
        }
    }

    /// Returns `true` once [`close`](Self::close) was called for `queue`.
    pub fn is_closed(&self, queue: Queue) -> bool {
        self.queues
            .get(&queue)
            .map_or(true, |slot| slot.sender.lock().is_none())
    }

    fn slot(&self, queue: Queue) -> Result<&QueueSlot> {
        self.queues
            .get(&queue)
            .ok_or_else(|| Error::queue_unavailable(format!("unknown queue {}", queue)))
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("orders_closed", &self.is_closed(Queue::Orders))
            .field("status_closed", &self.is_closed(Queue::Status))
            .finish()
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn publish(&self, queue: Queue, body: Vec<u8>) -> Result<()> {
        let sender = self
            .slot(queue)?
            .sender
            .lock()
            .clone()
            .ok_or_else(|| Error::queue_unavailable(format!("{} is closed", queue)))?;

        sender
            .send(body)
            .map_err(|_| Error::queue_unavailable(format!("{} has no receiver", queue)))?;
        tracing::trace!("Published message on {}", queue);
        Ok(())
    }

    async fn consume_until(
        &self,
        queue: Queue,
        cancel: CancellationToken,
    ) -> Result<DeliveryStream> {
        let receiver = Arc::clone(&self.slot(queue)?.receiver);
        let deliveries = stream::unfold(receiver, move |receiver| {
            let cancel = cancel.clone();
            async move {
                // Both lock() and recv() are cancel-safe, so nothing is lost
                // when cancellation wins.
                let body = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    body = async { receiver.lock().await.recv().await } => body?,
                };
                Some((Delivery { queue, body }, receiver))
            }
        });
        Ok(Box::pin(deliveries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn messages_flow_in_publish_order() {
        let channel = InMemoryChannel::new();
        let mut stream = channel.consume(Queue::Orders).await.unwrap();

        channel.publish(Queue::Orders, b"a".to_vec()).await.unwrap();
        channel.publish(Queue::Orders, b"b".to_vec()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().body, b"a");
        assert_eq!(stream.next().await.unwrap().body, b"b");
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let channel = InMemoryChannel::new();
        channel.publish(Queue::Status, b"s".to_vec()).await.unwrap();
        channel.close(Queue::Orders);

        let mut orders = channel.consume(Queue::Orders).await.unwrap();
        assert!(orders.next().await.is_none());

        let mut status = channel.consume(Queue::Status).await.unwrap();
        let delivery = status.next().await.unwrap();
        assert_eq!(delivery.queue, Queue::Status);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let channel = InMemoryChannel::new();
        channel.publish(Queue::Orders, b"last".to_vec()).await.unwrap();
        channel.close(Queue::Orders);

        assert!(channel.is_closed(Queue::Orders));
        assert!(matches!(
            channel.publish(Queue::Orders, b"late".to_vec()).await,
            Err(Error::QueueUnavailable(_))
        ));

        let mut stream = channel.consume(Queue::Orders).await.unwrap();
        assert_eq!(stream.next().await.unwrap().body, b"last");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_consumer_leaves_messages_queued() {
        let channel = InMemoryChannel::new();
        let cancel = CancellationToken::new();
        let mut cancelled = channel
            .consume_until(Queue::Orders, cancel.clone())
            .await
            .unwrap();

        cancel.cancel();
        channel.publish(Queue::Orders, b"kept".to_vec()).await.unwrap();
        assert!(cancelled.next().await.is_none());

        let mut fresh = channel.consume(Queue::Orders).await.unwrap();
        assert_eq!(fresh.next().await.unwrap().body, b"kept");
    }

    #[tokio::test]
    async fn competing_consumers_each_get_distinct_messages() {
        let channel = InMemoryChannel::new();
        for i in 0..4u8 {
            channel.publish(Queue::Orders, vec![i]).await.unwrap();
        }
        channel.close(Queue::Orders);

        let first = channel.consume(Queue::Orders).await.unwrap();
        let second = channel.consume(Queue::Orders).await.unwrap();
        let mut seen: Vec<u8> = futures::stream::select(first, second)
            .map(|d| d.body[0])
            .collect()
            .await;
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
