//! Redis-backed channel.
//!
//! Each queue is a Redis list. Publishers `LPUSH` onto the head and
//! consumers `RPOP` from the tail, so messages stay in the broker until a
//! consumer takes them and several consumers can compete for one queue.
//!
//! # Key Schema
//!
//! | Key Pattern | Type | Purpose |
//! |-------------|------|---------|
//! | `{prefix}:orders_queue` | List | Pending mission orders |
//! | `{prefix}:status_queue` | List | Pending status updates |
//!
//! # Usage
//!
//! ```rust,no_run
//! use mission_control::channel::{MessageChannel, Queue, RedisChannel};
//!
//! # async fn example() -> mission_control::Result<()> {
//! let channel = RedisChannel::connect("redis://127.0.0.1:6379")
//!     .await?
//!     .with_prefix("mission-control");
//! channel.publish(Queue::Orders, b"{}".to_vec()).await?;
//! # Ok(())
//! # }
//! ```

use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use futures::stream;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Delivery, DeliveryStream, MessageChannel, Queue};
use crate::backoff::Backoff;
use crate::error::{Error, Result};

const DEFAULT_PREFIX: &str = "mission-control";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CONSUME_RETRY_INITIAL: Duration = Duration::from_millis(500);
const CONSUME_RETRY_MAX: Duration = Duration::from_secs(30);

/// Channel over Redis lists.
///
/// Holds a [`MultiplexedConnection`], which clones cheaply; publishers and
/// consumers each work on their own clone.
#[derive(Clone)]
pub struct RedisChannel {
    conn: MultiplexedConnection,
    key_prefix: String,
    poll_interval: Duration,
}

impl RedisChannel {
    /// Connects to Redis at `url` (`redis://[:<password>@]<host>:<port>[/<db>]`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueUnavailable`] if the client cannot be created
    /// or the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| Error::queue_unavailable(format!("invalid broker URL {}: {}", url, e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::queue_unavailable(format!("failed to connect to broker: {}", e)))?;
        Ok(Self::with_connection(conn))
    }

    /// Connects, retrying with exponential backoff until `max_attempts`
    /// attempts have failed or `cancel` fires.
    pub async fn connect_with_retry(
        url: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match Self::connect(url).await {
                Ok(channel) => {
                    tracing::info!("Connected to broker after {} attempt(s)", attempt);
                    return Ok(channel);
                },
                Err(err) if attempt >= max_attempts.max(1) => {
                    tracing::error!("Giving up on broker after {} attempts: {}", attempt, err);
                    return Err(err);
                },
                Err(err) => {
                    tracing::warn!("Broker connection attempt {} failed: {}", attempt, err);
                    if !backoff.wait(cancel).await {
                        return Err(Error::queue_unavailable("broker connection cancelled"));
                    }
                },
            }
        }
    }

    /// Wraps an existing connection.
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            key_prefix: DEFAULT_PREFIX.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the key prefix (builder pattern).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets how long an idle consumer waits before polling again.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn queue_key(&self, queue: Queue) -> String {
        format!("{}:{}", self.key_prefix, queue.name())
    }
}

impl std::fmt::Debug for RedisChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisChannel")
            .field("key_prefix", &self.key_prefix)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

struct ConsumerState {
    conn: MultiplexedConnection,
    key: String,
    queue: Queue,
    poll_interval: Duration,
    backoff: Backoff,
    cancel: CancellationToken,
}

#[async_trait]
impl MessageChannel for RedisChannel {
    async fn publish(&self, queue: Queue, body: Vec<u8>) -> Result<()> {
        let key = self.queue_key(queue);
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lpush(&key, body.as_slice())
            .await
            .map_err(|e| Error::queue_unavailable(format!("LPUSH {} failed: {}", key, e)))?;
        tracing::trace!("Published message on {}", key);
        Ok(())
    }

    async fn consume_until(
        &self,
        queue: Queue,
        cancel: CancellationToken,
    ) -> Result<DeliveryStream> {
        let state = ConsumerState {
            conn: self.conn.clone(),
            key: self.queue_key(queue),
            queue,
            poll_interval: self.poll_interval,
            backoff: Backoff::new(CONSUME_RETRY_INITIAL, CONSUME_RETRY_MAX),
            cancel,
        };

        let deliveries = stream::unfold(state, |mut state| async move {
            loop {
                if state.cancel.is_cancelled() {
                    tracing::debug!("Consumer on {} cancelled", state.key);
                    return None;
                }
                // Not raced against cancellation: once sent, the pop has
                // removed the message and it must be handed on.
                let popped: ::redis::RedisResult<Option<Vec<u8>>> =
                    state.conn.rpop(&state.key, None).await;
                let pause = match popped {
                    Ok(Some(body)) => {
                        state.backoff.reset();
                        let delivery = Delivery {
                            queue: state.queue,
                            body,
                        };
                        return Some((delivery, state));
                    },
                    Ok(None) => state.poll_interval,
                    Err(err) => {
                        let delay = state.backoff.next_delay();
                        tracing::warn!(
                            "RPOP {} failed: {}; retrying in {:?}",
                            state.key,
                            err,
                            delay
                        );
                        delay
                    },
                };
                tokio::select! {
                    _ = state.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(pause) => {},
                }
            }
        });
        Ok(Box::pin(deliveries))
    }
}
