//! Bounded dispatch of orders to the executor.
//!
//! The pool takes one permit from a semaphore of size `concurrency` before
//! it pulls the next order off the queue, and the permit travels with the
//! spawned handler until the mission is finished. At most `concurrency`
//! missions are therefore in flight, and orders the pool cannot start yet
//! stay in the queue.
//!
//! Shutdown is observed by the orders stream itself, between takes. An order
//! whose take is already under way when shutdown fires is still delivered
//! and executed.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::executor::MissionExecutor;
use crate::auth::TokenManager;
use crate::channel::{Delivery, MessageChannel, Queue};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::types::{MissionStatus, Order, StatusUpdate};

/// State shared by every mission handler.
struct Dispatch {
    channel: Arc<dyn MessageChannel>,
    tokens: TokenManager,
    executor: Arc<dyn MissionExecutor>,
    report_malformed_orders: bool,
}

/// Consumes orders and executes up to `concurrency` missions at once.
///
/// For each order the pool publishes `IN_PROGRESS`, runs the executor and
/// publishes the terminal status. Both updates carry the token manager's
/// current token, read at publish time.
pub struct WorkerPool {
    dispatch: Arc<Dispatch>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Creates a pool. A configured concurrency of 0 is treated as 1.
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        tokens: TokenManager,
        executor: Arc<dyn MissionExecutor>,
        config: &WorkerConfig,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            dispatch: Arc::new(Dispatch {
                channel,
                tokens,
                executor,
                report_malformed_orders: config.report_malformed_orders,
            }),
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops the pool when `parent` is cancelled.
    pub fn with_parent_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Maximum number of missions in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Stops taking new orders. Missions already started run to completion
    /// before [`start`](Self::start) returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the pool until the orders queue ends or [`shutdown`](Self::shutdown)
    /// is called, then waits for in-flight missions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueUnavailable`] if the orders queue cannot be
    /// consumed.
    pub async fn start(&self) -> Result<()> {
        let mut orders = self
            .dispatch
            .channel
            .consume_until(Queue::Orders, self.cancel.clone())
            .await?;
        tracing::info!(
            "Dispatch pool started for {} with concurrency {}",
            self.dispatch.tokens.identity(),
            self.concurrency
        );

        let mut handlers = JoinSet::new();
        loop {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = self.acquire() => permit?,
            };

            let Some(delivery) = orders.next().await else {
                tracing::info!("Orders stream ended");
                break;
            };

            let dispatch = Arc::clone(&self.dispatch);
            handlers.spawn(async move {
                dispatch.handle(delivery).await;
                drop(permit);
            });

            while let Some(finished) = handlers.try_join_next() {
                log_handler_exit(finished);
            }
        }

        tracing::info!("Waiting for {} in-flight mission(s)", handlers.len());
        while let Some(finished) = handlers.join_next().await {
            log_handler_exit(finished);
        }
        tracing::info!("Dispatch pool stopped");
        Ok(())
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("dispatch semaphore closed"))
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("identity", &self.dispatch.tokens.identity())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

fn log_handler_exit(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!("Mission handler panicked: {}", err);
    }
}

impl Dispatch {
    async fn handle(&self, delivery: Delivery) {
        let order = match decode_order(&delivery) {
            Ok(order) => order,
            Err(err) => {
                self.handle_malformed(&delivery, err).await;
                return;
            },
        };

        tracing::info!("Received mission {}", order.mission_id);

        if let Err(err) = self.publish(&order.mission_id, MissionStatus::InProgress).await {
            tracing::error!(
                "Failed to report IN_PROGRESS for mission {}: {}; not executing",
                order.mission_id,
                err
            );
            return;
        }

        let status = self.executor.execute(&order).await.status();

        match self.publish(&order.mission_id, status).await {
            Ok(()) => tracing::info!("Mission {} finished: {}", order.mission_id, status),
            Err(err) => tracing::error!(
                "Failed to report {} for mission {}: {}",
                status,
                order.mission_id,
                err
            ),
        }
    }

    async fn publish(&self, mission_id: &str, status: MissionStatus) -> Result<()> {
        let update = StatusUpdate::new(mission_id, status, self.tokens.current_token());
        self.channel.publish_status(&update).await
    }

    async fn handle_malformed(&self, delivery: &Delivery, err: Error) {
        let salvaged = salvage_mission_id(&delivery.body);
        match (&salvaged, self.report_malformed_orders) {
            (Some(mission_id), true) => {
                tracing::error!("Malformed order for mission {}: {}; reporting FAILED", mission_id, err);
                if let Err(publish_err) = self.publish(mission_id, MissionStatus::Failed).await {
                    tracing::error!(
                        "Failed to report FAILED for malformed mission {}: {}",
                        mission_id,
                        publish_err
                    );
                }
            },
            _ => tracing::error!(
                "Dropping malformed order ({} bytes): {}",
                delivery.body.len(),
                err
            ),
        }
    }
}

fn decode_order(delivery: &Delivery) -> Result<Order> {
    let order: Order = delivery.decode()?;
    if order.mission_id.is_empty() {
        return Err(Error::Malformed("order has an empty mission_id".to_string()));
    }
    Ok(order)
}

/// Reads `mission_id` out of a body that does not decode as an [`Order`].
fn salvage_mission_id(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let id = value.get("mission_id")?.as_str()?;
    (!id.is_empty()).then(|| id.to_string())
}
