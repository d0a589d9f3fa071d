//! Coordinator service: mission intake, status tracking and token issuance.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::TokenCodec;
use crate::channel::{Delivery, MessageChannel, Queue};
use crate::error::{Error, Result};
use crate::registry::{ApplyOutcome, MissionRegistry};
use crate::types::{Mission, StatusUpdate, TokenResponse};

/// The coordinator's operations, independent of transport.
///
/// Cheap to clone; clones share the registry, channel and codec.
///
/// # Examples
///
/// ```
/// use mission_control::auth::TokenCodec;
/// use mission_control::channel::InMemoryChannel;
/// use mission_control::coordinator::CoordinatorService;
/// use mission_control::registry::MissionRegistry;
/// use mission_control::MissionStatus;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> mission_control::Result<()> {
/// let service = CoordinatorService::new(
///     Arc::new(MissionRegistry::new()),
///     Arc::new(InMemoryChannel::new()),
///     Arc::new(TokenCodec::new("secret")),
/// );
///
/// let mission = service.submit("scan-sector-7").await?;
/// assert_eq!(service.mission(&mission.id)?.status, MissionStatus::Queued);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CoordinatorService {
    registry: Arc<MissionRegistry>,
    channel: Arc<dyn MessageChannel>,
    codec: Arc<TokenCodec>,
}

impl CoordinatorService {
    /// Creates a service over its collaborators.
    pub fn new(
        registry: Arc<MissionRegistry>,
        channel: Arc<dyn MessageChannel>,
        codec: Arc<TokenCodec>,
    ) -> Self {
        Self {
            registry,
            channel,
            codec,
        }
    }

    /// The mission registry.
    pub fn registry(&self) -> &Arc<MissionRegistry> {
        &self.registry
    }

    /// The token codec.
    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Accepts a mission: registers it as `Queued` and publishes the order.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for an empty payload
    /// - [`Error::QueueUnavailable`] if the order could not be published;
    ///   the mission stays registered as `Queued`
    pub async fn submit(&self, payload: &str) -> Result<Mission> {
        if payload.is_empty() {
            return Err(Error::invalid_request("payload must not be empty"));
        }

        let mission = self.registry.create(Uuid::new_v4().to_string(), payload)?;
        if let Err(err) = self.channel.publish_order(&mission).await {
            tracing::error!("Failed to queue mission {}: {}", mission.id, err);
            return Err(Error::queue_unavailable(format!(
                "mission {} could not be queued: {}",
                mission.id, err
            )));
        }

        tracing::info!("Mission {} queued", mission.id);
        Ok(mission)
    }

    /// Looks up a mission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn mission(&self, id: &str) -> Result<Mission> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Issues a fresh token for `identity`.
    pub fn issue_token(&self, identity: &str) -> Result<TokenResponse> {
        if identity.is_empty() {
            return Err(Error::invalid_request("soldier_id must not be empty"));
        }
        let token = self
            .codec
            .issue(identity)
            .map_err(|e| Error::internal(e.to_string()))?;
        tracing::debug!("Issued token for {}", identity);
        Ok(TokenResponse {
            token,
            expires_in: self.codec.validity().as_secs(),
        })
    }

    /// Exchanges a still-valid token for a new one with the same identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if `bearer` does not verify, including when
    /// it has expired.
    pub fn renew_token(&self, bearer: &str) -> Result<TokenResponse> {
        let claims = self.codec.verify(bearer).map_err(|e| {
            tracing::warn!("Rejected token renewal: {}", e);
            Error::from(e)
        })?;
        self.issue_token(claims.identity())
    }

    /// Verifies the token on a status update and applies it to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the embedded token does not verify. Duplicate, backwards and unknown-mission updates are not
    /// errors; they are reported through the returned [`ApplyOutcome`].
    pub fn apply_status_update(&self, update: &StatusUpdate) -> Result<ApplyOutcome> {
        let claims = self
            .codec
            .verify(&update.token)?;

        let outcome = self.registry.apply_status(&update.mission_id, update.status);
        match outcome {
            ApplyOutcome::Applied { from, to } => tracing::info!(
                "Mission {} {} -> {} (reported by {})",
                update.mission_id,
                from,
                to,
                claims.identity()
            ),
            ApplyOutcome::Duplicate => tracing::debug!(
                "Ignoring duplicate {} for mission {}",
                update.status,
                update.mission_id
            ),
            ApplyOutcome::Rejected { current, proposed } => tracing::warn!(
                "Ignoring {} for mission {} already {}",
                proposed,
                update.mission_id,
                current
            ),
            ApplyOutcome::Unknown => tracing::warn!(
                "Ignoring {} for unknown mission {}",
                update.status,
                update.mission_id
            ),
        }
        Ok(outcome)
    }

    /// Starts applying status updates from the status queue until the queue
    /// ends or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the status queue cannot be consumed.
    pub async fn spawn_status_consumer(
        &self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut updates = self.channel.consume_until(Queue::Status, cancel).await?;
        let service = self.clone();

        Ok(tokio::spawn(async move {
            tracing::info!("Status consumer started");
            while let Some(delivery) = updates.next().await {
                service.handle_status_delivery(&delivery);
            }
            tracing::info!(
                "Status consumer stopped with {:?}",
                service.registry.counts()
            );
        }))
    }

    fn handle_status_delivery(&self, delivery: &Delivery) {
        let update: StatusUpdate = match delivery.decode() {
            Ok(update) => update,
            Err(err) => {
                tracing::error!("Dropping malformed status update: {}", err);
                return;
            },
        };

        if let Err(err) = self.apply_status_update(&update) {
            tracing::warn!(
                "Dropping status update for mission {}: {}",
                update.mission_id,
                err
            );
        }
    }
}

impl std::fmt::Debug for CoordinatorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorService")
            .field("missions", &self.registry.len())
            .field("codec", &self.codec)
            .finish()
    }
}
