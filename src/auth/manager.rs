//! Token lifecycle manager.
//!
//! Holds the current bearer token for one identity, renews it shortly
//! before it expires and collapses concurrent renewal attempts into a single
//! network call.
//!
//! # States
//!
//! ```text
//! Idle ──(expiry - lead reached / refresh())──> RefreshPending
//! RefreshPending ──(success)──> Idle            (token + expiry replaced)
//! RefreshPending ──(failure)──> Idle | Expired  (backoff, then retry)
//! ```
//!
//! # Single-flight
//!
//! The first caller of [`TokenManager::refresh`] installs a shared in-flight
//! future under the state lock; every caller arriving while it is pending
//! clones and awaits that same future. Exactly one renewal request is made,
//! all callers resume once it resolves and all observe its outcome. The
//! outcome carries no token: callers read [`TokenManager::current_token`]
//! afterwards.
//!
//! Token reads never wait for a renewal. They take the state lock only long
//! enough to clone the current value.
//!
//! # Scheduling
//!
//! The loop renews at `expiry - lead`, where the lead is the policy's lead
//! capped at half the token's lifetime. A token that lives no longer than the
//! lead is therefore still renewed at a steady pace rather than back to back.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::client::{RenewalError, TokenRenewer};
use crate::backoff::Backoff;
use crate::constants::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_RENEWAL_LEAD};
use crate::error::{Error, Result};

type RenewalFlight = Shared<BoxFuture<'static, std::result::Result<(), RenewalError>>>;

/// The token currently held for an identity.
#[derive(Clone)]
pub struct TokenRecord {
    /// Signed credential.
    pub value: String,
    /// Instant after which the token is no longer valid.
    pub expiry: Instant,
    /// Identity bound into the token's claims.
    pub identity: String,
    /// Instant the token was received.
    pub issued_at: Instant,
}

impl TokenRecord {
    fn new(value: String, expires_in: Duration, identity: String) -> Self {
        let issued_at = Instant::now();
        Self {
            value,
            expiry: issued_at + expires_in,
            identity,
            issued_at,
        }
    }

    /// Total lifetime the token was granted.
    pub fn validity(&self) -> Duration {
        self.expiry.saturating_duration_since(self.issued_at)
    }

    /// Returns `true` once the expiry has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expiry
    }

    /// Returns `true` if less than `threshold` remains.
    pub fn expires_soon(&self, threshold: Duration) -> bool {
        self.expiry.saturating_duration_since(Instant::now()) < threshold
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("identity", &self.identity)
            .field("expiry", &self.expiry)
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// Timing of the background renewal loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// How long before expiry to renew.
    pub lead: Duration,
    /// First delay after a failed renewal.
    pub initial_backoff: Duration,
    /// Cap for the doubling backoff.
    pub max_backoff: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            lead: DEFAULT_RENEWAL_LEAD,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

struct InFlight {
    id: u64,
    flight: RenewalFlight,
}

#[derive(Default)]
struct TokenState {
    record: Option<TokenRecord>,
    in_flight: Option<InFlight>,
    next_flight_id: u64,
}

struct Inner {
    identity: String,
    renewer: Arc<dyn TokenRenewer>,
    state: Arc<Mutex<TokenState>>,
    started: AtomicBool,
}

/// Keeps one identity's bearer token fresh.
///
/// Cheap to clone; clones share the same token state and renewal loop.
///
/// # Examples
///
/// ```rust,no_run
/// use mission_control::auth::{HttpTokenClient, TokenManager};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Arc::new(HttpTokenClient::new("http://commander-service:8080")?);
/// let grant = client.issue("soldier-1").await?;
///
/// let manager = TokenManager::new("soldier-1", client);
/// manager.start(grant.token, grant.expires_in)?;
///
/// let bearer = manager.current_token();
/// # let _ = bearer;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
    policy: RenewalPolicy,
    cancel: CancellationToken,
}

impl TokenManager {
    /// Creates a manager for `identity` renewing through `renewer`.
    pub fn new(identity: impl Into<String>, renewer: Arc<dyn TokenRenewer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity: identity.into(),
                renewer,
                state: Arc::new(Mutex::new(TokenState::default())),
                started: AtomicBool::new(false),
            }),
            policy: RenewalPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Overrides the renewal timing. Must be applied before [`start`](Self::start).
    pub fn with_policy(mut self, policy: RenewalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ties the renewal loop to a parent token: cancelling `parent` stops it.
    /// Must be applied before [`start`](Self::start).
    pub fn with_parent_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Seeds the initial token and spawns the renewal loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the manager was already started.
    pub fn start(
        &self,
        initial_token: impl Into<String>,
        expires_in: Duration,
    ) -> Result<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::internal(format!(
                "token manager for {} already started",
                self.inner.identity
            )));
        }

        self.inner.state.lock().record = Some(TokenRecord::new(
            initial_token.into(),
            expires_in,
            self.inner.identity.clone(),
        ));

        let manager = self.clone();
        Ok(tokio::spawn(async move { manager.run_renewal_loop().await }))
    }

    /// Returns the latest known token without waiting.
    ///
    /// While a renewal is pending this is the token that was valid before it
    /// started. Empty until [`start`](Self::start) has been called.
    pub fn current_token(&self) -> String {
        self.inner
            .state
            .lock()
            .record
            .as_ref()
            .map(|record| record.value.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the held token record.
    pub fn record(&self) -> Option<TokenRecord> {
        self.inner.state.lock().record.clone()
    }

    /// Identity this manager renews for.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Expiry of the held token.
    pub fn expires_at(&self) -> Option<Instant> {
        self.inner.state.lock().record.as_ref().map(|r| r.expiry)
    }

    /// Returns `true` if no token is held or the held one has expired.
    pub fn is_expired(&self) -> bool {
        self.inner
            .state
            .lock()
            .record
            .as_ref()
            .map_or(true, TokenRecord::is_expired)
    }

    /// Returns `true` while a renewal request is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    /// Renews the token, joining a renewal that is already in flight.
    ///
    /// Resolves once the single outstanding renewal call resolves, with
    /// that call's outcome. Read [`current_token`](Self::current_token)
    /// afterwards for the new value.
    pub async fn refresh(&self) -> std::result::Result<(), RenewalError> {
        let (_, flight) = self.join_or_start_flight();
        flight.await
    }

    fn join_or_start_flight(&self) -> (u64, RenewalFlight) {
        let mut state = self.inner.state.lock();
        if let Some(in_flight) = &state.in_flight {
            tracing::debug!(
                "Joining in-flight token renewal for {}",
                self.inner.identity
            );
            return (in_flight.id, in_flight.flight.clone());
        }

        let id = state.next_flight_id;
        state.next_flight_id = state.next_flight_id.wrapping_add(1);
        let current = state
            .record
            .as_ref()
            .map(|record| record.value.clone())
            .unwrap_or_default();
        let flight = renew_once(
            Arc::clone(&self.inner.renewer),
            Arc::downgrade(&self.inner.state),
            self.inner.identity.clone(),
            current,
            id,
        )
        .boxed()
        .shared();
        state.in_flight = Some(InFlight {
            id,
            flight: flight.clone(),
        });
        (id, flight)
    }

    /// Forgets flight `id` if it is still the pending one.
    fn abandon_flight(&self, id: u64) {
        let mut state = self.inner.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight = None;
        }
    }

    /// Stops the renewal loop at its next suspension point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops the renewal loop when cancelled.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn renewal_lead(&self, record: &TokenRecord) -> Duration {
        self.policy.lead.min(record.validity() / 2)
    }

    fn time_until_renewal(&self) -> Duration {
        let state = self.inner.state.lock();
        state
            .record
            .as_ref()
            .and_then(|record| record.expiry.checked_sub(self.renewal_lead(record)))
            .map_or(Duration::ZERO, |at| {
                at.saturating_duration_since(Instant::now())
            })
    }

    fn warn_if_short_lived(&self) {
        let Some(record) = self.record() else {
            return;
        };
        if record.validity() <= self.policy.lead {
            tracing::warn!(
                "Token for {} is valid for only {:?}, within the {:?} renewal lead; \
                 renewing at half its lifetime",
                self.inner.identity,
                record.validity(),
                self.policy.lead
            );
        }
    }

    async fn run_renewal_loop(self) {
        let identity = self.inner.identity.clone();
        let mut backoff = Backoff::new(self.policy.initial_backoff, self.policy.max_backoff);
        let mut renewed = false;
        tracing::info!("Token renewal loop started for {}", identity);

        loop {
            let mut wait = self.time_until_renewal();
            // A grant with no lifetime left would otherwise renew back to back.
            if renewed && wait.is_zero() {
                wait = self.policy.initial_backoff;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {},
            }

            let (flight_id, flight) = self.join_or_start_flight();
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.abandon_flight(flight_id);
                    break;
                },
                outcome = flight => outcome,
            };

            match outcome {
                Ok(()) => {
                    tracing::info!("Token rotated for {}", identity);
                    backoff.reset();
                    self.warn_if_short_lived();
                    renewed = true;
                },
                Err(err) => {
                    renewed = false;
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Token refresh failed for {} (attempt {}): {}; retrying in {:?}",
                        identity,
                        backoff.attempts(),
                        err,
                        delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }

        tracing::info!("Token renewal loop stopped for {}", identity);
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("identity", &self.inner.identity)
            .field("policy", &self.policy)
            .field("record", &self.record())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

/// One renewal call. Holds the state weakly so a pending flight does not
/// keep a dropped manager alive.
async fn renew_once(
    renewer: Arc<dyn TokenRenewer>,
    state: Weak<Mutex<TokenState>>,
    identity: String,
    current: String,
    id: u64,
) -> std::result::Result<(), RenewalError> {
    let outcome = renewer.renew(&current).await;

    let Some(state) = state.upgrade() else {
        return outcome.map(|_| ());
    };
    let mut state = state.lock();
    if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
        state.in_flight = None;
    }

    let grant = outcome?;
    state.record = Some(TokenRecord::new(grant.token, grant.expires_in, identity));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::client::TokenGrant;
    use async_trait::async_trait;

    struct StaticRenewer;

    #[async_trait]
    impl TokenRenewer for StaticRenewer {
        async fn renew(&self, _current: &str) -> std::result::Result<TokenGrant, RenewalError> {
            Ok(TokenGrant {
                token: "renewed".to_string(),
                expires_in: Duration::from_secs(30),
            })
        }
    }

    fn manager() -> TokenManager {
        TokenManager::new("soldier-1", Arc::new(StaticRenewer))
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_an_error() {
        let manager = manager();
        manager.start("t0", Duration::from_secs(30)).unwrap();
        assert!(manager.start("t1", Duration::from_secs(30)).is_err());
        assert_eq!(manager.current_token(), "t0");
        manager.stop();
    }

    #[test]
    fn unstarted_manager_has_no_token() {
        let manager = manager();
        assert_eq!(manager.current_token(), "");
        assert!(manager.is_expired());
        assert!(manager.expires_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_replaces_token_and_expiry() {
        let manager = manager();
        manager.start("t0", Duration::from_secs(3)).unwrap();
        let before = manager.expires_at().unwrap();

        manager.refresh().await.unwrap();

        assert_eq!(manager.current_token(), "renewed");
        assert!(manager.expires_at().unwrap() > before);
        assert!(!manager.is_refreshing());
        manager.stop();
    }

    #[test]
    fn record_expiry_helpers() {
        let record = TokenRecord::new("t".to_string(), Duration::from_secs(30), "s".to_string());
        assert!(!record.is_expired());
        assert!(record.expires_soon(Duration::from_secs(60)));
        assert!(!record.expires_soon(Duration::from_secs(5)));
        assert!(!format!("{record:?}").contains("\"t\""));
        assert_eq!(record.validity(), Duration::from_secs(30));
    }

    #[test]
    fn renewal_lead_is_capped_at_half_the_lifetime() {
        let manager = manager();
        let long = TokenRecord::new("t".to_string(), Duration::from_secs(30), "s".to_string());
        let short = TokenRecord::new("t".to_string(), Duration::from_secs(4), "s".to_string());
        assert_eq!(manager.renewal_lead(&long), Duration::from_secs(5));
        assert_eq!(manager.renewal_lead(&short), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop() {
        let manager = manager();
        let handle = manager.start("t0", Duration::from_secs(3600)).unwrap();
        manager.stop();
        handle.await.unwrap();
    }
}
