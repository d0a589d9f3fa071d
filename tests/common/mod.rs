//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use mission_control::auth::{RenewalError, TokenCodec, TokenGrant, TokenRenewer};
use mission_control::channel::InMemoryChannel;
use mission_control::coordinator::CoordinatorService;
use mission_control::registry::MissionRegistry;
use mission_control::types::Order;
use mission_control::worker::{ExecutionOutcome, MissionExecutor};

pub const SECRET: &str = "integration-secret";

/// Coordinator over a fresh registry and in-memory channel.
pub fn coordinator() -> (CoordinatorService, Arc<InMemoryChannel>) {
    let channel = Arc::new(InMemoryChannel::new());
    let service = CoordinatorService::new(
        Arc::new(MissionRegistry::new()),
        channel.clone(),
        Arc::new(TokenCodec::new(SECRET)),
    );
    (service, channel)
}

pub fn grant(token: &str, secs: u64) -> TokenGrant {
    TokenGrant {
        token: token.to_string(),
        expires_in: Duration::from_secs(secs),
    }
}

// ─── Renewers ────────────────────────────────────────────────────────────

/// Renews by calling the coordinator service directly.
pub struct InProcessRenewer {
    service: CoordinatorService,
    calls: AtomicUsize,
}

impl InProcessRenewer {
    pub fn new(service: CoordinatorService) -> Self {
        Self {
            service,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRenewer for InProcessRenewer {
    async fn renew(&self, current_token: &str) -> Result<TokenGrant, RenewalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.service
            .renew_token(current_token)
            .map(TokenGrant::from)
            .map_err(|e| RenewalError::Rejected {
                status: 401,
                body: e.to_string(),
            })
    }
}

/// Returns scripted outcomes in order, repeating the last one, and records
/// when each call was made.
pub struct ScriptedRenewer {
    script: Mutex<VecDeque<Result<TokenGrant, RenewalError>>>,
    last: Mutex<Option<Result<TokenGrant, RenewalError>>>,
    calls: Mutex<Vec<Instant>>,
    presented: Mutex<Vec<String>>,
}

impl ScriptedRenewer {
    pub fn new(script: Vec<Result<TokenGrant, RenewalError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            presented: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    /// Tokens presented as the bearer credential, in call order.
    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().clone()
    }
}

#[async_trait]
impl TokenRenewer for ScriptedRenewer {
    async fn renew(&self, current_token: &str) -> Result<TokenGrant, RenewalError> {
        self.calls.lock().push(Instant::now());
        self.presented.lock().push(current_token.to_string());
        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => {
                *self.last.lock() = Some(outcome.clone());
                outcome
            },
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err(RenewalError::Transport("script empty".into()))),
        }
    }
}

/// Blocks every renewal until [`release`](Self::release) is called.
pub struct GatedRenewer {
    gate: Semaphore,
    outcome: Result<TokenGrant, RenewalError>,
    calls: AtomicUsize,
}

impl GatedRenewer {
    pub fn new(outcome: Result<TokenGrant, RenewalError>) -> Self {
        Self {
            gate: Semaphore::new(0),
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.add_permits(1_000);
    }

    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl TokenRenewer for GatedRenewer {
    async fn renew(&self, _current_token: &str) -> Result<TokenGrant, RenewalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.outcome.clone()
    }
}

// ─── Executors ───────────────────────────────────────────────────────────

/// Sleeps for a fixed time, returns a fixed outcome and tracks how many
/// executions overlap.
pub struct FixedOutcomeExecutor {
    delay: Duration,
    outcome: ExecutionOutcome,
    running: AtomicUsize,
    max_running: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl FixedOutcomeExecutor {
    pub fn new(delay: Duration, outcome: ExecutionOutcome) -> Self {
        Self {
            delay,
            outcome,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl MissionExecutor for FixedOutcomeExecutor {
    async fn execute(&self, order: &Order) -> ExecutionOutcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.executed.lock().push(order.mission_id.clone());

        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.outcome
    }
}
