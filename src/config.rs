//! TOML configuration for the coordinator and worker processes.
//!
//! Every section and field is optional; omitted values fall back to the
//! defaults in [`crate::constants`]. Command-line flags and environment
//! variables are layered on top by the binaries.
//!
//! # Example TOML
//!
//! ```toml
//! [broker]
//! url = "redis://redis:6379"
//! prefix = "mission-control"
//! connect_attempts = 10
//!
//! [coordinator]
//! port = 8080
//! token_secret = "change-me"
//! token_ttl_secs = 30
//!
//! [worker]
//! soldier_id = "soldier-1"
//! concurrency = 5
//! commander_url = "http://commander-service:8080"
//!
//! [renewal]
//! lead_secs = 5
//! initial_backoff_secs = 5
//! max_backoff_secs = 60
//!
//! [simulation]
//! min_delay_ms = 5000
//! max_delay_ms = 15000
//! success_rate = 0.9
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::auth::RenewalPolicy;
use crate::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_RENEWAL_LEAD,
    DEFAULT_SOLDIER_ID, DEFAULT_TOKEN_TTL,
};
use crate::error::{Error, Result};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MissionControlConfig {
    /// Message broker connection.
    pub broker: BrokerConfig,
    /// Coordinator process settings.
    pub coordinator: CoordinatorConfig,
    /// Worker process settings.
    pub worker: WorkerConfig,
    /// Token renewal timing on the worker.
    pub renewal: RenewalConfig,
    /// Simulated mission execution on the worker.
    pub simulation: SimulationConfig,
}

impl MissionControlConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read, is not
    /// valid TOML or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks that values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(Error::Configuration(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        if self.worker.soldier_id.trim().is_empty() {
            return Err(Error::Configuration(
                "worker.soldier_id must not be empty".to_string(),
            ));
        }
        if self.coordinator.token_ttl_secs == 0 {
            return Err(Error::Configuration(
                "coordinator.token_ttl_secs must be positive".to_string(),
            ));
        }
        if self.coordinator.token_ttl_secs <= self.renewal.lead_secs {
            return Err(Error::Configuration(format!(
                "coordinator.token_ttl_secs ({}) must exceed renewal.lead_secs ({})",
                self.coordinator.token_ttl_secs, self.renewal.lead_secs
            )));
        }
        if self.renewal.initial_backoff_secs == 0 || self.renewal.max_backoff_secs == 0 {
            return Err(Error::Configuration(
                "renewal backoff must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.simulation.success_rate) {
            return Err(Error::Configuration(format!(
                "simulation.success_rate must be within 0..=1, got {}",
                self.simulation.success_rate
            )));
        }
        if self.simulation.min_delay_ms > self.simulation.max_delay_ms {
            return Err(Error::Configuration(
                "simulation.min_delay_ms exceeds max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Message broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URL.
    pub url: String,
    /// Key prefix for both queues.
    pub prefix: String,
    /// Connection attempts before startup fails.
    pub connect_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: "mission-control".to_string(),
            connect_attempts: 10,
        }
    }
}

/// Coordinator process settings.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// HTTP listen port.
    pub port: u16,
    /// HMAC secret for signing tokens. Required to run the coordinator.
    pub token_secret: Option<String>,
    /// Validity window of issued tokens in seconds.
    pub token_ttl_secs: u64,
}

impl CoordinatorConfig {
    /// Validity window of issued tokens.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// The signing secret, or a configuration error if none is set.
    pub fn require_secret(&self) -> Result<&str> {
        match self.token_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(Error::Configuration(
                "a token signing secret is required (TOKEN_SECRET)".to_string(),
            )),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            token_secret: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL.as_secs(),
        }
    }
}

impl std::fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("port", &self.port)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

/// Worker process and dispatch pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identity the worker's tokens are issued for.
    pub soldier_id: String,
    /// Maximum missions executed at once.
    pub concurrency: usize,
    /// Coordinator base URL for token issuance and renewal.
    pub commander_url: String,
    /// Assumed validity of a pre-provisioned initial token, in seconds.
    pub initial_token_ttl_secs: u64,
    /// Publish `FAILED` for undecodable orders whose mission id can still
    /// be read, instead of dropping them silently.
    pub report_malformed_orders: bool,
}

impl WorkerConfig {
    /// Assumed validity of a pre-provisioned initial token.
    pub fn initial_token_ttl(&self) -> Duration {
        Duration::from_secs(self.initial_token_ttl_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            soldier_id: DEFAULT_SOLDIER_ID.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            commander_url: "http://commander-service:8080".to_string(),
            initial_token_ttl_secs: DEFAULT_TOKEN_TTL.as_secs(),
            report_malformed_orders: false,
        }
    }
}

/// Token renewal timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Seconds before expiry at which renewal starts.
    pub lead_secs: u64,
    /// First retry delay after a failed renewal, in seconds.
    pub initial_backoff_secs: u64,
    /// Retry delay cap, in seconds.
    pub max_backoff_secs: u64,
}

impl RenewalConfig {
    /// Converts to the manager's policy.
    pub fn policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            lead: Duration::from_secs(self.lead_secs),
            initial_backoff: Duration::from_secs(self.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            lead_secs: DEFAULT_RENEWAL_LEAD.as_secs(),
            initial_backoff_secs: DEFAULT_INITIAL_BACKOFF.as_secs(),
            max_backoff_secs: DEFAULT_MAX_BACKOFF.as_secs(),
        }
    }
}

/// Simulated mission execution.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Shortest execution time in milliseconds.
    pub min_delay_ms: u64,
    /// Longest execution time in milliseconds.
    pub max_delay_ms: u64,
    /// Probability that a mission completes rather than fails.
    pub success_rate: f64,
}

impl SimulationConfig {
    /// Execution time bounds.
    pub fn delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 5_000,
            max_delay_ms: 15_000,
            success_rate: 0.9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MissionControlConfig::from_toml_str("").unwrap();
        assert_eq!(config, MissionControlConfig::default());
        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.worker.soldier_id, "soldier-1");
        assert_eq!(config.coordinator.port, 8080);
        assert_eq!(config.renewal.policy(), RenewalPolicy::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = MissionControlConfig::from_toml_str(
            r#"
            [worker]
            concurrency = 2

            [simulation]
            success_rate = 1.0
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.worker.commander_url, "http://commander-service:8080");
        assert_eq!(config.simulation.success_rate, 1.0);
        assert_eq!(config.simulation.min_delay_ms, 5_000);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = MissionControlConfig::from_toml_str("[worker]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn invalid_success_rate_is_rejected() {
        assert!(MissionControlConfig::from_toml_str("[simulation]\nsuccess_rate = 1.5\n").is_err());
    }

    #[test]
    fn token_ttl_within_renewal_lead_is_rejected() {
        let err = MissionControlConfig::from_toml_str("[coordinator]\ntoken_ttl_secs = 5\n")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = MissionControlConfig::from_toml_str(
            "[coordinator]\ntoken_ttl_secs = 20\n\n[renewal]\nlead_secs = 30\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("renewal.lead_secs"));

        let config =
            MissionControlConfig::from_toml_str("[coordinator]\ntoken_ttl_secs = 6\n").unwrap();
        assert_eq!(config.coordinator.token_ttl_secs, 6);
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = MissionControlConfig::from_toml_str("[worker\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn secret_is_required_and_redacted() {
        let mut coordinator = CoordinatorConfig::default();
        assert!(coordinator.require_secret().is_err());

        coordinator.token_secret = Some("hunter2".to_string());
        assert_eq!(coordinator.require_secret().unwrap(), "hunter2");
        assert!(!format!("{coordinator:?}").contains("hunter2"));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = MissionControlConfig::load(Path::new("/nonexistent/mission-control.toml"))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
