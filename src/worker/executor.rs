//! Mission execution.

use async_trait::async_trait;
use rand::prelude::*;
use std::time::Duration;

use crate::config::SimulationConfig;
use crate::types::{MissionStatus, Order};

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The mission completed.
    Success,
    /// The mission failed.
    Failure,
}

impl ExecutionOutcome {
    /// Terminal status to report for this outcome.
    pub fn status(&self) -> MissionStatus {
        match self {
            Self::Success => MissionStatus::Completed,
            Self::Failure => MissionStatus::Failed,
        }
    }
}

/// Carries out one mission.
///
/// Executions are not cancelled once started; an implementation should
/// always return an outcome.
#[async_trait]
pub trait MissionExecutor: Send + Sync {
    /// Executes `order` and reports whether it succeeded.
    async fn execute(&self, order: &Order) -> ExecutionOutcome;
}

/// Stand-in for real work: sleeps for a random time within a range and
/// succeeds with a fixed probability.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    min_delay_ms: u64,
    max_delay_ms: u64,
    success_rate: f64,
}

impl SimulatedExecutor {
    /// Creates an executor from simulation settings.
    pub fn new(config: &SimulationConfig) -> Self {
        let (min, max) = if config.min_delay_ms <= config.max_delay_ms {
            (config.min_delay_ms, config.max_delay_ms)
        } else {
            (config.max_delay_ms, config.min_delay_ms)
        };
        Self {
            min_delay_ms: min,
            max_delay_ms: max,
            success_rate: config.success_rate.clamp(0.0, 1.0),
        }
    }

    fn roll(&self) -> (Duration, ExecutionOutcome) {
        let mut rng = rand::rng();
        let delay = Duration::from_millis(rng.random_range(self.min_delay_ms..=self.max_delay_ms));
        let outcome = if rng.random_bool(self.success_rate) {
            ExecutionOutcome::Success
        } else {
            ExecutionOutcome::Failure
        };
        (delay, outcome)
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(&SimulationConfig::default())
    }
}

#[async_trait]
impl MissionExecutor for SimulatedExecutor {
    async fn execute(&self, order: &Order) -> ExecutionOutcome {
        let (delay, outcome) = self.roll();
        tracing::debug!("Executing mission {} for {:?}", order.mission_id, delay);
        tokio::time::sleep(delay).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order {
            mission_id: "m1".to_string(),
            payload: "scan-sector-7".to_string(),
        }
    }

    #[test]
    fn outcome_maps_to_terminal_status() {
        assert_eq!(ExecutionOutcome::Success.status(), MissionStatus::Completed);
        assert_eq!(ExecutionOutcome::Failure.status(), MissionStatus::Failed);
    }

    #[test]
    fn rolls_stay_within_configured_range() {
        let executor = SimulatedExecutor::default();
        for _ in 0..200 {
            let (delay, _) = executor.roll();
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn inverted_range_is_normalized() {
        let executor = SimulatedExecutor::new(&SimulationConfig {
            min_delay_ms: 20,
            max_delay_ms: 10,
            success_rate: 2.0,
        });
        let (delay, outcome) = executor.roll();
        assert!((10..=20).contains(&(delay.as_millis() as u64)));
        assert_eq!(outcome, ExecutionOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn certain_outcomes() {
        let always = SimulatedExecutor::new(&SimulationConfig {
            min_delay_ms: 5_000,
            max_delay_ms: 15_000,
            success_rate: 1.0,
        });
        let never = SimulatedExecutor::new(&SimulationConfig {
            success_rate: 0.0,
            ..SimulationConfig::default()
        });

        let start = tokio::time::Instant::now();
        assert_eq!(always.execute(&order()).await, ExecutionOutcome::Success);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(never.execute(&order()).await, ExecutionOutcome::Failure);
    }
}
