//! Mission registry.
//!
//! The coordinator's authoritative view of every mission it has accepted.
//! Records are kept for the life of the process and never evicted.
//!
//! # Transitions
//!
//! Status changes go forward only (see [`MissionStatus::can_transition_to`]).
//! The queue may redeliver or reorder status updates, so a repeated status
//! is reported as [`ApplyOutcome::Duplicate`] and a backwards one as
//! [`ApplyOutcome::Rejected`]; neither touches the record. Once a mission is
//! `Completed` or `Failed` it never changes again.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{Mission, MissionStatus};

/// Result of applying a status update to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mission moved forward.
    Applied {
        /// Status before the update.
        from: MissionStatus,
        /// Status after the update.
        to: MissionStatus,
    },
    /// The mission already had this status.
    Duplicate,
    /// The update would have moved the mission backwards or out of a
    /// terminal status.
    Rejected {
        /// Status the mission keeps.
        current: MissionStatus,
        /// Status that was refused.
        proposed: MissionStatus,
    },
    /// No mission with this identifier.
    Unknown,
}

impl ApplyOutcome {
    /// Returns `true` if the record changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Number of missions per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Waiting for a worker.
    pub queued: usize,
    /// Being executed.
    pub in_progress: usize,
    /// Finished successfully.
    pub completed: usize,
    /// Finished unsuccessfully.
    pub failed: usize,
}

impl StatusCounts {
    /// Total number of missions counted.
    pub fn total(&self) -> usize {
        self.queued + self.in_progress + self.completed + self.failed
    }
}

/// Thread-safe map from mission id to [`Mission`].
///
/// # Examples
///
/// ```
/// use mission_control::registry::{ApplyOutcome, MissionRegistry};
/// use mission_control::MissionStatus;
///
/// let registry = MissionRegistry::new();
/// registry.create("m1", "scan-sector-7").unwrap();
///
/// assert!(registry.apply_status("m1", MissionStatus::InProgress).is_applied());
/// assert_eq!(
///     registry.apply_status("m1", MissionStatus::InProgress),
///     ApplyOutcome::Duplicate
/// );
/// assert_eq!(registry.get("m1").unwrap().status, MissionStatus::InProgress);
/// ```
#[derive(Debug, Default)]
pub struct MissionRegistry {
    missions: RwLock<HashMap<String, Mission>>,
}

impl MissionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new `Queued` mission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `id` is already registered.
    pub fn create(&self, id: impl Into<String>, payload: impl Into<String>) -> Result<Mission> {
        let mission = Mission::new(id, payload);
        let mut missions = self.missions.write();
        if missions.contains_key(&mission.id) {
            return Err(Error::internal(format!(
                "mission {} already registered",
                mission.id
            )));
        }
        missions.insert(mission.id.clone(), mission.clone());
        Ok(mission)
    }

    /// Snapshot of a mission.
    pub fn get(&self, id: &str) -> Option<Mission> {
        self.missions.read().get(id).cloned()
    }

    /// Applies `status` to mission `id` if it moves the mission forward.
    ///
    /// On success `updated_at` is set to the current time, bumped past the
    /// previous value if the clock has not advanced.
    pub fn apply_status(&self, id: &str, status: MissionStatus) -> ApplyOutcome {
        let mut missions = self.missions.write();
        let Some(mission) = missions.get_mut(id) else {
            return ApplyOutcome::Unknown;
        };

        let current = mission.status;
        if current == status {
            return ApplyOutcome::Duplicate;
        }
        if !current.can_transition_to(&status) {
            return ApplyOutcome::Rejected {
                current,
                proposed: status,
            };
        }

        mission.status = status;
        mission.updated_at = next_timestamp(mission.updated_at);
        ApplyOutcome::Applied {
            from: current,
            to: status,
        }
    }

    /// Number of registered missions.
    pub fn len(&self) -> usize {
        self.missions.read().len()
    }

    /// Returns `true` if no mission is registered.
    pub fn is_empty(&self) -> bool {
        self.missions.read().is_empty()
    }

    /// Missions per status.
    pub fn counts(&self) -> StatusCounts {
        self.missions
            .read()
            .values()
            .fold(StatusCounts::default(), |mut counts, mission| {
                match mission.status {
                    MissionStatus::Queued => counts.queued += 1,
                    MissionStatus::InProgress => counts.in_progress += 1,
                    MissionStatus::Completed => counts.completed += 1,
                    MissionStatus::Failed => counts.failed += 1,
                }
                counts
            })
    }
}

fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + TimeDelta::microseconds(1)
    }
}
