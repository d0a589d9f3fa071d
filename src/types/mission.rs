//! Mission record and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mission lifecycle status.
///
/// # State Machine
///
/// ```text
/// Queued     -> InProgress, Completed, Failed
/// InProgress -> Completed, Failed
/// Completed  -> (terminal)
/// Failed     -> (terminal)
/// ```
///
/// `Queued -> Completed/Failed` is accepted because the queue may deliver a
/// terminal update before the matching `InProgress` one. Self-transitions are
/// rejected; the registry treats them as duplicates.
///
/// # Examples
///
/// ```
/// use mission_control::MissionStatus;
///
/// assert!(MissionStatus::Queued.can_transition_to(&MissionStatus::InProgress));
/// assert!(!MissionStatus::Completed.can_transition_to(&MissionStatus::InProgress));
/// assert_eq!(serde_json::to_string(&MissionStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    /// Accepted by the coordinator, waiting for a worker.
    Queued,
    /// A worker has picked the mission up.
    InProgress,
    /// Finished successfully (terminal).
    Completed,
    /// Finished unsuccessfully (terminal).
    Failed,
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl MissionStatus {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if moving from this status to `next` goes forward.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::InProgress | Self::Completed | Self::Failed),
            Self::InProgress => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }
}

/// A unit of work tracked by the coordinator.
///
/// Serialized in full as the order message; workers decode only the
/// fields they need (see [`Order`](crate::types::Order)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    /// Identifier assigned at creation.
    #[serde(rename = "mission_id")]
    pub id: String,

    /// Opaque description of the work.
    pub payload: String,

    /// Current lifecycle status.
    pub status: MissionStatus,

    /// When the coordinator accepted the mission.
    pub created_at: DateTime<Utc>,

    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// Creates a `Queued` mission stamped with the current time.
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            payload: payload.into(),
            status: MissionStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_mission_is_queued() {
        let mission = Mission::new("m1", "scan-sector-7");
        assert_eq!(mission.status, MissionStatus::Queued);
        assert_eq!(mission.created_at, mission.updated_at);
    }

    #[test]
    fn mission_wire_format() {
        let mission = Mission::new("m1", "scan-sector-7");
        let value = serde_json::to_value(&mission).unwrap();
        assert_eq!(value["mission_id"], "m1");
        assert_eq!(value["payload"], "scan-sector-7");
        assert_eq!(value["status"], "QUEUED");
        assert!(value["created_at"].is_string());
        assert!(value["updated_at"].is_string());
    }

    #[test]
    fn status_parses_from_wire_strings() {
        let status: MissionStatus = serde_json::from_value(json!("FAILED")).unwrap();
        assert_eq!(status, MissionStatus::Failed);
        assert!(serde_json::from_value::<MissionStatus>(json!("failed")).is_err());
    }
}
