//! Wire messages exchanged over the queue and the coordinator's HTTP API.
//!
//! Field names follow the snake_case JSON used on the wire by both
//! processes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::mission::MissionStatus;

/// Worker-side view of an order message.
///
/// The coordinator publishes the full [`Mission`](super::Mission) record;
/// workers only keep the identifier and the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Identifier of the mission to execute.
    pub mission_id: String,
    /// Opaque work description.
    pub payload: String,
}

/// Status report published by a worker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Mission the report is about.
    pub mission_id: String,
    /// New status.
    pub status: MissionStatus,
    /// Bearer token of the reporting worker.
    pub token: String,
}

impl StatusUpdate {
    /// Builds a status update carrying `token`.
    pub fn new(
        mission_id: impl Into<String>,
        status: MissionStatus,
        token: impl Into<String>,
    ) -> Self {
        Self {
            mission_id: mission_id.into(),
            status,
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusUpdate")
            .field("mission_id", &self.mission_id)
            .field("status", &self.status)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /missions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMissionRequest {
    /// Work description.
    pub payload: String,
}

/// Response to `POST /missions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitMissionResponse {
    /// Identifier assigned to the new mission.
    pub mission_id: String,
}

/// Response to `GET /missions/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionStatusResponse {
    /// Identifier that was looked up.
    pub mission_id: String,
    /// Its current status.
    pub status: MissionStatus,
}

/// Body of `POST /tokens/issue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    /// Identity the token is issued for.
    #[serde(rename = "soldier_id")]
    pub identity: String,
}

/// Response to token issuance and renewal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed bearer token.
    pub token: String,
    /// Validity window in seconds.
    pub expires_in: u64,
}

impl TokenResponse {
    /// Validity window as a [`Duration`].
    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}
