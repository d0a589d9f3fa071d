//! Mission records and wire messages.

pub mod messages;
pub mod mission;

pub use messages::{
    IssueTokenRequest, MissionStatusResponse, Order, StatusUpdate, SubmitMissionRequest,
    SubmitMissionResponse, TokenResponse,
};
pub use mission::{Mission, MissionStatus};
