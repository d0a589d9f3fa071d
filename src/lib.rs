//! # Mission Control
//!
//! Dispatch of missions from a coordinator to a pool of workers over a
//! message queue, with short-lived signed tokens that workers keep renewed
//! in the background.
//!
//! ## Architecture
//!
//! ```text
//!  client ──HTTP──> coordinator ──orders_queue──> worker pool ──> executor
//!                      ^   ^                         │
//!                      │   └──────status_queue───────┘
//!                      └────/tokens/renew──── token manager
//! ```
//!
//! - [`coordinator::CoordinatorService`] accepts missions, tracks their
//!   status in the [`registry::MissionRegistry`] and issues tokens.
//! - [`worker::WorkerPool`] executes up to `concurrency` missions at once and
//!   reports `IN_PROGRESS` then `COMPLETED` or `FAILED`.
//! - [`auth::TokenManager`] renews the worker's token shortly before it
//!   expires, collapsing concurrent renewals into one request.
//! - [`channel::MessageChannel`] abstracts the queue; an in-memory adapter
//!   and a Redis adapter are provided.
//!
//! ## Example
//!
//! ```
//! use mission_control::auth::TokenCodec;
//! use mission_control::channel::InMemoryChannel;
//! use mission_control::coordinator::CoordinatorService;
//! use mission_control::registry::MissionRegistry;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mission_control::Result<()> {
//! let service = CoordinatorService::new(
//!     Arc::new(MissionRegistry::new()),
//!     Arc::new(InMemoryChannel::new()),
//!     Arc::new(TokenCodec::new("shared-secret")),
//! );
//! let token = service.issue_token("soldier-1")?;
//! assert_eq!(token.expires_in, 30);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod registry;
pub mod types;
pub mod worker;

pub use auth::{TokenCodec, TokenManager};
pub use channel::{InMemoryChannel, MessageChannel, Queue};
pub use config::MissionControlConfig;
pub use coordinator::CoordinatorService;
pub use error::{Error, Result};
pub use registry::{ApplyOutcome, MissionRegistry};
pub use types::{Mission, MissionStatus, StatusUpdate};
pub use worker::WorkerPool;
