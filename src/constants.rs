//! Queue names, route paths and timing defaults shared by both processes.

use std::time::Duration;

/// Queue carrying mission orders from the coordinator to workers.
pub const ORDERS_QUEUE: &str = "orders_queue";

/// Queue carrying status updates from workers to the coordinator.
pub const STATUS_QUEUE: &str = "status_queue";

/// Route for token issuance.
pub const ISSUE_TOKEN_PATH: &str = "/tokens/issue";

/// Route for token renewal.
pub const RENEW_TOKEN_PATH: &str = "/tokens/renew";

/// Validity window stamped into every issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30);

/// How long before expiry the renewal loop wakes up.
pub const DEFAULT_RENEWAL_LEAD: Duration = Duration::from_secs(5);

/// First delay after a failed renewal.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound for the renewal backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Timeout for a single issuance or renewal HTTP call.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Missions a worker executes at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Identity a worker uses when none is configured.
pub const DEFAULT_SOLDIER_ID: &str = "soldier-1";
