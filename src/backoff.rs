//! Bounded exponential backoff.
//!
//! Used by the token renewal loop and by broker connection retries. The
//! delay starts at `initial`, doubles after every failure and never exceeds
//! `max`. Sleeping is cancellable so supervised loops can stop promptly.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff state for one retry loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Returns the delay to wait now and advances to the next one.
    ///
    /// ```
    /// use std::time::Duration;
    /// use mission_control::backoff::Backoff;
    ///
    /// let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(20));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(40));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    /// ```
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Resets to the initial delay after a success.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleeps for the next delay.
    ///
    /// Returns `true` if the sleep completed, `false` if `cancel` fired first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
