//! Reconnect backoff
//!
//! When the store stops answering, the worker pings it until it responds,
//! sleeping between attempts with a delay that doubles after each failure.
//!
//! ```text
//! ping ──fail──> sleep(d) ──> d = 2d ──> ping ...
//!   │
//!   └──ok──> d = initial, resume dispatching
//! ```
//!
//! There is no ceiling unless one is configured.

use crate::store::QueueStore;
use std::time::Duration;
use tracing::{info, warn};

/// Exponential delay for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    current: Duration,
    max: Option<Duration>,
    attempts: u32,
}

impl ReconnectBackoff {
    /// Start at `initial`, doubling without limit.
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max: None,
            attempts: 0,
        }
    }

    /// Cap the delay at `max`.
    pub fn with_max(mut self, max: Option<Duration>) -> Self {
        self.max = max;
        self
    }

    /// The delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Return the delay for this failure and double it for the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let doubled = self.current.saturating_mul(2);
        self.current = match self.max {
            Some(max) => doubled.min(max),
            None => doubled,
        };
        self.attempts += 1;
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Ping `store` until it answers, sleeping between failures.
    ///
    /// Returns the number of failed pings.
    pub async fn wait_for_store<S: QueueStore + ?Sized>(&mut self, store: &S) -> u32 {
        loop {
            match store.ping().await {
                Ok(()) => {
                    let failed = self.attempts;
                    if failed > 0 {
                        info!(failed_pings = failed, "Store reachable again");
                    }
                    self.reset();
                    return failed;
                }
                Err(e) => {
                    let delay = self.next_delay();
                    warn!(
                        error = %e,
                        attempt = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Store unreachable, waiting before reconnect"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
