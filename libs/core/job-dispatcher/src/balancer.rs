//! Group load balancer
//!
//! When a worker's own queue comes back empty, it looks at the outstanding
//! counters of its group and pops one job from the busiest sibling.
//!
//! Reading the counters and popping are two separate store calls. Another
//! worker may drain the chosen sibling in between; that simply yields no job.

use crate::error::DispatchResult;
use crate::queue::QueueIdentity;
use crate::store::QueueStore;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// A job taken from a sibling queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StolenJob {
    /// Store key of the sibling the job came from.
    pub from: String,
    pub payload: String,
}

/// Pick the key with the highest positive count.
///
/// Ties go to the lexicographically smallest key. `exclude` is skipped.
/// Returns `None` when no count is above zero.
pub fn pick_busiest<'a>(
    counts: &'a HashMap<String, i64>,
    exclude: Option<&str>,
) -> Option<(&'a str, i64)> {
    counts
        .iter()
        .filter(|(key, count)| **count > 0 && Some(key.as_str()) != exclude)
        .map(|(key, count)| (key.as_str(), *count))
        .fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some((best_key, best_count)) => {
                if candidate.1 > best_count || (candidate.1 == best_count && candidate.0 < best_key)
                {
                    Some(candidate)
                } else {
                    Some((best_key, best_count))
                }
            }
        })
}

/// Steals work from sibling queues of the same group.
#[derive(Debug, Clone)]
pub struct GroupBalancer {
    queue: QueueIdentity,
    pop_timeout: Duration,
}

impl GroupBalancer {
    pub fn new(queue: QueueIdentity, pop_timeout: Duration) -> Self {
        Self { queue, pop_timeout }
    }

    /// Whether this worker takes part in stealing at all.
    pub fn enabled(&self) -> bool {
        !self.queue.is_ungrouped()
    }

    /// Try to take one job from the busiest sibling.
    ///
    /// A failed counter read is logged and treated as "no work found". A
    /// failed pop is returned so the caller can wait for the store.
    pub async fn steal<S: QueueStore + ?Sized>(
        &self,
        store: &S,
    ) -> DispatchResult<Option<StolenJob>> {
        if !self.enabled() {
            return Ok(None);
        }

        let counts = match store.hash_get_all(&self.queue.counter_key()).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, group = %self.queue.group(), "Failed to read group counters");
                return Ok(None);
            }
        };

        let own_key = self.queue.key();
        let Some((sibling, outstanding)) = pick_busiest(&counts, Some(&own_key)) else {
            return Ok(None);
        };

        debug!(
            sibling = %sibling,
            outstanding = outstanding,
            "Trying to steal from busiest sibling"
        );

        match store.blocking_pop(sibling, self.pop_timeout).await? {
            Some(payload) => Ok(Some(StolenJob {
                from: sibling.to_string(),
                payload,
            })),
            None => {
                debug!(sibling = %sibling, "Sibling drained before pop");
                Ok(None)
            }
        }
    }
}
