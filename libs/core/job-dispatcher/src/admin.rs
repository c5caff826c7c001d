//! Queue administration
//!
//! Maintenance operations across every queue of a group: selective job
//! removal and a view of the outstanding counters.

use crate::error::DispatchResult;
use crate::job::{lookup_path, render_value};
use crate::queue::{is_counter_key, QueueIdentity};
use crate::store::QueueStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Keys fetched per SCAN page.
pub const SCAN_PAGE_SIZE: usize = 1024;

/// Administrative access to a queue group.
pub struct QueueAdmin {
    store: Arc<dyn QueueStore>,
    queue: QueueIdentity,
}

impl QueueAdmin {
    pub fn new(store: Arc<dyn QueueStore>, queue: QueueIdentity) -> Self {
        Self { store, queue }
    }

    /// Remove queued jobs named `name` whose `args` value at `path` renders
    /// to `value`.
    ///
    /// Every list under the group is scanned. Counter hashes and keys of other
    /// types are skipped. One removal is issued per matching entry; the count
    /// of removals is returned. Outstanding counters are not adjusted.
    pub async fn remove(&self, name: &str, path: &str, value: &str) -> DispatchResult<usize> {
        let keys: Vec<String> = self
            .store
            .scan_keys(&self.queue.group_pattern(), SCAN_PAGE_SIZE)
            .await?
            .into_iter()
            .filter(|key| !is_counter_key(key))
            .collect();

        if keys.is_empty() {
            debug!(group = %self.queue.group(), "No queues to scan");
            return Ok(0);
        }

        let removals: Vec<(String, String)> = self
            .store
            .range_all(&keys)
            .await?
            .into_iter()
            .flat_map(|(key, entries)| {
                entries
                    .into_iter()
                    .filter(|entry| matches_job(entry, name, path, value))
                    .map(move |entry| (key.clone(), entry))
            })
            .collect();

        if removals.is_empty() {
            return Ok(0);
        }

        self.store.remove_values(&removals).await?;
        info!(
            group = %self.queue.group(),
            job = %name,
            path = %path,
            value = %value,
            removed = removals.len(),
            "Removed queued jobs"
        );

        Ok(removals.len())
    }

    /// Outstanding counters of every queue in the group.
    pub async fn counters(&self) -> DispatchResult<HashMap<String, i64>> {
        self.store.hash_get_all(&self.queue.counter_key()).await
    }
}

/// Whether a raw queue entry is job `name` with `args.<path>` equal to `value`.
///
/// Entries that are not JSON never match.
pub fn matches_job(raw: &str, name: &str, path: &str, value: &str) -> bool {
    let Ok(job) = serde_json::from_str::<Value>(raw) else {
        return false;
    };

    if job.get("name").and_then(Value::as_str) != Some(name) {
        return false;
    }

    let field = job.get("args").and_then(|args| lookup_path(args, path));
    render_value(field) == value
}
