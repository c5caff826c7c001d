//! Queue identities and the store keys derived from them.
//!
//! A queue lives under `group/name`. Every queue in a group shares one
//! counter hash (`group/workerCountMap`) whose fields are the queue keys.

use std::fmt;

/// Reserved group for workers that never take part in stealing.
pub const DEFAULT_GROUP: &str = "DEFAULT_QUK_GROUP";

/// Reserved queue name for workers that never take part in stealing.
pub const DEFAULT_NAME: &str = "DEFAULT_QUK_NAME";

const COUNTER_SUFFIX: &str = "workerCountMap";
const CRASH_SUFFIX: &str = "_crashed_job";
const CALLBACK_SUFFIX: &str = "_job_callback";

/// One logical queue: a `(group, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueIdentity {
    group: String,
    name: String,
}

impl QueueIdentity {
    /// Build an identity, falling back to the reserved sentinels for blank parts.
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        let group = group.into();
        let name = name.into();
        Self {
            group: if group.is_empty() {
                DEFAULT_GROUP.to_string()
            } else {
                group
            },
            name: if name.is_empty() {
                DEFAULT_NAME.to_string()
            } else {
                name
            },
        }
    }

    /// The identity of an ungrouped, unnamed worker.
    pub fn ungrouped() -> Self {
        Self::new(DEFAULT_GROUP, DEFAULT_NAME)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key of the list holding this queue's jobs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.group, self.name)
    }

    /// Hash holding the outstanding-work counters for the whole group.
    pub fn counter_key(&self) -> String {
        format!("{}/{}", self.group, COUNTER_SUFFIX)
    }

    /// List of jobs that failed to start.
    pub fn crash_key(&self) -> String {
        format!("{}{}", self.key(), CRASH_SUFFIX)
    }

    /// List receiving status records for finished jobs.
    pub fn callback_key(&self) -> String {
        format!("{}{}", self.key(), CALLBACK_SUFFIX)
    }

    /// Pattern matching every key that belongs to the group.
    pub fn group_pattern(&self) -> String {
        format!("{}*", self.group)
    }

    /// Ungrouped workers neither steal nor get stolen from.
    pub fn is_ungrouped(&self) -> bool {
        self.group == DEFAULT_GROUP || self.key().contains(DEFAULT_NAME)
    }
}

impl fmt::Display for QueueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// Whether a store key is a group's counter hash rather than a job list.
pub fn is_counter_key(key: &str) -> bool {
    key.contains(COUNTER_SUFFIX)
}
