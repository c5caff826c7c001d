//! In-memory store shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use job_dispatcher::{DispatchResult, QueueStore};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, i64>>,
    strings: HashMap<String, String>,
}

/// `QueueStore` over process memory, with blocking pops woken by pushes.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a list, head first.
    pub async fn list(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn counter(&self, key: &str, field: &str) -> i64 {
        self.state
            .lock()
            .await
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).copied())
            .unwrap_or(0)
    }

    pub async fn set_counter(&self, key: &str, field: &str, value: i64) {
        self.state
            .lock()
            .await
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    /// Store a plain string value, as `SET` would.
    pub async fn set_string(&self, key: &str, value: &str) {
        self.state
            .lock()
            .await
            .strings
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> DispatchResult<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self
                .state
                .lock()
                .await
                .lists
                .get_mut(key)
                .and_then(VecDeque::pop_front);
            if popped.is_some() {
                return Ok(popped);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn push(&self, key: &str, value: &str) -> DispatchResult<()> {
        self.state
            .lock()
            .await
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn push_front(&self, key: &str, value: &str) -> DispatchResult<()> {
        self.state
            .lock()
            .await
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn list_len(&self, key: &str) -> DispatchResult<i64> {
        Ok(self
            .state
            .lock()
            .await
            .lists
            .get(key)
            .map_or(0, |list| list.len() as i64))
    }

    async fn scan_keys(&self, pattern: &str, _page_size: usize) -> DispatchResult<Vec<String>> {
        let prefix = pattern.trim_end_matches('*');
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .lists
            .keys()
            .chain(state.hashes.keys())
            .chain(state.strings.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn range_all(&self, keys: &[String]) -> DispatchResult<Vec<(String, Vec<String>)>> {
        let state = self.state.lock().await;
        let is_other_type =
            |key: &String| state.hashes.contains_key(key) || state.strings.contains_key(key);

        Ok(keys
            .iter()
            .filter(|key| !is_other_type(key))
            .map(|key| {
                let entries = state
                    .lists
                    .get(key)
                    .map(|list| list.iter().cloned().collect())
                    .unwrap_or_default();
                (key.clone(), entries)
            })
            .collect())
    }

    async fn remove_values(&self, removals: &[(String, String)]) -> DispatchResult<()> {
        let mut state = self.state.lock().await;
        for (key, value) in removals {
            if let Some(list) = state.lists.get_mut(key) {
                if let Some(index) = list.iter().position(|entry| entry == value) {
                    list.remove(index);
                }
            }
        }
        Ok(())
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> DispatchResult<i64> {
        let mut state = self.state.lock().await;
        let count = state
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert(0);
        *count += delta;
        Ok(*count)
    }

    async fn hash_get_all(&self, key: &str) -> DispatchResult<HashMap<String, i64>> {
        Ok(self
            .state
            .lock()
            .await
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn ping(&self) -> DispatchResult<()> {
        Ok(())
    }
}
