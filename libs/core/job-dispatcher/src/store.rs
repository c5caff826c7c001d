//! Store adapter
//!
//! The dispatcher only talks to the store through [`QueueStore`]. The Redis
//! implementation maps each operation onto list and hash commands:
//!
//! | Operation        | Redis                      |
//! |------------------|----------------------------|
//! | `blocking_pop`   | `BLPOP key timeout`        |
//! | `push`           | `RPUSH`                    |
//! | `push_front`     | `LPUSH`                    |
//! | `list_len`       | `LLEN`                     |
//! | `scan_keys`      | `SCAN cursor MATCH COUNT`  |
//! | `range_all`      | pipelined `LRANGE 0 -1`    |
//! | `remove_values`  | pipelined `LREM key 1 v`   |
//! | `hash_increment` | `HINCRBY`                  |
//! | `hash_get_all`   | `HGETALL`                  |
//! | `ping`           | `PING`                     |

use crate::config::MIN_POP_TIMEOUT;
use crate::error::DispatchResult;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Operations the dispatcher needs from the blocking-queue store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Pop the head of `key`, waiting up to `timeout`. `None` means nothing arrived.
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> DispatchResult<Option<String>>;

    /// Append `value` to the tail of `key`.
    async fn push(&self, key: &str, value: &str) -> DispatchResult<()>;

    /// Prepend `value` to the head of `key`.
    async fn push_front(&self, key: &str, value: &str) -> DispatchResult<()>;

    /// Length of the list at `key` (0 when missing).
    async fn list_len(&self, key: &str) -> DispatchResult<i64>;

    /// Every key matching `pattern`, fetched `page_size` at a time.
    async fn scan_keys(&self, pattern: &str, page_size: usize) -> DispatchResult<Vec<String>>;

    /// Full contents of each list, in one round trip. Keys that do not hold a
    /// list are left out of the result.
    async fn range_all(&self, keys: &[String]) -> DispatchResult<Vec<(String, Vec<String>)>>;

    /// Remove one occurrence of each `(key, value)` pair, in one round trip.
    async fn remove_values(&self, removals: &[(String, String)]) -> DispatchResult<()>;

    /// Atomically add `delta` to `field` of hash `key`, returning the new value.
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> DispatchResult<i64>;

    /// Read a whole counter hash. Fields that are not integers read as 0.
    async fn hash_get_all(&self, key: &str) -> DispatchResult<HashMap<String, i64>>;

    /// Connectivity probe.
    async fn ping(&self) -> DispatchResult<()>;
}

/// Redis-backed [`QueueStore`].
///
/// Plain commands share one [`ConnectionManager`]. A blocking pop parks the
/// connection it runs on, so each pop borrows a dedicated connection from a
/// small pool that grows on demand. Those connections have no response
/// timeout, since the pop itself bounds the wait.
pub struct RedisStore {
    client: Client,
    shared: ConnectionManager,
    blocking: Mutex<Vec<ConnectionManager>>,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with `PING`.
    pub async fn connect(url: &str) -> DispatchResult<Self> {
        info!("Attempting to connect to Redis at {}", url);

        let client = Client::open(url)?;
        let shared = ConnectionManager::new(client.clone()).await?;

        let mut conn = shared.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Successfully connected to Redis");
        Ok(Self {
            client,
            shared,
            blocking: Mutex::new(Vec::new()),
        })
    }

    /// Number of idle blocking connections currently pooled.
    pub async fn idle_blocking_connections(&self) -> usize {
        self.blocking.lock().await.len()
    }

    async fn checkout_blocking(&self) -> DispatchResult<ConnectionManager> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }

        debug!("Opening dedicated connection for blocking pops");
        let config = ConnectionManagerConfig::new().set_response_timeout(None);
        let conn = ConnectionManager::new_with_config(self.client.clone(), config).await?;
        Ok(conn)
    }

    async fn checkin_blocking(&self, conn: ConnectionManager) {
        self.blocking.lock().await.push(conn);
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> DispatchResult<Option<String>> {
        let timeout = timeout.max(MIN_POP_TIMEOUT);
        let mut conn = self.checkout_blocking().await?;

        let result: redis::RedisResult<Option<(String, String)>> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await;

        // A failed connection is dropped rather than returned to the pool.
        match result {
            Ok(popped) => {
                self.checkin_blocking(conn).await;
                Ok(popped.map(|(_key, value)| value))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn push(&self, key: &str, value: &str) -> DispatchResult<()> {
        let mut conn = self.shared.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn push_front(&self, key: &str, value: &str) -> DispatchResult<()> {
        let mut conn = self.shared.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_len(&self, key: &str) -> DispatchResult<i64> {
        let mut conn = self.shared.clone();
        let len: i64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn scan_keys(&self, pattern: &str, page_size: usize) -> DispatchResult<Vec<String>> {
        let mut conn = self.shared.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(page_size)
                .query_async(&mut conn)
                .await?;

            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn range_all(&self, keys: &[String]) -> DispatchResult<Vec<(String, Vec<String>)>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = self.shared.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("LRANGE").arg(key).arg(0).arg(-1);
        }

        // WRONGTYPE replies for non-list keys come back per entry.
        let lists: Vec<redis::RedisResult<Vec<String>>> =
            pipe.ignore_errors().query_async(&mut conn).await?;

        Ok(keys
            .iter()
            .zip(lists)
            .filter_map(|(key, list)| match list {
                Ok(values) => Some((key.clone(), values)),
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping key that is not a list");
                    None
                }
            })
            .collect())
    }

    async fn remove_values(&self, removals: &[(String, String)]) -> DispatchResult<()> {
        if removals.is_empty() {
            return Ok(());
        }

        let mut conn = self.shared.clone();
        let mut pipe = redis::pipe();
        for (key, value) in removals {
            pipe.cmd("LREM").arg(key).arg(1).arg(value).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> DispatchResult<i64> {
        let mut conn = self.shared.clone();
        let value: i64 = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> DispatchResult<HashMap<String, i64>> {
        let mut conn = self.shared.clone();
        let raw: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;

        Ok(raw
            .into_iter()
            .map(|(field, value)| {
                let count = value.trim().parse::<i64>().unwrap_or(0);
                (field, count)
            })
            .collect())
    }

    async fn ping(&self) -> DispatchResult<()> {
        let mut conn = self.shared.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
