//! Dispatcher configuration
//!
//! This module provides `DispatcherConfig`, built either with `with_*`
//! setters or from environment variables.

use crate::error::ConfigError;
use crate::queue::{QueueIdentity, DEFAULT_GROUP, DEFAULT_NAME};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Shortest blocking pop. `BLPOP` treats a zero timeout as "wait forever".
pub const MIN_POP_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration for a dispatcher worker
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queue this worker listens on
    pub queue_name: String,

    /// Group the queue belongs to (siblings share a group)
    pub queue_group: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Unique worker ID used in logs (auto-generated if not provided)
    pub worker_id: String,

    /// Maximum concurrent loop iterations (pops plus running handlers)
    pub concurrency: usize,

    /// Skip counter increments when submitting jobs
    pub suppress_counter: bool,

    /// How long a pop blocks before returning empty
    pub pop_timeout: Duration,

    /// Pause after an iteration that found no job
    pub idle_delay: Duration,

    /// Pause between starting loop iterations
    pub yield_delay: Duration,

    /// First wait after a failed reconnect ping
    pub reconnect_initial: Duration,

    /// Optional ceiling for the reconnect wait (None = keeps doubling)
    pub reconnect_max: Option<Duration>,
}

impl DispatcherConfig {
    /// Create a configuration for `group/name`.
    pub fn new(queue_group: impl Into<String>, queue_name: impl Into<String>) -> Self {
        let queue = QueueIdentity::new(queue_group, queue_name);
        Self {
            queue_name: queue.name().to_string(),
            queue_group: queue.group().to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: 1,
            suppress_counter: false,
            pop_timeout: Duration::from_secs(1),
            idle_delay: Duration::from_millis(1),
            yield_delay: Duration::from_millis(1),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `REDIS_URL` or `REDIS_HOST` (required)
    /// - `QUEUE_NAME`, `QUEUE_GROUP` (optional, sentinel defaults)
    /// - `QUEUE_CONCURRENCY` (optional, default 1)
    /// - `QUEUE_SUPPRESS_COUNTER` (optional, `true`/`1` to enable)
    /// - `QUEUE_POP_TIMEOUT_MS` (optional, default 1000, must be positive)
    /// - `QUEUE_RECONNECT_MAX_MS` (optional, no ceiling when unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_url = env_non_empty("REDIS_URL")
            .or_else(|| env_non_empty("REDIS_HOST"))
            .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;

        let mut config = Self::new(
            env_non_empty("QUEUE_GROUP").unwrap_or_default(),
            env_non_empty("QUEUE_NAME").unwrap_or_default(),
        )
        .with_redis_url(redis_url);

        if let Some(concurrency) = env_parse::<usize>("QUEUE_CONCURRENCY")? {
            config = config.with_concurrency(concurrency);
        }
        if let Some(suppress) = env_non_empty("QUEUE_SUPPRESS_COUNTER") {
            config = config.with_suppress_counter(parse_flag("QUEUE_SUPPRESS_COUNTER", &suppress)?);
        }
        if let Some(ms) = env_parse::<u64>("QUEUE_POP_TIMEOUT_MS")? {
            if ms == 0 {
                return Err(ConfigError::ParseError {
                    key: "QUEUE_POP_TIMEOUT_MS".to_string(),
                    details: "must be greater than zero".to_string(),
                });
            }
            config = config.with_pop_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = env_parse::<u64>("QUEUE_RECONNECT_MAX_MS")? {
            config = config.with_reconnect_max(Some(Duration::from_millis(ms)));
        }

        Ok(config)
    }

    /// The queue this worker listens on.
    pub fn queue(&self) -> QueueIdentity {
        QueueIdentity::new(&self.queue_group, &self.queue_name)
    }

    /// Set the Redis URL
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the concurrency (clamped to at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Skip counter increments on submit
    pub fn with_suppress_counter(mut self, suppress: bool) -> Self {
        self.suppress_counter = suppress;
        self
    }

    /// Set the blocking pop timeout (clamped to at least [`MIN_POP_TIMEOUT`])
    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout.max(MIN_POP_TIMEOUT);
        self
    }

    /// Set the pause after an empty iteration
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    /// Set the pause between iterations
    pub fn with_yield_delay(mut self, delay: Duration) -> Self {
        self.yield_delay = delay;
        self
    }

    /// Set the first reconnect wait
    pub fn with_reconnect_initial(mut self, delay: Duration) -> Self {
        self.reconnect_initial = delay;
        self
    }

    /// Set or clear the reconnect ceiling
    pub fn with_reconnect_max(mut self, max: Option<Duration>) -> Self {
        self.reconnect_max = max;
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP, DEFAULT_NAME)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_non_empty(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            })
        })
        .transpose()
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ParseError {
            key: key.to_string(),
            details: format!("expected a boolean, got '{}'", other),
        }),
    }
}
