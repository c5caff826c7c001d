//! Job submission
//!
//! Any service can enqueue work for a dispatcher with a [`Submitter`].
//!
//! # Example
//!
//! ```rust,ignore
//! use job_dispatcher::{DispatcherConfig, RedisStore, Submitter};
//!
//! let config = DispatcherConfig::new("mail", "outbound");
//! let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
//!
//! let submitter = Submitter::new(store, &config);
//! submitter.submit("send_email", &json!({"to": "a@b.com"})).await?;
//! ```

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::job::JobEnvelope;
use crate::queue::QueueIdentity;
use crate::store::QueueStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Enqueues jobs onto one queue and keeps its outstanding counter.
pub struct Submitter {
    store: Arc<dyn QueueStore>,
    queue: QueueIdentity,
    suppress_counter: bool,
}

impl Submitter {
    pub fn new(store: Arc<dyn QueueStore>, config: &DispatcherConfig) -> Self {
        Self {
            store,
            queue: config.queue(),
            suppress_counter: config.suppress_counter,
        }
    }

    /// Target a different queue than the configured one.
    pub fn for_queue(store: Arc<dyn QueueStore>, queue: QueueIdentity) -> Self {
        Self {
            store,
            queue,
            suppress_counter: false,
        }
    }

    pub fn with_suppress_counter(mut self, suppress: bool) -> Self {
        self.suppress_counter = suppress;
        self
    }

    pub fn queue(&self) -> &QueueIdentity {
        &self.queue
    }

    /// Append a job to the tail of the queue.
    ///
    /// The push is the only step that can fail the call. A failed counter
    /// increment is logged and the job stays queued.
    pub async fn submit<A: Serialize + ?Sized>(&self, name: &str, args: &A) -> DispatchResult<()> {
        if name.is_empty() {
            return Err(DispatchError::InvalidJob("job name must not be empty".to_string()));
        }

        let envelope = JobEnvelope::new(name, serde_json::to_value(args)?);
        let payload = envelope.encode()?;
        let key = self.queue.key();

        self.store.push(&key, &payload).await?;
        debug!(queue = %key, job = %name, "Submitted job");

        if !self.suppress_counter {
            if let Err(e) = self
                .store
                .hash_increment(&self.queue.counter_key(), &key, 1)
                .await
            {
                warn!(error = %e, queue = %key, job = %name, "Failed to increment outstanding counter");
            }
        }

        Ok(())
    }
}
