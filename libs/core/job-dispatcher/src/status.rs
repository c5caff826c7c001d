//! Job status reporting
//!
//! After a job runs, the dispatcher tells a [`StatusSink`] how it ended.
//! The default sink drops the notification; [`CallbackQueueSink`] records it
//! on the queue's callback list for an external consumer.

use crate::job::{StatusRecord, WorkStatus};
use crate::queue::QueueIdentity;
use crate::store::QueueStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives terminal job statuses.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn notify(&self, name: &str, status: WorkStatus, info: &str);
}

/// Sink that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusSink;

#[async_trait]
impl StatusSink for NoopStatusSink {
    async fn notify(&self, _name: &str, _status: WorkStatus, _info: &str) {}
}

/// Pushes a [`StatusRecord`] onto the head of the queue's callback list.
pub struct CallbackQueueSink {
    store: Arc<dyn QueueStore>,
    callback_key: String,
}

impl CallbackQueueSink {
    pub fn new(store: Arc<dyn QueueStore>, queue: &QueueIdentity) -> Self {
        Self {
            store,
            callback_key: queue.callback_key(),
        }
    }

    pub fn callback_key(&self) -> &str {
        &self.callback_key
    }
}

#[async_trait]
impl StatusSink for CallbackQueueSink {
    async fn notify(&self, name: &str, status: WorkStatus, info: &str) {
        let record = StatusRecord::new(name, status, info);
        let data = match serde_json::to_string(&record) {
            Ok(data) => data,
            Err(e) => {
                warn!(job = %name, error = %e, "Failed to encode status record");
                return;
            }
        };

        match self.store.push_front(&self.callback_key, &data).await {
            Ok(()) => debug!(job = %name, status = ?status, "Recorded job status"),
            Err(e) => warn!(
                job = %name,
                status = ?status,
                error = %e,
                "Failed to record job status"
            ),
        }
    }
}
