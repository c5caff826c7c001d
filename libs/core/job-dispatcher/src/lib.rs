//! Job Dispatcher
//!
//! A distributed job-dispatch library backed by Redis lists.
//!
//! ## Features
//!
//! - **Named handlers**: jobs carry a name and are routed through a `WorkerRegistry`
//! - **Bounded concurrency**: at most N loop iterations in flight per worker
//! - **Group load balancing**: idle workers pop from the busiest sibling queue
//! - **Reconnect backoff**: the loop stalls and pings the store until it answers
//! - **Status reporting**: pluggable `StatusSink`, optionally on a callback queue
//! - **Prometheus metrics**: built-in observability
//!
//! ## Example
//!
//! ```ignore
//! use job_dispatcher::{handler_fn, Dispatcher, DispatcherConfig, RedisStore, Submitter};
//!
//! let config = DispatcherConfig::from_env()?;
//! let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
//!
//! // Producer side
//! Submitter::new(store.clone(), &config)
//!     .submit("send_email", &json!({"to": "a@b.com"}))
//!     .await?;
//!
//! // Worker side
//! let dispatcher = Dispatcher::new(store, config);
//! dispatcher.register("send_email", handler_fn(|args| async move {
//!     tracing::info!(%args, "sending");
//!     Ok(())
//! }));
//! dispatcher.run().await?;
//! ```

mod admin;
mod backoff;
mod balancer;
mod config;
mod dispatcher;
mod error;
mod gate;
mod job;
pub mod metrics;
mod producer;
mod queue;
mod registry;
mod status;
mod store;

// Re-export main types
pub use admin::{matches_job, QueueAdmin, SCAN_PAGE_SIZE};
pub use backoff::ReconnectBackoff;
pub use balancer::{pick_busiest, GroupBalancer, StolenJob};
pub use config::{DispatcherConfig, MIN_POP_TIMEOUT};
pub use dispatcher::{Dispatcher, ExecutionOutcome, IterationReport, WorkHook};
pub use error::{ConfigError, DispatchError, DispatchResult, RejectReason};
pub use gate::{ConcurrencyGate, GatePermit};
pub use job::{lookup_path, render_value, JobEnvelope, ParsedJob, StatusRecord, WorkStatus};
pub use metrics::{init_metrics, DispatchMetrics, JobSource};
pub use producer::Submitter;
pub use queue::{is_counter_key, QueueIdentity, DEFAULT_GROUP, DEFAULT_NAME};
pub use registry::{handler_fn, FnHandler, JobHandler, Registration, WorkerRegistry};
pub use status::{CallbackQueueSink, NoopStatusSink, StatusSink};
pub use store::{QueueStore, RedisStore};
