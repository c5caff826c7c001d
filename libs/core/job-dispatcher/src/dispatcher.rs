//! The dispatch loop.
//!
//! A [`Dispatcher`] pops jobs from its primary queue, falls back to the
//! busiest sibling of its group, routes each job to the registered handler
//! and keeps the group counters in step.
//!
//! ```text
//! ┌──────────┐ permit ┌──────────────────────────────────────────────┐
//! │   run    │───────>│ iteration (spawned, at most N at once)       │
//! │  loop    │        │  crash check → pop primary → steal sibling   │
//! └────┬─────┘        │  → route → execute → hooks → status → HINCRBY│
//!      │ 1ms          └──────────────────────────────────────────────┘
//!      └── waits while a reconnect holds the backoff lock
//! ```

use crate::backoff::ReconnectBackoff;
use crate::balancer::GroupBalancer;
use crate::config::DispatcherConfig;
use crate::error::{DispatchResult, RejectReason};
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::job::{ParsedJob, WorkStatus};
use crate::metrics::{DispatchMetrics, JobSource};
use crate::queue::QueueIdentity;
use crate::registry::{JobHandler, Registration, WorkerRegistry};
use crate::status::{NoopStatusSink, StatusSink};
use crate::store::QueueStore;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Hook run around every job execution.
pub type WorkHook = Arc<dyn Fn() -> eyre::Result<()> + Send + Sync>;

/// How a handler run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    /// The handler returned an error.
    Failed(String),
    /// The handler panicked.
    Panicked(String),
}

impl ExecutionOutcome {
    pub fn status(&self) -> WorkStatus {
        match self {
            ExecutionOutcome::Success => WorkStatus::Success,
            ExecutionOutcome::Failed(_) | ExecutionOutcome::Panicked(_) => WorkStatus::Failure,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failed(_) => "failed",
            ExecutionOutcome::Panicked(_) => "panicked",
        }
    }

    fn info(&self) -> String {
        match self {
            ExecutionOutcome::Success => String::new(),
            ExecutionOutcome::Failed(detail) => detail.clone(),
            ExecutionOutcome::Panicked(detail) => format!("panic: {}", detail),
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationReport {
    /// No job was found on the primary queue or any sibling.
    Idle,
    /// A job was dequeued but dropped before any handler ran.
    Rejected {
        source: JobSource,
        from: String,
        reason: RejectReason,
    },
    /// A handler ran.
    Executed {
        source: JobSource,
        from: String,
        job: String,
        outcome: ExecutionOutcome,
    },
}

impl IterationReport {
    pub fn is_idle(&self) -> bool {
        matches!(self, IterationReport::Idle)
    }

    /// Store key the job was popped from.
    pub fn source_key(&self) -> Option<&str> {
        match self {
            IterationReport::Idle => None,
            IterationReport::Rejected { from, .. } | IterationReport::Executed { from, .. } => {
                Some(from)
            }
        }
    }
}

/// Worker that dispatches jobs from one queue of a group.
///
/// # Example
///
/// ```rust,ignore
/// use job_dispatcher::{handler_fn, Dispatcher, DispatcherConfig, RedisStore};
///
/// let config = DispatcherConfig::from_env()?;
/// let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
///
/// let dispatcher = Dispatcher::new(store, config);
/// dispatcher.register("send_email", handler_fn(|args| async move {
///     tracing::info!(%args, "sending");
///     Ok(())
/// }));
/// dispatcher.run().await?;
/// ```
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: QueueIdentity,
    store: Arc<dyn QueueStore>,
    registry: Arc<WorkerRegistry>,
    gate: ConcurrencyGate,
    balancer: GroupBalancer,
    /// Held for the whole reconnect, which stalls every iteration and the spawner.
    backoff: Mutex<ReconnectBackoff>,
    status_sink: Arc<dyn StatusSink>,
    before_work: Option<WorkHook>,
    after_work: Option<WorkHook>,
    metrics: DispatchMetrics,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn QueueStore>, config: DispatcherConfig) -> Self {
        let queue = config.queue();
        let backoff = ReconnectBackoff::new(config.reconnect_initial).with_max(config.reconnect_max);

        Self {
            gate: ConcurrencyGate::new(config.concurrency),
            balancer: GroupBalancer::new(queue.clone(), config.pop_timeout),
            backoff: Mutex::new(backoff),
            registry: Arc::new(WorkerRegistry::new()),
            status_sink: Arc::new(NoopStatusSink),
            before_work: None,
            after_work: None,
            metrics: DispatchMetrics::new(queue.key()),
            queue,
            store,
            config,
        }
    }

    /// Share a registry with other components.
    pub fn with_registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    /// Run `hook` before each job. An error drops the job.
    pub fn with_before_work<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.before_work = Some(Arc::new(hook));
        self
    }

    /// Run `hook` after each job. An error is only logged.
    pub fn with_after_work<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.after_work = Some(Arc::new(hook));
        self
    }

    pub fn register(&self, name: impl Into<String>, handler: impl JobHandler + 'static) {
        self.registry.register(name, handler);
    }

    pub fn register_batch(&self, registrations: impl IntoIterator<Item = Registration>) {
        self.registry.register_batch(registrations);
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// A handle on the concurrency gate (shares its counters).
    pub fn gate(&self) -> ConcurrencyGate {
        self.gate.clone()
    }

    pub fn queue(&self) -> &QueueIdentity {
        &self.queue
    }

    /// Run the loop forever.
    ///
    /// Only returns if the gate is closed.
    pub async fn run(self) -> DispatchResult<()> {
        info!(
            worker_id = %self.config.worker_id,
            queue = %self.queue,
            concurrency = self.gate.capacity(),
            handlers = ?self.registry.names(),
            stealing = self.balancer.enabled(),
            "Starting dispatcher"
        );

        let this = Arc::new(self);
        let mut iterations: JoinSet<IterationReport> = JoinSet::new();

        loop {
            // Block while a reconnect is in progress
            drop(this.backoff.lock().await);

            let permit = this.claim_slot().await?;

            let worker = Arc::clone(&this);
            iterations.spawn(async move {
                let report = worker.iterate().await;
                worker.release_slot(permit);
                report
            });

            while let Some(finished) = iterations.try_join_next() {
                match finished {
                    Ok(report) => debug!(report = ?report, "Iteration finished"),
                    Err(e) => error!(error = %e, "Iteration aborted"),
                }
            }

            tokio::time::sleep(this.config.yield_delay).await;
        }
    }

    /// Run a single iteration inline, holding one gate slot.
    pub async fn run_once(&self) -> DispatchResult<IterationReport> {
        let permit = self.claim_slot().await?;
        let report = self.iterate().await;
        self.release_slot(permit);
        Ok(report)
    }

    async fn claim_slot(&self) -> DispatchResult<GatePermit> {
        let permit = self.gate.acquire().await?;
        self.metrics.in_flight(self.gate.in_flight());
        Ok(permit)
    }

    fn release_slot(&self, permit: GatePermit) {
        drop(permit);
        self.metrics.in_flight(self.gate.in_flight());
    }

    async fn iterate(&self) -> IterationReport {
        self.check_crash_queue().await;

        let primary_key = self.queue.key();
        let mut fetched = match self
            .store
            .blocking_pop(&primary_key, self.config.pop_timeout)
            .await
        {
            Ok(payload) => payload.map(|payload| (JobSource::Primary, primary_key, payload)),
            Err(e) => {
                error!(error = %e, queue = %primary_key, "Failed to pop primary queue");
                if e.is_connectivity() {
                    self.reconnect().await;
                }
                None
            }
        };

        if fetched.is_none() {
            fetched = match self.balancer.steal(self.store.as_ref()).await {
                Ok(stolen) => stolen.map(|job| (JobSource::Sibling, job.from, job.payload)),
                Err(e) => {
                    error!(error = %e, group = %self.queue.group(), "Failed to pop sibling queue");
                    if e.is_connectivity() {
                        self.reconnect().await;
                    }
                    None
                }
            };
        }

        let Some((source, from, payload)) = fetched else {
            tokio::time::sleep(self.config.idle_delay).await;
            return IterationReport::Idle;
        };

        self.metrics.job_received(source);
        if source == JobSource::Sibling {
            self.metrics.job_stolen(&from);
            info!(queue = %self.queue, from = %from, "Took job from sibling queue");
        }

        let report = self.dispatch(source, &from, &payload).await;
        self.decrement_counter(&from).await;
        report
    }

    async fn dispatch(&self, source: JobSource, from: &str, payload: &str) -> IterationReport {
        let job = match ParsedJob::parse(payload) {
            Ok(job) => job,
            Err(reason) => return self.reject(source, from, payload, reason),
        };

        let Some(handler) = self.registry.lookup(&job.name) else {
            let reason = RejectReason::Unregistered(job.name);
            return self.reject(source, from, payload, reason);
        };

        if let Some(hook) = &self.before_work {
            if let Err(e) = hook() {
                return self.reject(source, from, payload, RejectReason::BeforeHook(format!("{:#}", e)));
            }
        }

        info!(job = %job.name, args = %job.args, from = %from, "Running job");
        let started = Instant::now();
        let outcome = execute(handler.as_ref(), &job.args).await;
        let elapsed = started.elapsed();

        if let Some(hook) = &self.after_work {
            if let Err(e) = hook() {
                warn!(job = %job.name, error = %e, "After-work hook failed");
            }
        }

        match &outcome {
            ExecutionOutcome::Success => {
                info!(job = %job.name, duration_ms = elapsed.as_millis() as u64, "Job finished")
            }
            ExecutionOutcome::Failed(detail) => {
                error!(job = %job.name, error = %detail, "Job failed")
            }
            ExecutionOutcome::Panicked(detail) => {
                error!(job = %job.name, panic = %detail, "Job panicked")
            }
        }
        self.metrics.job_finished(outcome.label(), elapsed);
        self.status_sink
            .notify(&job.name, outcome.status(), &outcome.info())
            .await;

        IterationReport::Executed {
            source,
            from: from.to_string(),
            job: job.name,
            outcome,
        }
    }

    fn reject(
        &self,
        source: JobSource,
        from: &str,
        payload: &str,
        reason: RejectReason,
    ) -> IterationReport {
        warn!(from = %from, payload = %payload, reason = %reason, "Dropping job");
        self.metrics.job_rejected(&reason);
        IterationReport::Rejected {
            source,
            from: from.to_string(),
            reason,
        }
    }

    async fn check_crash_queue(&self) {
        let crash_key = self.queue.crash_key();
        if let Ok(depth) = self.store.list_len(&crash_key).await {
            self.metrics.crash_queue_depth(depth);
            if depth > 0 {
                warn!(queue = %crash_key, depth = depth, "Crashed jobs waiting for attention");
            }
        }
    }

    async fn decrement_counter(&self, from: &str) {
        if let Err(e) = self
            .store
            .hash_increment(&self.queue.counter_key(), from, -1)
            .await
        {
            warn!(error = %e, queue = %from, "Failed to decrement outstanding counter");
        }
    }

    async fn reconnect(&self) {
        let mut backoff = self.backoff.lock().await;
        let failed = backoff.wait_for_store(self.store.as_ref()).await;
        if failed > 0 {
            self.metrics.reconnect_attempts(failed);
        }
    }
}

async fn execute(handler: &dyn JobHandler, args: &str) -> ExecutionOutcome {
    match AssertUnwindSafe(handler.handle(args)).catch_unwind().await {
        Ok(Ok(())) => ExecutionOutcome::Success,
        Ok(Err(e)) => ExecutionOutcome::Failed(format!("{:#}", e)),
        Err(panic) => ExecutionOutcome::Panicked(panic_message(panic.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
