//! Prometheus metrics for dispatcher workers
//!
//! Provides observability into dispatch throughput, stealing and store health.

use crate::error::RejectReason;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "Prometheus metrics initialized");
    Ok(())
}

/// Where a dequeued job came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSource {
    Primary,
    Sibling,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Primary => "primary",
            JobSource::Sibling => "sibling",
        }
    }
}

/// Dispatcher metrics helper, labelled by queue key
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    queue: String,
}

impl DispatchMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    /// Record a job being dequeued
    pub fn job_received(&self, source: JobSource) {
        counter!(
            "dispatcher_jobs_received_total",
            "queue" => self.queue.clone(),
            "source" => source.as_str()
        )
        .increment(1);
    }

    /// Record a job taken from a sibling queue
    pub fn job_stolen(&self, from: &str) {
        counter!(
            "dispatcher_jobs_stolen_total",
            "queue" => self.queue.clone(),
            "from" => from.to_string()
        )
        .increment(1);
    }

    /// Record a job dropped before running
    pub fn job_rejected(&self, reason: &RejectReason) {
        counter!(
            "dispatcher_jobs_rejected_total",
            "queue" => self.queue.clone(),
            "reason" => reason.label()
        )
        .increment(1);
    }

    /// Record a finished job
    pub fn job_finished(&self, status: &'static str, duration: Duration) {
        counter!(
            "dispatcher_jobs_processed_total",
            "queue" => self.queue.clone(),
            "status" => status
        )
        .increment(1);

        histogram!(
            "dispatcher_job_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed reconnect ping
    pub fn reconnect_attempts(&self, failed_pings: u32) {
        counter!(
            "dispatcher_reconnect_attempts_total",
            "queue" => self.queue.clone()
        )
        .increment(u64::from(failed_pings));
    }

    /// Update the in-flight gauge
    pub fn in_flight(&self, count: usize) {
        gauge!(
            "dispatcher_in_flight",
            "queue" => self.queue.clone()
        )
        .set(count as f64);
    }

    /// Update the crash-queue depth gauge
    pub fn crash_queue_depth(&self, depth: i64) {
        gauge!(
            "dispatcher_crash_queue_depth",
            "queue" => self.queue.clone()
        )
        .set(depth as f64);
    }
}
