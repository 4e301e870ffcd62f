//! Recording facade over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`super::init_metrics`] has run, so
//! library code and tests can record unconditionally.

use std::time::Duration;

use super::prometheus::{
    MESSAGES_SENT_TOTAL, TASK_DURATION, TASK_EXECUTIONS_TOTAL, WORKERS_CONNECTED,
    WORKER_JOINS_TOTAL,
};

/// Metrics collector for recording crabload operational metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a worker joining; `connected` is the registry size after it.
    pub fn record_worker_joined(&self, connected: usize) {
        if let Some(joins) = WORKER_JOINS_TOTAL.get() {
            joins.inc();
        }
        self.set_workers_connected(connected);
    }

    /// Record a worker leaving; `connected` is the registry size after it.
    pub fn record_worker_left(&self, connected: usize) {
        self.set_workers_connected(connected);
    }

    /// Record one protocol message written (`concurrency`, `task`, `heartbeat`, `ack`).
    pub fn record_message_sent(&self, kind: &str) {
        if let Some(sent) = MESSAGES_SENT_TOTAL.get() {
            sent.with_label_values(&[kind]).inc();
        }
    }

    /// Record a task execution.
    ///
    /// # Arguments
    ///
    /// * `outcome` - Status class such as `2xx`, or `error`
    /// * `duration` - Time spent executing
    pub fn record_task_execution(&self, outcome: &str, duration: Duration) {
        if let Some(executions) = TASK_EXECUTIONS_TOTAL.get() {
            executions.with_label_values(&[outcome]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration.observe(duration.as_secs_f64());
        }

        tracing::trace!(
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Recorded task metric"
        );
    }

    fn set_workers_connected(&self, connected: usize) {
        if let Some(gauge) = WORKERS_CONNECTED.get() {
            gauge.set(connected as f64);
        }
    }
}
