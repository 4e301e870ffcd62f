//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by crabload and provides
//! functions for initializing, registering, and exporting them.

use prometheus::{Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all crabload metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Number of workers currently registered with the master.
pub static WORKERS_CONNECTED: OnceLock<Gauge> = OnceLock::new();

/// Total number of workers that ever joined.
pub static WORKER_JOINS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Protocol messages written, labeled by kind.
pub static MESSAGES_SENT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Task executions, labeled by outcome (status class or `error`).
pub static TASK_EXECUTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Task execution duration in seconds.
pub static TASK_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are harmless: the first set of
/// metrics stays in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    // Serialize initialization so all statics come from the same registry.
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let workers_connected = Gauge::new(
        "crabload_workers_connected",
        "Number of workers currently registered",
    )?;

    let worker_joins_total = Counter::new(
        "crabload_worker_joins_total",
        "Total number of workers that joined",
    )?;

    let messages_sent_total = CounterVec::new(
        Opts::new("crabload_messages_sent_total", "Protocol messages written"),
        &["kind"],
    )?;

    let task_executions_total = CounterVec::new(
        Opts::new("crabload_task_executions_total", "Total task executions"),
        &["outcome"],
    )?;

    let task_duration = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "crabload_task_duration_seconds",
            "Task execution duration in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )?;

    registry.register(Box::new(workers_connected.clone()))?;
    registry.register(Box::new(worker_joins_total.clone()))?;
    registry.register(Box::new(messages_sent_total.clone()))?;
    registry.register(Box::new(task_executions_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = WORKERS_CONNECTED.set(workers_connected);
    let _ = WORKER_JOINS_TOTAL.set(worker_joins_total);
    let _ = MESSAGES_SENT_TOTAL.set(messages_sent_total);
    let _ = TASK_EXECUTIONS_TOTAL.set(task_executions_total);
    let _ = TASK_DURATION.set(task_duration);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
    }
}
