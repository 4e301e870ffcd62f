//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks worker membership on the master and task executions on the
//! worker.
//!
//! # Example
//!
//! ```ignore
//! use crabload::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_task_execution("2xx", Duration::from_millis(40));
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

// Re-export key types for convenient access
pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

// Re-export metric constants for direct access when needed
pub use prometheus::{
    MESSAGES_SENT_TOTAL, REGISTRY, TASK_DURATION, TASK_EXECUTIONS_TOTAL, WORKERS_CONNECTED,
    WORKER_JOINS_TOTAL,
};
