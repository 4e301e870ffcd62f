//! Aggregation of task outcomes into a summary report.
//!
//! Counts executions per status code and tracks latency extremes. Individual
//! results are not retained.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use super::TaskOutcome;

/// Summary of every outcome recorded so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultReport {
    /// Number of completed executions per status code.
    pub status_codes: BTreeMap<u16, u64>,
    /// Executions answered with a status below 400.
    pub successes: u64,
    /// Executions that failed before producing a status.
    pub failures: u64,
    /// Average latency of completed executions, in milliseconds.
    pub average_latency_ms: f64,
    /// Fastest completed execution, in milliseconds.
    pub min_latency_ms: Option<u64>,
    /// Slowest completed execution, in milliseconds.
    pub max_latency_ms: Option<u64>,
}

impl ResultReport {
    /// Executions that produced a status code.
    pub fn responses(&self) -> u64 {
        self.status_codes.values().sum()
    }

    /// All recorded executions.
    pub fn total(&self) -> u64 {
        self.responses() + self.failures
    }
}

#[derive(Debug, Default)]
struct Totals {
    status_codes: BTreeMap<u16, u64>,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Option<Duration>,
}

/// Shared recorder fed by pool lanes.
#[derive(Debug, Default)]
pub struct ResultRecorder {
    totals: Mutex<Totals>,
}

impl ResultRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed execution.
    pub async fn record_outcome(&self, outcome: &TaskOutcome) {
        let mut totals = self.totals.lock().await;
        *totals.status_codes.entry(outcome.status).or_insert(0) += 1;
        if outcome.is_success() {
            totals.successes += 1;
        }
        totals.total_latency += outcome.elapsed;
        totals.min_latency = Some(
            totals
                .min_latency
                .map_or(outcome.elapsed, |m| m.min(outcome.elapsed)),
        );
        totals.max_latency = Some(
            totals
                .max_latency
                .map_or(outcome.elapsed, |m| m.max(outcome.elapsed)),
        );
    }

    /// Records an execution that failed.
    pub async fn record_failure(&self) {
        self.totals.lock().await.failures += 1;
    }

    /// Returns the current summary.
    pub async fn report(&self) -> ResultReport {
        let totals = self.totals.lock().await;
        let responses: u64 = totals.status_codes.values().sum();
        let average_latency_ms = if responses > 0 {
            totals.total_latency.as_secs_f64() * 1000.0 / responses as f64
        } else {
            0.0
        };

        ResultReport {
            status_codes: totals.status_codes.clone(),
            successes: totals.successes,
            failures: totals.failures,
            average_latency_ms,
            min_latency_ms: totals.min_latency.map(|d| d.as_millis() as u64),
            max_latency_ms: totals.max_latency.map(|d| d.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_report() {
        let report = ResultRecorder::new().report().await;
        assert_eq!(report, ResultReport::default());
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn test_report_aggregates_outcomes() {
        let recorder = ResultRecorder::new();
        recorder
            .record_outcome(&TaskOutcome::new(200, Duration::from_millis(10)))
            .await;
        recorder
            .record_outcome(&TaskOutcome::new(200, Duration::from_millis(30)))
            .await;
        recorder
            .record_outcome(&TaskOutcome::new(500, Duration::from_millis(20)))
            .await;
        recorder.record_failure().await;

        let report = recorder.report().await;
        assert_eq!(report.status_codes.get(&200), Some(&2));
        assert_eq!(report.status_codes.get(&500), Some(&1));
        assert_eq!(report.successes, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.responses(), 3);
        assert_eq!(report.total(), 4);
        assert!((report.average_latency_ms - 20.0).abs() < 0.001);
        assert_eq!(report.min_latency_ms, Some(10));
        assert_eq!(report.max_latency_ms, Some(30));
    }

    #[tokio::test]
    async fn test_report_serializes_to_json() {
        let recorder = ResultRecorder::new();
        recorder
            .record_outcome(&TaskOutcome::new(204, Duration::from_millis(5)))
            .await;

        let json = serde_json::to_value(recorder.report().await).unwrap();
        assert_eq!(json["status_codes"]["204"], 1);
        assert_eq!(json["successes"], 1);
        assert_eq!(json["failures"], 0);
    }

    #[tokio::test]
    async fn test_redirects_count_as_successes_and_client_errors_do_not() {
        let recorder = ResultRecorder::new();
        for status in [301, 399, 400, 404] {
            recorder
                .record_outcome(&TaskOutcome::new(status, Duration::from_millis(1)))
                .await;
        }

        let report = recorder.report().await;
        assert_eq!(report.responses(), 4);
        assert_eq!(report.successes, 2);
    }
}
