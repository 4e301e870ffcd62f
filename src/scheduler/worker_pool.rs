//! Bounded-concurrency execution of a batch of tasks.
//!
//! A [`BoundedPool`] runs a finite batch with a fixed number of lanes. Each
//! lane pulls from a shared queue that is filled once and never grows,
//! waits for the configured pacing delay, executes the task, and loops
//! until the queue is drained. `run` returns after every lane finished.
//!
//! # Features
//!
//! - Exactly `concurrency` lanes per batch
//! - Pacing via any [`WaitStrategy`]
//! - Per-task failures are logged and counted, never abort the batch
//! - Batch statistics, optionally fed into a shared [`ResultRecorder`]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::wait::{pace, WaitStrategy};
use crate::metrics::MetricsCollector;
use crate::task::{ResultRecorder, Task, TaskExecutor};

/// Statistics about one pool run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    /// Number of lanes spawned.
    pub lanes: usize,
    /// Tasks that executed and produced an outcome.
    pub tasks_completed: u64,
    /// Tasks whose execution failed.
    pub tasks_failed: u64,
    /// Average task execution duration.
    pub average_task_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of tasks processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking statistics across lanes.
struct SharedPoolStats {
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    total_duration_us: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, lanes: usize) -> PoolStats {
        let completed = self.tasks_completed.load(Ordering::SeqCst);
        let failed = self.tasks_failed.load(Ordering::SeqCst);
        let total_duration_us = self.total_duration_us.load(Ordering::SeqCst);

        let total_tasks = completed + failed;
        let average_duration = if total_tasks > 0 {
            Duration::from_micros(total_duration_us / total_tasks)
        } else {
            Duration::ZERO
        };

        PoolStats {
            lanes,
            tasks_completed: completed,
            tasks_failed: failed,
            average_task_duration: average_duration,
        }
    }
}

/// A queue filled once at construction. It has no way to add tasks.
struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into()),
        }
    }

    async fn next(&self) -> Option<Task> {
        self.tasks.lock().await.pop_front()
    }
}

/// Executes batches of tasks with a concurrency ceiling.
#[derive(Clone)]
pub struct BoundedPool {
    executor: Arc<dyn TaskExecutor>,
    wait: Arc<dyn WaitStrategy>,
    recorder: Option<Arc<ResultRecorder>>,
    metrics: MetricsCollector,
}

impl BoundedPool {
    /// Creates a pool that executes with `executor` and paces with `wait`.
    pub fn new(executor: Arc<dyn TaskExecutor>, wait: Arc<dyn WaitStrategy>) -> Self {
        Self {
            executor,
            wait,
            recorder: None,
            metrics: MetricsCollector::new(),
        }
    }

    /// Feeds every outcome into `recorder` as well.
    pub fn with_recorder(mut self, recorder: Arc<ResultRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Runs `tasks` on exactly `concurrency` lanes and waits for all of them.
    ///
    /// With `concurrency == 0` or no tasks this returns immediately and the
    /// executor is never called.
    pub async fn run(&self, tasks: Vec<Task>, concurrency: usize) -> PoolStats {
        if concurrency == 0 || tasks.is_empty() {
            debug!(
                concurrency = concurrency,
                tasks = tasks.len(),
                "Nothing to execute"
            );
            return PoolStats::default();
        }

        let queue = Arc::new(TaskQueue::new(tasks));
        let stats = Arc::new(SharedPoolStats::new());
        let mut lanes = JoinSet::new();

        for lane_id in 0..concurrency {
            let lane = Lane {
                id: lane_id,
                queue: Arc::clone(&queue),
                executor: Arc::clone(&self.executor),
                wait: Arc::clone(&self.wait),
                recorder: self.recorder.clone(),
                stats: Arc::clone(&stats),
                metrics: self.metrics.clone(),
            };
            lanes.spawn(lane.run());
        }

        while let Some(joined) = lanes.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Pool lane panicked");
            }
        }

        stats.to_pool_stats(concurrency)
    }
}

/// One execution lane of a pool run.
struct Lane {
    id: usize,
    queue: Arc<TaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    wait: Arc<dyn WaitStrategy>,
    recorder: Option<Arc<ResultRecorder>>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Lane {
    async fn run(self) {
        while let Some(task) = self.queue.next().await {
            pace(self.wait.as_ref()).await;

            let start = Instant::now();
            match self.executor.execute(&task).await {
                Ok(outcome) => {
                    self.stats.record_completion(outcome.elapsed);
                    self.metrics
                        .record_task_execution(outcome.status_class(), outcome.elapsed);
                    if let Some(recorder) = &self.recorder {
                        recorder.record_outcome(&outcome).await;
                    }
                    debug!(
                        lane = self.id,
                        task = %task,
                        status = outcome.status,
                        duration_ms = outcome.elapsed.as_millis() as u64,
                        "Task executed"
                    );
                }
                Err(e) => {
                    let elapsed = start.elapsed();
                    self.stats.record_failure(elapsed);
                    self.metrics.record_task_execution("error", elapsed);
                    if let Some(recorder) = &self.recorder {
                        recorder.record_failure().await;
                    }
                    warn!(lane = self.id, task = %task, error = %e, "Task execution failed");
                }
            }
        }
    }
}
