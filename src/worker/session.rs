//! Worker side of the connection: reads one line at a time and dispatches it.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::protocol::{LineConnection, Message};
use crate::scheduler::BoundedPool;
use crate::task::Task;

/// Per-connection state of a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Concurrency most recently assigned by the master.
    pub concurrency: usize,
    /// `task:` messages handled.
    pub tasks_run: u64,
    /// `NO_TASK` heartbeats received.
    pub heartbeats: u64,
    /// `concurrency:` messages received.
    pub concurrency_updates: u64,
    /// Lines that could not be handled.
    pub protocol_errors: u64,
}

/// What the session loop does after a message was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Reply(Message),
    Idle,
    Continue,
}

/// The dispatch loop for one connection to the master.
pub struct WorkerSession {
    connection: LineConnection,
    pool: BoundedPool,
    heartbeat_interval: Duration,
    state: SessionState,
}

impl WorkerSession {
    pub fn new(connection: LineConnection, pool: BoundedPool, heartbeat_interval: Duration) -> Self {
        Self {
            connection,
            pool,
            heartbeat_interval,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handles lines until `shutdown` resolves or the transport fails.
    ///
    /// Shutdown is only observed between messages, so a task in progress
    /// is finished and acknowledged first.
    ///
    /// # Errors
    ///
    /// Returns the `TransportError` that ended the session. End of stream
    /// is `TransportError::Closed`.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<(), TransportError> {
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                _ = &mut shutdown => break,
                line = self.connection.receive() => line?,
            };

            let message = match Message::parse(&line) {
                Ok(message) => message,
                Err(e) => {
                    self.state.protocol_errors += 1;
                    warn!(error = %e, "Dropping message");
                    continue;
                }
            };
            debug!(message = %message, "Received message");

            match dispatch(&mut self.state, &self.pool, message).await {
                Step::Reply(reply) => self.connection.send(&reply).await?,
                Step::Idle => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.heartbeat_interval) => {}
                    }
                }
                Step::Continue => {}
            }
        }

        info!(tasks_run = self.state.tasks_run, "Shutdown requested, leaving session");
        Ok(())
    }
}

/// Applies one message to `state`, running the pool for tasks.
async fn dispatch(state: &mut SessionState, pool: &BoundedPool, message: Message) -> Step {
    match message {
        Message::Concurrency(concurrency) => {
            let previous = std::mem::replace(&mut state.concurrency, concurrency);
            state.concurrency_updates += 1;
            info!(
                previous = previous,
                concurrency = concurrency,
                "Concurrency assigned"
            );
            Step::Continue
        }
        Message::Task(task) => {
            run_task(state, pool, task).await;
            Step::Reply(Message::TaskCompleted)
        }
        Message::NoTask => {
            state.heartbeats += 1;
            debug!(heartbeats = state.heartbeats, "Heartbeat");
            Step::Idle
        }
        Message::TaskCompleted => {
            state.protocol_errors += 1;
            warn!("Unexpected acknowledgment from master, ignoring");
            Step::Continue
        }
    }
}

async fn run_task(state: &mut SessionState, pool: &BoundedPool, task: Task) {
    state.tasks_run += 1;

    if state.concurrency == 0 {
        warn!(task = %task, "No concurrency assigned, task not executed");
        return;
    }

    let stats = pool.run(vec![task.clone()], state.concurrency).await;
    info!(
        task = %task,
        concurrency = state.concurrency,
        completed = stats.tasks_completed,
        failed = stats.tasks_failed,
        duration_ms = stats.average_task_duration.as_millis() as u64,
        "Task finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::scheduler::FixedWait;
    use crate::task::{TaskExecutor, TaskOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(&self, _task: &Task) -> Result<TaskOutcome, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::new(200, Duration::from_millis(1)))
        }
    }

    fn pool(executor: Arc<CountingExecutor>) -> BoundedPool {
        BoundedPool::new(executor, Arc::new(FixedWait::none()))
    }

    #[tokio::test]
    async fn test_concurrency_update_is_update_only() {
        let executor = Arc::new(CountingExecutor::default());
        let pool = pool(Arc::clone(&executor));
        let mut state = SessionState::default();

        let step = dispatch(&mut state, &pool, Message::Concurrency(4)).await;

        assert_eq!(step, Step::Continue);
        assert_eq!(state.concurrency, 4);
        assert_eq!(state.concurrency_updates, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_task_runs_at_stored_concurrency_and_replies() {
        let executor = Arc::new(CountingExecutor::default());
        let pool = pool(Arc::clone(&executor));
        let mut state = SessionState {
            concurrency: 3,
            ..SessionState::default()
        };

        let step = dispatch(&mut state, &pool, Message::Task(Task::new("GET http://x"))).await;

        assert_eq!(step, Step::Reply(Message::TaskCompleted));
        assert_eq!(state.tasks_run, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_without_concurrency_still_acknowledged() {
        let executor = Arc::new(CountingExecutor::default());
        let pool = pool(Arc::clone(&executor));
        let mut state = SessionState::default();

        let step = dispatch(&mut state, &pool, Message::Task(Task::new("GET http://x"))).await;

        assert_eq!(step, Step::Reply(Message::TaskCompleted));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_has_no_reply() {
        let executor = Arc::new(CountingExecutor::default());
        let pool = pool(Arc::clone(&executor));
        let mut state = SessionState::default();

        let step = dispatch(&mut state, &pool, Message::NoTask).await;

        assert_eq!(step, Step::Idle);
        assert_eq!(state.heartbeats, 1);
    }

    #[tokio::test]
    async fn test_stray_acknowledgment_is_counted() {
        let executor = Arc::new(CountingExecutor::default());
        let pool = pool(executor);
        let mut state = SessionState::default();

        let step = dispatch(&mut state, &pool, Message::TaskCompleted).await;

        assert_eq!(step, Step::Continue);
        assert_eq!(state.protocol_errors, 1);
    }
}
