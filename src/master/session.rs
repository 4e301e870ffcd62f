//! Master side of one worker connection.
//!
//! The session walks the task plan with its own cursor. Each task is a
//! strict request/response exchange: send `task:<desc>`, then read exactly
//! one result line. Once the plan is exhausted the session sends `NO_TASK`
//! every heartbeat interval and never waits for a reply to it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::protocol::{LineConnection, Message};
use crate::scheduler::{Registry, WorkerId};
use crate::task::Task;

/// Counters for one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// `task:` messages written.
    pub tasks_sent: u64,
    /// `Task completed` lines received.
    pub tasks_acknowledged: u64,
    /// `NO_TASK` heartbeats written.
    pub heartbeats: u64,
    /// Lines that were not the expected acknowledgment.
    pub unexpected_lines: u64,
}

/// One worker connection, owned exclusively by its session task.
pub struct MasterSession {
    worker_id: WorkerId,
    connection: LineConnection,
    registry: Arc<Registry>,
    plan: Arc<[Task]>,
    cursor: usize,
    total_concurrency: usize,
    heartbeat_interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
    stopping: bool,
    summary: SessionSummary,
}

impl MasterSession {
    /// Creates a session for a worker that is already registered and has
    /// been sent its concurrency.
    pub fn new(
        worker_id: WorkerId,
        connection: LineConnection,
        registry: Arc<Registry>,
        plan: Arc<[Task]>,
        total_concurrency: usize,
        heartbeat_interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            worker_id,
            connection,
            registry,
            plan,
            cursor: 0,
            total_concurrency,
            heartbeat_interval,
            shutdown_rx,
            stopping: false,
            summary: SessionSummary::default(),
        }
    }

    /// Drives the session until shutdown or a transport failure.
    ///
    /// The worker is removed from the registry however the session ends.
    pub async fn run(mut self) -> Result<SessionSummary, TransportError> {
        info!(
            worker_id = %self.worker_id,
            peer = %self.connection.peer(),
            planned_tasks = self.plan.len(),
            "Session started"
        );

        let result = self.drive().await;
        self.registry
            .remove_worker(self.worker_id, self.total_concurrency)
            .await;

        match &result {
            Ok(summary) => info!(
                worker_id = %self.worker_id,
                tasks_sent = summary.tasks_sent,
                heartbeats = summary.heartbeats,
                "Session stopped"
            ),
            Err(e) => debug!(
                worker_id = %self.worker_id,
                error = %e,
                tasks_sent = self.summary.tasks_sent,
                "Session ended"
            ),
        }

        result
    }

    async fn drive(&mut self) -> Result<SessionSummary, TransportError> {
        while !self.shutdown_requested() {
            match self.plan.get(self.cursor).cloned() {
                Some(task) => {
                    self.cursor += 1;
                    self.dispatch(task).await?;
                }
                None => {
                    self.connection.send(&Message::NoTask).await?;
                    self.summary.heartbeats += 1;
                    self.idle().await?;
                }
            }
        }

        Ok(self.summary)
    }

    /// Sends one task and reads its result line.
    async fn dispatch(&mut self, task: Task) -> Result<(), TransportError> {
        debug!(worker_id = %self.worker_id, task = %task, "Sending task");
        self.connection.send(&Message::Task(task.clone())).await?;
        self.summary.tasks_sent += 1;

        let line = self.connection.receive().await?;
        match Message::parse(&line) {
            Ok(Message::TaskCompleted) => {
                self.summary.tasks_acknowledged += 1;
                debug!(worker_id = %self.worker_id, task = %task, "Task acknowledged");
            }
            Ok(other) => {
                self.summary.unexpected_lines += 1;
                warn!(
                    worker_id = %self.worker_id,
                    message = %other,
                    "Expected task acknowledgment"
                );
            }
            Err(e) => {
                self.summary.unexpected_lines += 1;
                warn!(worker_id = %self.worker_id, error = %e, "Invalid result line");
            }
        }

        Ok(())
    }

    /// Waits out one heartbeat interval while watching the connection.
    async fn idle(&mut self) -> Result<(), TransportError> {
        let pause = tokio::time::sleep(self.heartbeat_interval);
        tokio::pin!(pause);

        loop {
            tokio::select! {
                _ = &mut pause => return Ok(()),
                _ = self.shutdown_rx.recv() => {
                    self.stopping = true;
                    return Ok(());
                }
                line = self.connection.next_line() => {
                    let line = line?;
                    self.summary.unexpected_lines += 1;
                    warn!(
                        worker_id = %self.worker_id,
                        line = %line.trim(),
                        "Unexpected line while idle"
                    );
                }
            }
        }
    }

    fn shutdown_requested(&mut self) -> bool {
        if !self.stopping {
            match self.shutdown_rx.try_recv() {
                Ok(())
                | Err(broadcast::error::TryRecvError::Closed)
                | Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    debug!(worker_id = %self.worker_id, "Session received shutdown signal");
                    self.stopping = true;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }
        }
        self.stopping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct Harness {
        registry: Arc<Registry>,
        worker_id: WorkerId,
        peer: LineConnection,
        session: MasterSession,
        shutdown_tx: broadcast::Sender<()>,
    }

    async fn harness(plan: Vec<Task>, heartbeat: Duration, read_timeout: Duration) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (peer, accepted) = tokio::join!(LineConnection::connect(&addr), listener.accept());
        let (stream, peer_addr) = accepted.unwrap();

        let registry = Arc::new(Registry::new());
        let assignment = registry.add_worker(peer_addr, 4).await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let connection = LineConnection::new(stream)
            .unwrap()
            .with_read_timeout(Some(read_timeout));
        let session = MasterSession::new(
            assignment.id,
            connection,
            Arc::clone(&registry),
            plan.into(),
            4,
            heartbeat,
            shutdown_rx,
        );

        Harness {
            registry,
            worker_id: assignment.id,
            peer: peer.unwrap(),
            session,
            shutdown_tx,
        }
    }

    #[tokio::test]
    async fn test_tasks_then_heartbeats() {
        let h = harness(
            vec![Task::new("GET http://a"), Task::new("GET http://b")],
            Duration::from_millis(30),
            Duration::from_secs(5),
        )
        .await;
        let mut peer = h.peer;
        let handle = tokio::spawn(h.session.run());

        assert_eq!(peer.receive().await.unwrap(), "task:GET http://a");
        peer.send(&Message::TaskCompleted).await.unwrap();
        assert_eq!(peer.receive().await.unwrap(), "task:GET http://b");
        peer.send(&Message::TaskCompleted).await.unwrap();
        assert_eq!(peer.receive().await.unwrap(), "NO_TASK");
        assert_eq!(peer.receive().await.unwrap(), "NO_TASK");

        h.shutdown_tx.send(()).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.tasks_sent, 2);
        assert_eq!(summary.tasks_acknowledged, 2);
        assert!(summary.heartbeats >= 2);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_bad_result_line_keeps_session_alive() {
        let h = harness(
            vec![Task::new("GET http://a")],
            Duration::from_millis(30),
            Duration::from_secs(5),
        )
        .await;
        let mut peer = h.peer;
        let handle = tokio::spawn(h.session.run());

        assert_eq!(peer.receive().await.unwrap(), "task:GET http://a");
        peer.send(&Message::NoTask).await.unwrap();
        assert_eq!(peer.receive().await.unwrap(), "NO_TASK");

        h.shutdown_tx.send(()).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.tasks_acknowledged, 0);
        assert_eq!(summary.unexpected_lines, 1);
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_deregisters_worker() {
        let h = harness(Vec::new(), Duration::from_secs(30), Duration::from_secs(5)).await;
        let mut peer = h.peer;
        let registry = Arc::clone(&h.registry);
        let worker_id = h.worker_id;
        let handle = tokio::spawn(h.session.run());

        assert_eq!(peer.receive().await.unwrap(), "NO_TASK");
        peer.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(!registry.inspect().await.iter().any(|w| w.id == worker_id));
    }

    #[tokio::test]
    async fn test_oversized_line_while_idle_ends_session() {
        let h = harness(Vec::new(), Duration::from_secs(30), Duration::from_secs(5)).await;
        let mut peer = h.peer;
        let registry = Arc::clone(&h.registry);
        let handle = tokio::spawn(h.session.run());

        assert_eq!(peer.receive().await.unwrap(), "NO_TASK");
        let oversized = "a".repeat(crate::protocol::MAX_LINE_BYTES);
        let sender = tokio::spawn(async move {
            // The session may hang up before the whole line is written.
            let _ = peer.send(&Message::Task(Task::new(oversized))).await;
            peer
        });

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::LineTooLong { .. })));
        assert!(registry.is_empty().await);
        drop(sender.await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_result_times_out() {
        let h = harness(
            vec![Task::new("GET http://a")],
            Duration::from_secs(30),
            Duration::from_millis(50),
        )
        .await;
        let mut peer = h.peer;
        let handle = tokio::spawn(h.session.run());

        assert_eq!(peer.receive().await.unwrap(), "task:GET http://a");
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        assert!(h.registry.is_empty().await);
    }
}
