//! Worker process: connects to a master and executes the tasks it sends.

pub mod session;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::WorkerConfig;
use crate::error::{TransportError, WorkerError};
use crate::protocol::LineConnection;
use crate::scheduler::{BoundedPool, WaitStrategy};
use crate::task::{ResultRecorder, ResultReport, TaskExecutor};

pub use session::{SessionState, WorkerSession};

/// Final account of a worker run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSummary {
    pub master: String,
    pub session: SessionState,
    pub results: ResultReport,
}

/// A worker connected to its master.
pub struct Worker {
    master_addr: String,
    session: WorkerSession,
    recorder: Arc<ResultRecorder>,
}

impl Worker {
    /// Validates `config` and dials the master.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Config` for an invalid configuration and
    /// `WorkerError::Transport` if the master cannot be reached.
    pub async fn connect(
        config: WorkerConfig,
        executor: Arc<dyn TaskExecutor>,
        wait: Arc<dyn WaitStrategy>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;

        let connection = LineConnection::connect(&config.master_addr)
            .await?
            .with_read_timeout(config.read_timeout)
            .with_write_timeout(config.write_timeout);
        info!(master = %connection.peer(), "Connected to master");

        let recorder = Arc::new(ResultRecorder::new());
        let pool = BoundedPool::new(executor, wait).with_recorder(Arc::clone(&recorder));

        Ok(Self {
            master_addr: config.master_addr,
            session: WorkerSession::new(connection, pool, config.heartbeat_interval),
            recorder,
        })
    }

    /// Serves the master until `shutdown` resolves or the connection ends.
    ///
    /// # Errors
    ///
    /// Returns the `TransportError` that ended the session. There is no
    /// reconnect.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<(), TransportError> {
        self.session.run(shutdown).await
    }

    /// Session counters plus the aggregated task results so far.
    pub async fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            master: self.master_addr.clone(),
            session: self.session.state(),
            results: self.recorder.report().await,
        }
    }
}
