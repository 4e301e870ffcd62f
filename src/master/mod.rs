//! Master process: accepts workers, assigns concurrency, serves the plan.
//!
//! Each accepted connection is registered, told its share of the budget
//! with `concurrency: N`, and then handed to its own [`MasterSession`].

pub mod session;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::MasterConfig;
use crate::error::{MasterError, TransportError};
use crate::metrics::export_metrics;
use crate::protocol::{LineConnection, Message};
use crate::scheduler::Registry;
use crate::task::Task;

pub use session::{MasterSession, SessionSummary};

type SessionResult = Result<SessionSummary, TransportError>;

/// A bound master, ready to accept workers.
pub struct Master {
    config: MasterConfig,
    listener: TcpListener,
    registry: Arc<Registry>,
    plan: Arc<[Task]>,
}

impl Master {
    /// Validates `config` and binds the listener.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Config` for an invalid configuration and
    /// `MasterError::Transport` if the address cannot be bound.
    pub async fn bind(config: MasterConfig) -> Result<Self, MasterError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let plan: Arc<[Task]> = config.tasks.clone().into();

        Ok(Self {
            config,
            listener,
            registry: Arc::new(Registry::new()),
            plan,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared handle to the worker registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts workers until `shutdown` resolves, then drains sessions.
    ///
    /// After the signal the listener is closed and every session exits at
    /// its next iteration boundary. By default the master waits for all of
    /// them. If `shutdown_timeout` is set, sessions still running once it
    /// elapses are aborted.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::ShutdownTimeout` if sessions did not finish in
    /// time.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), MasterError> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut sessions: JoinSet<SessionResult> = JoinSet::new();
        tokio::pin!(shutdown);

        let addr = self
            .local_addr()
            .map_or_else(|_| self.config.listen_addr.clone(), |a| a.to_string());
        info!(
            addr = %addr,
            total_concurrency = self.config.total_concurrency,
            planned_tasks = self.plan.len(),
            "Master listening"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer accepting workers");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.admit(stream, peer, &shutdown_tx, &mut sessions).await;
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_end(joined);
                }
            }
        }

        let Master {
            config, listener, ..
        } = self;
        drop(listener);
        // No receivers means no live sessions.
        let _ = shutdown_tx.send(());

        let drain = async {
            while let Some(joined) = sessions.join_next().await {
                log_session_end(joined);
            }
        };
        let timed_out = match config.shutdown_timeout {
            Some(limit) => tokio::time::timeout(limit, drain).await.err().map(|_| limit),
            None => {
                drain.await;
                None
            }
        };

        debug!(metrics = %export_metrics(), "Final metrics");

        if let Some(limit) = timed_out {
            let remaining = sessions.len();
            error!(
                remaining = remaining,
                timeout_secs = limit.as_secs(),
                "Sessions did not stop in time, aborting"
            );
            sessions.abort_all();
            return Err(MasterError::ShutdownTimeout {
                timeout: limit,
                remaining,
            });
        }

        info!("Master stopped");
        Ok(())
    }

    /// Registers a new connection, sends its assignment, spawns its session.
    async fn admit(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown_tx: &broadcast::Sender<()>,
        sessions: &mut JoinSet<SessionResult>,
    ) {
        let mut connection = match LineConnection::new(stream) {
            Ok(connection) => connection
                .with_read_timeout(self.config.io_timeout)
                .with_write_timeout(self.config.io_timeout),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Dropping connection");
                return;
            }
        };

        let total = self.config.total_concurrency;
        let assignment = self.registry.add_worker(peer, total).await;

        if let Err(e) = connection
            .send(&Message::Concurrency(assignment.concurrency))
            .await
        {
            error!(
                worker_id = %assignment.id,
                peer = %peer,
                error = %e,
                "Failed to send concurrency assignment"
            );
            self.registry.remove_worker(assignment.id, total).await;
            return;
        }

        let session = MasterSession::new(
            assignment.id,
            connection,
            Arc::clone(&self.registry),
            Arc::clone(&self.plan),
            total,
            self.config.heartbeat_interval,
            shutdown_tx.subscribe(),
        );
        sessions.spawn(session.run());
    }
}

fn log_session_end(joined: Result<SessionResult, JoinError>) {
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(e)) if e.is_closed() => info!("Worker disconnected"),
        Ok(Err(e)) => error!(error = %e, "Session failed"),
        Err(e) => error!(error = %e, "Session task panicked"),
    }
}
