//! Error types for crabload operations.
//!
//! Defines the error taxonomy shared by the master and the worker:
//! - Transport failures on a worker connection (fatal to that session)
//! - Protocol violations (logged, the offending message is dropped)
//! - Task execution failures (logged per task, never abort a batch)
//! - Master and worker lifecycle failures
//!
//! Configuration errors live next to the configuration types in
//! [`crate::config`].

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors on the byte stream between master and worker.
///
/// Any of these ends the session that observed it. They are never retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind listener on '{addr}': {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to master at '{addr}': {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Connection operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Peer sent a line longer than {limit} bytes")]
    LineTooLong { limit: usize },
}

impl TransportError {
    /// Returns true if the peer closed the connection cleanly.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Errors in the content of a protocol line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unrecognized message: '{0}'")]
    UnknownMessage(String),

    #[error("Invalid concurrency value '{value}': {reason}")]
    InvalidConcurrency { value: String, reason: String },
}

/// Errors while executing a single task.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid task descriptor '{0}': expected '<METHOD> <url> [body]'")]
    InvalidTask(String),

    #[error("Unsupported method '{0}': only GET and POST are supported")]
    UnsupportedMethod(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Errors surfaced by the master process.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Shutdown timed out after {timeout:?} with {remaining} session(s) still running")]
    ShutdownTimeout { timeout: Duration, remaining: usize },
}

/// Errors surfaced by the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
