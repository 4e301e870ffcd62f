//! Configuration for the master and worker processes.
//!
//! Both configurations start from defaults, can be overridden from
//! `CRABLOAD_*` environment variables, and are then refined by CLI flags.
//! Call `validate()` before starting anything.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::scheduler::wait::{FixedWait, RandomWait, WaitStrategy};
use crate::task::Task;

/// Default interval between heartbeats, in both directions.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default master listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";

/// Default master address for workers.
pub const DEFAULT_MASTER_ADDR: &str = "127.0.0.1:9000";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Randomized wait bounds describe an empty interval.
    #[error("Invalid wait bounds: max ({max:?}) must be greater than min ({min:?})")]
    InvalidWaitBounds { min: Duration, max: Duration },

    /// An environment variable or flag has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The task plan file could not be parsed.
    #[error("Failed to parse task plan '{path}': {message}")]
    PlanFile { path: String, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pacing applied by a worker before each task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitConfig {
    /// Uniform delay in `[min, max)`.
    Random { min: Duration, max: Duration },
    /// Constant delay.
    Fixed(Duration),
}

impl Default for WaitConfig {
    fn default() -> Self {
        WaitConfig::Random {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        }
    }
}

impl WaitConfig {
    /// Builds the strategy described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidWaitBounds` for an empty random interval.
    pub fn build(&self) -> Result<Arc<dyn WaitStrategy>, ConfigError> {
        match *self {
            WaitConfig::Random { min, max } => Ok(Arc::new(RandomWait::new(min, max)?)),
            WaitConfig::Fixed(delay) => Ok(Arc::new(FixedWait::new(delay))),
        }
    }
}

/// Configuration for the master process.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Address the listener binds to.
    pub listen_addr: String,
    /// Concurrency budget distributed across all connected workers.
    pub total_concurrency: usize,
    /// Task plan sent to every connected worker, in order.
    pub tasks: Vec<Task>,
    /// Interval between `NO_TASK` heartbeats once the plan is exhausted.
    pub heartbeat_interval: Duration,
    /// Deadline for each write and for each result read. `None` disables it.
    pub io_timeout: Option<Duration>,
    /// How long to wait for live sessions after a shutdown signal before
    /// aborting them. `None` waits for every session to finish.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            total_concurrency: 12,
            tasks: Vec::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            io_timeout: Some(Duration::from_secs(120)),
            shutdown_timeout: None,
        }
    }
}

impl MasterConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CRABLOAD_LISTEN`: Listen address (default: 0.0.0.0:9000)
    /// - `CRABLOAD_TOTAL_CONCURRENCY`: Concurrency budget (default: 12)
    /// - `CRABLOAD_TASKS`: `;`-separated task descriptors
    /// - `CRABLOAD_HEARTBEAT_SECS`: Heartbeat interval (default: 5)
    /// - `CRABLOAD_IO_TIMEOUT_SECS`: I/O deadline, 0 disables (default: 120)
    /// - `CRABLOAD_SHUTDOWN_TIMEOUT_SECS`: Grace period before sessions are
    ///   aborted, 0 disables (default: 0)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CRABLOAD_LISTEN") {
            config.listen_addr = val;
        }

        if let Ok(val) = std::env::var("CRABLOAD_TOTAL_CONCURRENCY") {
            config.total_concurrency = parse_env_value(&val, "CRABLOAD_TOTAL_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("CRABLOAD_TASKS") {
            config.tasks = val
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Task::new)
                .collect();
        }

        if let Ok(val) = std::env::var("CRABLOAD_HEARTBEAT_SECS") {
            let secs: u64 = parse_env_value(&val, "CRABLOAD_HEARTBEAT_SECS")?;
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CRABLOAD_IO_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CRABLOAD_IO_TIMEOUT_SECS")?;
            config.io_timeout = optional_secs(secs);
        }

        if let Ok(val) = std::env::var("CRABLOAD_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CRABLOAD_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = optional_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "listen_addr cannot be empty".to_string(),
            ));
        }

        if self.total_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "total_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }

        if let Some(index) = self.tasks.iter().position(|t| t.as_str().trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "task #{} in the plan is empty",
                index + 1
            )));
        }

        if self.tasks.iter().any(|t| t.as_str().contains('\n')) {
            return Err(ConfigError::ValidationFailed(
                "task descriptors cannot contain newlines".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Builder method to set the concurrency budget.
    pub fn with_total_concurrency(mut self, total: usize) -> Self {
        self.total_concurrency = total;
        self
    }

    /// Builder method to set the task plan.
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Builder method to set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Builder method to set the I/O deadline.
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Builder method to set the shutdown grace period.
    pub fn with_shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Master address to dial.
    pub master_addr: String,
    /// Pacing applied before each execution.
    pub wait: WaitConfig,
    /// How long to pause after a `NO_TASK` heartbeat.
    pub heartbeat_interval: Duration,
    /// Deadline for reading the next message. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Deadline for writing a reply. `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_addr: DEFAULT_MASTER_ADDR.to_string(),
            wait: WaitConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            read_timeout: None,
            write_timeout: Some(Duration::from_secs(10)),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CRABLOAD_MASTER`: Master address (default: 127.0.0.1:9000)
    /// - `CRABLOAD_WAIT_MIN_MS` / `CRABLOAD_WAIT_MAX_MS`: Random pacing bounds
    ///   (default: 1000 / 3000)
    /// - `CRABLOAD_HEARTBEAT_SECS`: Pause after a heartbeat (default: 5)
    /// - `CRABLOAD_READ_TIMEOUT_SECS`: Read deadline, 0 disables (default: 0)
    /// - `CRABLOAD_WRITE_TIMEOUT_SECS`: Write deadline, 0 disables (default: 10)
    /// - `CRABLOAD_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CRABLOAD_MASTER") {
            config.master_addr = val;
        }

        let min_ms = std::env::var("CRABLOAD_WAIT_MIN_MS")
            .ok()
            .map(|v| parse_env_value::<u64>(&v, "CRABLOAD_WAIT_MIN_MS"))
            .transpose()?;
        let max_ms = std::env::var("CRABLOAD_WAIT_MAX_MS")
            .ok()
            .map(|v| parse_env_value::<u64>(&v, "CRABLOAD_WAIT_MAX_MS"))
            .transpose()?;
        if min_ms.is_some() || max_ms.is_some() {
            config.wait = WaitConfig::Random {
                min: Duration::from_millis(min_ms.unwrap_or(1000)),
                max: Duration::from_millis(max_ms.unwrap_or(3000)),
            };
        }

        if let Ok(val) = std::env::var("CRABLOAD_HEARTBEAT_SECS") {
            let secs: u64 = parse_env_value(&val, "CRABLOAD_HEARTBEAT_SECS")?;
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CRABLOAD_READ_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CRABLOAD_READ_TIMEOUT_SECS")?;
            config.read_timeout = optional_secs(secs);
        }

        if let Ok(val) = std::env::var("CRABLOAD_WRITE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CRABLOAD_WRITE_TIMEOUT_SECS")?;
            config.write_timeout = optional_secs(secs);
        }

        if let Ok(val) = std::env::var("CRABLOAD_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CRABLOAD_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_addr.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "master_addr cannot be empty".to_string(),
            ));
        }

        if let WaitConfig::Random { min, max } = self.wait {
            if max <= min {
                return Err(ConfigError::InvalidWaitBounds { min, max });
            }
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }

        // The master only writes once per heartbeat interval when idle.
        if let Some(read_timeout) = self.read_timeout {
            if read_timeout <= self.heartbeat_interval {
                return Err(ConfigError::ValidationFailed(format!(
                    "read_timeout ({:?}) must be greater than heartbeat_interval ({:?})",
                    read_timeout, self.heartbeat_interval
                )));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the master address.
    pub fn with_master_addr(mut self, addr: impl Into<String>) -> Self {
        self.master_addr = addr.into();
        self
    }

    /// Builder method to set the pacing.
    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Builder method to set the heartbeat pause.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Builder method to set the read deadline.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Builder method to set the write deadline.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Builder method to set the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// On-disk task plan.
#[derive(Debug, Deserialize)]
struct TaskPlanFile {
    tasks: Vec<String>,
}

/// Loads a YAML task plan of the form `tasks: ["GET http://...", ...]`.
///
/// # Errors
///
/// Returns `ConfigError::Io` if the file cannot be read and
/// `ConfigError::PlanFile` if it is not a valid plan.
pub fn load_task_plan(path: &Path) -> Result<Vec<Task>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let plan: TaskPlanFile =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::PlanFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(plan.tasks.into_iter().map(Task::new).collect())
}

/// Maps a seconds value to an optional deadline, where 0 disables it.
pub fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
