//! crabload: distributed HTTP load generation.
//!
//! A master process splits a total concurrency budget across every
//! connected worker and serves each worker the task plan over a
//! newline-delimited TCP protocol. Workers run each task through a bounded
//! pool at their assigned concurrency and acknowledge it.

pub mod cli;
pub mod config;
pub mod error;
pub mod master;
pub mod metrics;
pub mod protocol;
pub mod scheduler;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use config::{ConfigError, MasterConfig, WaitConfig, WorkerConfig};
pub use error::{ExecutionError, MasterError, ProtocolError, TransportError, WorkerError};
pub use master::Master;
pub use protocol::{LineConnection, Message};
pub use scheduler::{distribute, BoundedPool, FixedWait, RandomWait, Registry, WaitStrategy};
pub use task::{HttpExecutor, ResultReport, Task, TaskExecutor, TaskOutcome};
pub use worker::{Worker, WorkerSummary};
