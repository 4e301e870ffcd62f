//! Concurrency scheduling for the master and the worker.
//!
//! - **Registry**: tracks connected workers and splits the concurrency
//!   budget between them on every join and leave
//! - **BoundedPool**: runs a batch of tasks on a fixed number of lanes
//! - **WaitStrategy**: pacing applied before each execution
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────┐
//!                  │        Master        │
//!                  │  Registry (budget T) │
//!                  └──────────┬───────────┘
//!                             │ concurrency: T/N
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    │  pool   │         │  pool   │         │  pool   │
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use crabload::scheduler::{BoundedPool, RandomWait, Registry};
//! use crabload::task::{HttpExecutor, Task};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let registry = Registry::new();
//! let assignment = registry.add_worker(peer, 12).await;
//!
//! let executor = Arc::new(HttpExecutor::new(Duration::from_secs(30))?);
//! let wait = Arc::new(RandomWait::new(Duration::from_secs(1), Duration::from_secs(3))?);
//! let pool = BoundedPool::new(executor, wait);
//! let stats = pool
//!     .run(vec![Task::new("GET http://localhost:8080/")], assignment.concurrency)
//!     .await;
//! ```

pub mod registry;
pub mod wait;
pub mod worker_pool;

// Re-export main types for convenience
pub use registry::{distribute, Registry, WorkerAssignment, WorkerId, WorkerInfo};
pub use wait::{pace, FixedWait, RandomWait, WaitStrategy};
pub use worker_pool::{BoundedPool, PoolStats};
