//! Pacing strategies applied before each task execution.
//!
//! A [`WaitStrategy`] only produces the next delay. Sleeping is done by the
//! caller (see [`pace`]) so no lock is ever held across the wait.

use std::fmt;
use std::time::Duration;

use rand::RngExt;

use crate::config::ConfigError;

/// Produces the delay to apply before the next task execution.
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Returns the duration to wait before the next execution.
    fn next_delay(&self) -> Duration;
}

/// Sleeps for the next delay produced by `strategy`.
pub async fn pace(strategy: &dyn WaitStrategy) {
    let delay = strategy.next_delay();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Constant delay between executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWait {
    delay: Duration,
}

impl FixedWait {
    /// Creates a fixed wait of `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl WaitStrategy for FixedWait {
    fn next_delay(&self) -> Duration {
        self.delay
    }
}

/// Uniformly distributed delay in the half-open interval `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomWait {
    min: Duration,
    max: Duration,
}

impl RandomWait {
    /// Creates a randomized wait.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidWaitBounds` if `max <= min`, since the
    /// interval `[min, max)` would be empty.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if max <= min {
            return Err(ConfigError::InvalidWaitBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// Lower bound (inclusive).
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound (exclusive).
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl WaitStrategy for RandomWait {
    fn next_delay(&self) -> Duration {
        rand::rng().random_range(self.min..self.max)
    }
}
