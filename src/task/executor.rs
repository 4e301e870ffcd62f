//! Task execution.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use super::{HttpMethod, Task, TaskOutcome};
use crate::error::ExecutionError;

/// Executes one task descriptor.
///
/// Implementations must be shareable across pool lanes.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs `task` and reports its outcome.
    ///
    /// # Errors
    ///
    /// Returns an `ExecutionError` when the task could not be carried out.
    async fn execute(&self, task: &Task) -> Result<TaskOutcome, ExecutionError>;
}

/// Executes `GET`/`POST` descriptors as HTTP requests.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    /// Creates an executor whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Request` if the HTTP client cannot be built.
    pub fn new(request_timeout: Duration) -> Result<Self, ExecutionError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn execute(&self, task: &Task) -> Result<TaskOutcome, ExecutionError> {
        let request = task.parse_request()?;
        let start = Instant::now();

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self
                .client
                .post(&request.url)
                .header(CONTENT_TYPE, "application/json")
                .body(request.body.clone().unwrap_or_default()),
        };

        // A failed send has no response to inspect.
        let response = builder.send().await?;
        let status = response.status().as_u16();

        response.bytes().await.map_err(|e| ExecutionError::Body {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;

        let elapsed = start.elapsed();
        debug!(
            method = %request.method,
            url = %request.url,
            status = status,
            duration_ms = elapsed.as_millis() as u64,
            "Request finished"
        );

        Ok(TaskOutcome::new(status, elapsed))
    }
}
