//! Task descriptors and their execution.
//!
//! A [`Task`] is the opaque descriptor carried by a `task:` message. The
//! master never looks inside it; the worker's [`TaskExecutor`] decides what
//! it means. The bundled [`HttpExecutor`] reads it as
//! `<METHOD> <url> [body]`.

pub mod executor;
pub mod report;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

pub use executor::{HttpExecutor, TaskExecutor};
pub use report::{ResultRecorder, ResultReport};

/// An opaque task descriptor such as `GET http://example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task(String);

impl Task {
    /// Wraps a descriptor.
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    /// Returns the raw descriptor.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interprets the descriptor as an HTTP request.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::InvalidTask` when the method or url is
    /// missing and `ExecutionError::UnsupportedMethod` for anything other
    /// than GET or POST.
    pub fn parse_request(&self) -> Result<RequestSpec, ExecutionError> {
        let descriptor = self.0.trim();
        let invalid = || ExecutionError::InvalidTask(self.0.clone());

        let (method, rest) = descriptor
            .split_once(char::is_whitespace)
            .ok_or_else(invalid)?;
        let rest = rest.trim_start();

        let (url, body) = match rest.split_once(char::is_whitespace) {
            Some((url, body)) => {
                let body = body.trim();
                (url, (!body.is_empty()).then(|| body.to_string()))
            }
            None => (rest, None),
        };
        if url.is_empty() {
            return Err(invalid());
        }

        let method = match method.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            _ => return Err(ExecutionError::UnsupportedMethod(method.to_string())),
        };

        Ok(RequestSpec {
            method,
            url: url.to_string(),
            body,
        })
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Task {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// HTTP methods understood by [`HttpExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// A task descriptor parsed into an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    /// JSON body, POST only.
    pub body: Option<String>,
}

/// Outcome of a successfully executed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    /// HTTP status code, or whatever status the executor reports.
    pub status: u16,
    /// Wall-clock time spent executing.
    pub elapsed: Duration,
}

impl TaskOutcome {
    pub fn new(status: u16, elapsed: Duration) -> Self {
        Self { status, elapsed }
    }

    /// True for statuses below 400.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Status class label such as `2xx`, used for metrics.
    pub fn status_class(&self) -> &'static str {
        match self.status {
            100..=199 => "1xx",
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_request() {
        let spec = Task::new("GET http://example.com").parse_request().unwrap();
        assert_eq!(spec.method, HttpMethod::Get);
        assert_eq!(spec.url, "http://example.com");
        assert_eq!(spec.body, None);
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        let spec = Task::new("  get   http://example.com/a  ")
            .parse_request()
            .unwrap();
        assert_eq!(spec.method, HttpMethod::Get);
        assert_eq!(spec.url, "http://example.com/a");
        assert_eq!(spec.body, None);
    }

    #[test]
    fn test_parse_post_with_body() {
        let spec = Task::new(r#"POST http://example.com/api {"key": "value"}"#)
            .parse_request()
            .unwrap();
        assert_eq!(spec.method, HttpMethod::Post);
        assert_eq!(spec.url, "http://example.com/api");
        assert_eq!(spec.body.as_deref(), Some(r#"{"key": "value"}"#));
    }

    #[test]
    fn test_parse_rejects_malformed_descriptors() {
        assert!(matches!(
            Task::new("").parse_request(),
            Err(ExecutionError::InvalidTask(_))
        ));
        assert!(matches!(
            Task::new("GET").parse_request(),
            Err(ExecutionError::InvalidTask(_))
        ));
        assert!(matches!(
            Task::new("DELETE http://example.com").parse_request(),
            Err(ExecutionError::UnsupportedMethod(m)) if m == "DELETE"
        ));
    }

    #[test]
    fn test_task_outcome_success() {
        assert!(TaskOutcome::new(200, Duration::ZERO).is_success());
        assert!(TaskOutcome::new(302, Duration::ZERO).is_success());
        assert!(!TaskOutcome::new(404, Duration::ZERO).is_success());
        assert!(!TaskOutcome::new(503, Duration::ZERO).is_success());
    }

    #[test]
    fn test_task_outcome_status_class() {
        assert_eq!(TaskOutcome::new(204, Duration::ZERO).status_class(), "2xx");
        assert_eq!(TaskOutcome::new(429, Duration::ZERO).status_class(), "4xx");
        assert_eq!(TaskOutcome::new(0, Duration::ZERO).status_class(), "other");
    }

    #[test]
    fn test_task_serializes_as_plain_string() {
        let task = Task::new("GET http://x");
        assert_eq!(serde_json::to_string(&task).unwrap(), r#""GET http://x""#);
        assert_eq!(task.to_string(), "GET http://x");
    }
}
