//! Protocol messages and their line encoding.

use std::fmt;

use crate::error::ProtocolError;
use crate::task::Task;

const CONCURRENCY_PREFIX: &str = "concurrency:";
const TASK_PREFIX: &str = "task:";
const NO_TASK: &str = "NO_TASK";
const TASK_COMPLETED: &str = "Task completed";

/// One line of the master/worker protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// master→worker: the worker's share of the concurrency budget.
    Concurrency(usize),
    /// master→worker: one task to execute.
    Task(Task),
    /// master→worker: heartbeat, no task pending.
    NoTask,
    /// worker→master: acknowledgment of a finished task.
    TaskCompleted,
}

impl Message {
    /// Parses one protocol line, ignoring surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidConcurrency` for a `concurrency:` line
    /// that does not carry a non-negative integer and
    /// `ProtocolError::UnknownMessage` for anything unrecognized.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();

        if line == NO_TASK {
            return Ok(Message::NoTask);
        }
        if line == TASK_COMPLETED {
            return Ok(Message::TaskCompleted);
        }
        if let Some(descriptor) = line.strip_prefix(TASK_PREFIX) {
            return Ok(Message::Task(Task::new(descriptor.trim())));
        }
        if let Some(value) = line.strip_prefix(CONCURRENCY_PREFIX) {
            let value = value.trim();
            return value
                .parse::<usize>()
                .map(Message::Concurrency)
                .map_err(|e| ProtocolError::InvalidConcurrency {
                    value: value.to_string(),
                    reason: e.to_string(),
                });
        }

        Err(ProtocolError::UnknownMessage(line.to_string()))
    }

    /// Encodes the message as a newline-terminated line.
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Concurrency(_) => "concurrency",
            Message::Task(_) => "task",
            Message::NoTask => "heartbeat",
            Message::TaskCompleted => "ack",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Concurrency(n) => write!(f, "{} {}", CONCURRENCY_PREFIX, n),
            Message::Task(task) => write!(f, "{}{}", TASK_PREFIX, task),
            Message::NoTask => f.write_str(NO_TASK),
            Message::TaskCompleted => f.write_str(TASK_COMPLETED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_canonical_lines() {
        assert_eq!(Message::Concurrency(3).encode(), "concurrency: 3\n");
        assert_eq!(
            Message::Task(Task::new("GET http://x")).encode(),
            "task:GET http://x\n"
        );
        assert_eq!(Message::NoTask.encode(), "NO_TASK\n");
        assert_eq!(Message::TaskCompleted.encode(), "Task completed\n");
    }

    #[test]
    fn test_parse_concurrency_with_and_without_space() {
        assert_eq!(
            Message::parse("concurrency: 12\n"),
            Ok(Message::Concurrency(12))
        );
        assert_eq!(Message::parse("concurrency:0"), Ok(Message::Concurrency(0)));
    }

    #[test]
    fn test_parse_task_strips_legacy_trailing_space() {
        assert_eq!(
            Message::parse("task:GET http://www.example.com \n"),
            Ok(Message::Task(Task::new("GET http://www.example.com")))
        );
    }

    #[test]
    fn test_parse_heartbeat_and_ack() {
        assert_eq!(Message::parse("NO_TASK\r\n"), Ok(Message::NoTask));
        assert_eq!(Message::parse("Task completed"), Ok(Message::TaskCompleted));
    }

    #[test]
    fn test_parse_rejects_bad_concurrency() {
        assert!(matches!(
            Message::parse("concurrency: many"),
            Err(ProtocolError::InvalidConcurrency { value, .. }) if value == "many"
        ));
        assert!(matches!(
            Message::parse("concurrency: -2"),
            Err(ProtocolError::InvalidConcurrency { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_lines() {
        assert_eq!(
            Message::parse("HELLO"),
            Err(ProtocolError::UnknownMessage("HELLO".to_string()))
        );
        // Prefixes are case-sensitive.
        assert!(Message::parse("TASK:GET http://x").is_err());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Message::Concurrency(1).kind(), "concurrency");
        assert_eq!(Message::NoTask.kind(), "heartbeat");
    }
}
