//! Scenario records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Lifecycle of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Launch requested.
    Pending,
    /// Running.
    Running,
    /// Exited with code 0.
    Succeeded,
    /// Exited non-zero or could not keep running.
    Failed,
    /// Stopped on request.
    Stopped,
}

impl ScenarioStatus {
    /// Returns true if the scenario will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Public record of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioHandle {
    /// Run identity.
    pub id: Uuid,
    /// Program reference as launched.
    pub program: String,
    /// Full command line.
    pub cmd: Vec<String>,
    /// Target network.
    pub network: String,
    /// OS process id, for process scenarios.
    pub pid: Option<u32>,
    /// Launch time.
    pub started_at: DateTime<Utc>,
    /// Current status.
    pub status: ScenarioStatus,
    /// Exit code once exited.
    pub return_code: Option<i32>,
}

/// How a scenario unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioExit {
    /// Exited with a code.
    Code(i32),
    /// Terminated by a signal or without a code.
    Killed,
    /// Stopped on request.
    Stopped,
}

impl ScenarioExit {
    /// Status this exit maps to.
    pub fn status(&self) -> ScenarioStatus {
        match self {
            Self::Code(0) => ScenarioStatus::Succeeded,
            Self::Code(_) | Self::Killed => ScenarioStatus::Failed,
            Self::Stopped => ScenarioStatus::Stopped,
        }
    }

    /// Exit code, if there is one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(*code),
            _ => None,
        }
    }
}

const DEFAULT_LOG_LINES: usize = 10_000;

/// Bounded, shareable buffer of captured output lines.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_LINES)
    }
}

impl LogBuffer {
    /// Creates a buffer keeping the last `capacity` lines.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Appends a line, dropping the oldest when full.
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Everything captured so far, newline separated.
    pub fn contents(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// Number of buffered lines.
    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(ScenarioExit::Code(0).status(), ScenarioStatus::Succeeded);
        assert_eq!(ScenarioExit::Code(3).status(), ScenarioStatus::Failed);
        assert_eq!(ScenarioExit::Killed.status(), ScenarioStatus::Failed);
        assert_eq!(ScenarioExit::Stopped.status(), ScenarioStatus::Stopped);
        assert!(ScenarioStatus::Stopped.is_terminal());
        assert!(!ScenarioStatus::Running.is_terminal());
    }

    #[test]
    fn test_log_buffer_is_bounded() {
        let buffer = LogBuffer::with_capacity(2);
        buffer.push("one");
        buffer.push("two");
        buffer.push("three");
        assert_eq!(buffer.contents(), "two\nthree");
        assert_eq!(buffer.len(), 2);
    }
}
