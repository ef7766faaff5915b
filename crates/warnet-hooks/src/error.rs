//! Hook errors. These are logged by the dispatcher and never reach the
//! command that triggered the hook.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::registry::HookPhase;

/// Result type for hook operations.
pub type Result<T> = std::result::Result<T, HookError>;

/// Errors raised by hooks and plugin discovery.
#[derive(Debug, Error)]
pub enum HookError {
    /// An in-process handler reported failure.
    #[error("{phase} hook for {command} failed: {reason}")]
    Handler {
        /// Command the hook is attached to.
        command: String,
        /// Phase it ran in.
        phase: HookPhase,
        /// What went wrong.
        reason: String,
    },

    /// A shell hook exited unsuccessfully.
    #[error("hook command {run:?} exited with {status:?}: {stderr}")]
    Shell {
        /// The shell command.
        run: String,
        /// Exit code, if any.
        status: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// A shell hook ran too long.
    #[error("hook command {run:?} timed out after {after:?}")]
    Timeout {
        /// The shell command.
        run: String,
        /// The limit.
        after: Duration,
    },

    /// A plugin manifest could not be read.
    #[error("invalid plugin manifest {path}: {reason}")]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HookError {
    /// Creates a handler error.
    pub fn handler(command: impl Into<String>, phase: HookPhase, reason: impl Into<String>) -> Self {
        Self::Handler {
            command: command.into(),
            phase,
            reason: reason.into(),
        }
    }

    /// Creates a manifest error.
    pub fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
