//! Error types for scenarios.

use thiserror::Error;
use uuid::Uuid;

/// Result type for scenario operations.
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Errors raised by the scenario runner.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The program could not be started.
    #[error("failed to launch scenario {program}: {reason}")]
    Launch {
        /// Program reference as given.
        program: String,
        /// The reason for the failure.
        reason: String,
    },

    /// No program with this name exists.
    #[error("unknown scenario program {0:?}")]
    UnknownProgram(String),

    /// No scenario with this id.
    #[error("scenario not found: {0}")]
    NotFound(Uuid),

    /// The target network cannot be reached.
    #[error("network {0} is not available")]
    NetworkUnavailable(String),

    /// Bad workload arguments.
    #[error("invalid argument {arg:?}: {reason}")]
    InvalidArgument {
        /// The argument.
        arg: String,
        /// What is wrong with it.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScenarioError {
    /// Creates a launch error.
    pub fn launch(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Launch {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(arg: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg: arg.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::UnknownProgram(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScenarioError::launch("tx_flood.py", "permission denied");
        assert_eq!(
            err.to_string(),
            "failed to launch scenario tx_flood.py: permission denied"
        );
        assert!(ScenarioError::UnknownProgram("nope".into()).is_not_found());
        assert!(!err.is_not_found());
    }
}
