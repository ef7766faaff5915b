//! Errors surfaced to operators.

use thiserror::Error;
use warnet_core::{CoreError, GenerationError};
use warnet_hooks::HookError;
use warnet_orchestrator::{CompileError, OrchestratorError};
use warnet_rpc::RpcError;
use warnet_scenario::ScenarioError;

/// Result type for control plane commands.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Any failure a command can report.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Document, schema or generator failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Deployment compilation failure.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Backend or lifecycle failure.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// RPC failure.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Scenario failure.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    /// Plugin loading failure.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// No deployed network with this name.
    #[error("network {0:?} is not deployed")]
    NetworkNotFound(String),

    /// A network with this name is already deployed.
    #[error("network {0:?} is already deployed")]
    NetworkExists(String),
}

impl From<GenerationError> for ControlError {
    fn from(err: GenerationError) -> Self {
        Self::Core(err.into())
    }
}

impl ControlError {
    /// Returns true if the command named something that does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NetworkNotFound(_) => true,
            Self::Orchestrator(err) => err.is_not_found(),
            Self::Scenario(err) => err.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ControlError::NetworkNotFound("warnet".into()).is_not_found());
        assert!(ControlError::from(ScenarioError::UnknownProgram("x".into())).is_not_found());
        assert!(!ControlError::NetworkExists("warnet".into()).is_not_found());

        let err = ControlError::from(GenerationError::TooFewVertices(0));
        assert!(matches!(err, ControlError::Core(CoreError::Generation(_))));
    }
}
