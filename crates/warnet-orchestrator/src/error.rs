//! Error types for the orchestrator crate.

use std::time::Duration;
use thiserror::Error;
use warnet_core::TankId;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// A topology could not be turned into a deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A vertex names a resource profile that does not exist.
    #[error("{tank} uses unknown resource profile {profile:?}")]
    UnknownResourceProfile {
        /// Offending tank.
        tank: TankId,
        /// Name as written.
        profile: String,
    },

    /// An edge references a vertex that is not in the topology.
    #[error("connection {source_id} -> {target} references a missing vertex")]
    UnresolvableReference {
        /// Edge source.
        source_id: TankId,
        /// Edge target.
        target: TankId,
    },

    /// No address could be assigned.
    #[error("address assignment failed for {tank}: {reason}")]
    AddressAssignment {
        /// Offending tank.
        tank: TankId,
        /// Why it failed.
        reason: String,
    },
}

/// Errors that can occur during orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Plan compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Unit not found.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// Tank not part of this network.
    #[error("{0} is not part of this network")]
    TankNotFound(TankId),

    /// Unit creation failed.
    #[error("failed to create unit {name}: {reason}")]
    UnitCreationFailed {
        /// The unit name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Unit destruction failed.
    #[error("failed to destroy unit {unit}: {reason}")]
    UnitDestroyFailed {
        /// The unit identifier.
        unit: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Exec inside a unit failed.
    #[error("exec failed in unit {unit}: {reason}")]
    ExecFailed {
        /// The unit identifier.
        unit: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Failed to pull an image.
    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed {
        /// The image that failed to pull.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Network creation failed.
    #[error("failed to create network {name}: {reason}")]
    NetworkCreationFailed {
        /// The network name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Tanks did not reach `Ready` in time.
    #[error("{} tank(s) not ready after {waited:?}: {}", pending.len(), display_tanks(pending))]
    ReadinessTimeout {
        /// Tanks that were neither ready nor failed.
        pending: Vec<TankId>,
        /// How long we waited.
        waited: Duration,
    },

    /// Timeout waiting for a condition.
    #[error("timeout waiting for {condition}")]
    Timeout {
        /// The condition that timed out.
        condition: String,
    },

    /// Backend capability not supported.
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The network has been torn down.
    #[error("network {0} has been stopped")]
    NetworkStopped(String),
}

fn display_tanks(tanks: &[TankId]) -> String {
    tanks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrchestratorError {
    /// Creates a unit not found error.
    pub fn unit_not_found(id: impl Into<String>) -> Self {
        Self::UnitNotFound(id.into())
    }

    /// Creates a unit creation failed error.
    pub fn unit_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnitCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a unit destroy failed error.
    pub fn unit_destroy_failed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnitDestroyFailed {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    /// Creates an exec failed error.
    pub fn exec_failed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    /// Creates an image pull failed error.
    pub fn image_pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a network creation failed error.
    pub fn network_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Creates a capability not supported error.
    pub fn capability_not_supported(cap: impl Into<String>) -> Self {
        Self::CapabilityNotSupported(cap.into())
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::DockerApi(_) | Self::Io(_)
        )
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnitNotFound(_) | Self::TankNotFound(_))
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
