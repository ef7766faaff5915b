//! Container backend trait definition.
//!
//! The fleet only ever talks to the platform through [`ContainerBackend`]:
//! create a unit from a [`NodeSpec`], poll its status and address, exec into
//! it, read its logs, destroy it. Swapping a container engine for a cluster
//! scheduler means writing another implementation of this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::Result;
use crate::plan::{DeploymentPlan, NodeSpec};

/// Opaque identifier a backend hands out for a created unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    /// Creates a unit id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the backend reports about a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitStatus {
    /// Created but not yet running.
    Starting,
    /// Running.
    Running,
    /// Exited on its own.
    Exited {
        /// Exit code.
        exit_code: i64,
    },
    /// Killed or died abnormally.
    Crashed {
        /// Exit code, when the platform reports one.
        exit_code: Option<i64>,
    },
}

impl UnitStatus {
    /// Returns true once the unit will not run again.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Crashed { .. })
    }
}

/// Core trait for container backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: one fleet worker per tank calls
/// into the backend concurrently.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Prepares network-wide resources before any unit is created.
    async fn prepare_network(&self, plan: &DeploymentPlan) -> Result<()> {
        let _ = plan;
        Ok(())
    }

    /// Removes network-wide resources after every unit is destroyed.
    async fn remove_network(&self, network: &str) -> Result<()> {
        let _ = network;
        Ok(())
    }

    /// Creates and starts the unit for `spec`.
    async fn create_unit(&self, spec: &NodeSpec) -> Result<UnitId>;

    /// Stops and removes a unit. Removing an unknown unit is not an error.
    async fn destroy_unit(&self, unit: &UnitId) -> Result<()>;

    /// Current status of a unit.
    async fn unit_status(&self, unit: &UnitId) -> Result<UnitStatus>;

    /// Address the unit is reachable at, once it has one.
    async fn unit_address(&self, unit: &UnitId) -> Result<Option<Ipv4Addr>>;

    /// Executes a command in a unit.
    async fn exec(&self, unit: &UnitId, cmd: &[&str]) -> Result<ExecOutput>;

    /// Reads a unit's logs, optionally only the last `tail` lines.
    async fn logs(&self, unit: &UnitId, tail: Option<usize>) -> Result<String>;

    /// Returns the name of this backend.
    fn name(&self) -> &str;
}

/// Output from executing a command in a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,

    /// Exit code of the command.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Creates a new exec output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Returns true if the command succeeded.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
