//! Container backends.
//!
//! - [`DockerBackend`]: containers on a local Docker daemon (bollard)
//! - [`SimulatedBackend`]: in-memory units with simulated node RPC

mod docker;
mod simulated;
mod r#trait;

pub use docker::{DockerBackend, DockerConfig, DEFAULT_LN_IMAGE, NODE_CONF_ENV};
pub use r#trait::{ContainerBackend, ExecOutput, UnitId, UnitStatus};
pub use simulated::{SimulatedBackend, SimulatedConfig, SimulatedNodeRpc};
