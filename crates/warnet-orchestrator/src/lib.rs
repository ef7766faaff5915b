//! Deployment compilation and fleet lifecycle for warnet networks.
//!
//! This crate takes a validated [`Topology`](warnet_core::Topology) all the
//! way to a running network and back down again.
//!
//! # Architecture
//!
//! - [`compiler`]: [`DeploymentCompiler`] turns a topology into a [`DeploymentPlan`]
//! - [`plan`]: node specs and connection directives
//! - [`container`]: images and resource profiles
//! - [`backend`]: the [`ContainerBackend`] trait with Docker and simulated implementations
//! - [`state`]: the single-writer [`StateTable`] of tank and edge states
//! - [`fleet`]: [`FleetOrchestrator`], one worker task per tank
//! - [`context`]: [`OrchestratorContext`], the handle for a deployed network
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warnet_orchestrator::{
//!     DeploymentCompiler, FleetConfig, FleetOrchestrator, PlanDefaults, SimulatedBackend,
//! };
//! use warnet_rpc::{RpcCredentials, RpcGateway};
//!
//! let plan = DeploymentCompiler::new().compile(&topology, &PlanDefaults::default())?;
//! let backend = Arc::new(SimulatedBackend::new());
//! let fleet = FleetOrchestrator::new(
//!     backend.clone(),
//!     backend,
//!     RpcGateway::default(),
//!     RpcCredentials::default(),
//!     FleetConfig::default(),
//! );
//! let network = fleet.deploy(plan).await?;
//! let report = network.wait_settled(fleet.config().readiness_timeout).await?;
//! network.shutdown().await?;
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod compiler;
pub mod container;
pub mod context;
pub mod error;
pub mod fleet;
pub mod plan;
pub mod state;

pub use backend::{
    ContainerBackend, DockerBackend, DockerConfig, ExecOutput, SimulatedBackend, SimulatedConfig,
    UnitId, UnitStatus,
};
pub use compiler::{DeploymentCompiler, PlanDefaults, DEFAULT_IMAGE_REPO};
pub use container::{NodeImage, ResourceLimits, ResourceProfile};
pub use context::{DeploymentReport, LogMatch, NetworkStatus, OrchestratorContext};
pub use error::{CompileError, OrchestratorError, Result};
pub use fleet::{FleetConfig, FleetOrchestrator};
pub use plan::{ConnectionDirective, DeploymentPlan, NodeSpec, PlanSummary};
pub use state::{EdgeState, EdgeStatus, StateTable, TankWriter};
