//! Warnet Control - the operator command surface.
//!
//! [`ControlPlane`] ties the other crates together: it validates and
//! compiles topology documents, deploys them through a
//! [`FleetOrchestrator`](warnet_orchestrator::FleetOrchestrator), routes RPC
//! and log commands to deployed networks and launches scenarios against
//! them. Every command is wrapped in pre/post hooks.

#![warn(missing_docs)]

pub mod error;
pub mod plane;
pub mod registry;

pub use error::{ControlError, Result};
pub use plane::{commands, ControlConfig, ControlPlane};
pub use registry::NetworkRegistry;
