//! Warnet Scenario - workload programs run against live networks.
//!
//! - [`runner`]: [`ScenarioRunner`] launches, tracks and stops scenarios
//! - [`executor`]: the [`ScenarioExecutor`] seam and the child-process executor
//! - [`supervisor`]: per-tank worker supervision with bounded restart backoff
//! - [`workload`]: the built-in `tx-flood` workload
//!
//! Every program receives `--network=<name>` as its final argument.
//! Stopping a network stops every scenario that targets it.

#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod handle;
pub mod runner;
pub mod supervisor;
pub mod workload;

pub use error::{Result, ScenarioError};
pub use executor::{LaunchSpec, ProcessExecutor, ScenarioExecutor, ScenarioUnit};
pub use handle::{LogBuffer, ScenarioExit, ScenarioHandle, ScenarioStatus};
pub use runner::ScenarioRunner;
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorHandle, WorkerFactory};
pub use workload::{TargetSource, TxFlood, TxFloodConfig};
