//! Warnet Core - topology types for simulated node networks.
//!
//! This crate holds everything that can be decided before a single container
//! exists:
//!
//! - [`tank`]: tank identity (`TankId`) and target selectors
//! - [`topology`]: the directed graph of tanks and its document form
//! - [`schema`]: the attribute schema and [`SchemaValidator`]
//! - [`generator`]: synthetic cycle graphs and document loading
//! - [`address`]: random public IPv4 assignment inside a subnet
//! - [`conf`]: INI-style node config parsing and merging
//! - [`netem`]: validation of traffic-control commands
//! - [`state`]: per-tank runtime state shared with readers
//!
//! # Example
//!
//! ```
//! use warnet_core::generator::{GenerateOptions, TopologyGenerator};
//!
//! let generator = TopologyGenerator::default();
//! let topology = generator
//!     .generate_cycle(4, false, &GenerateOptions::default())
//!     .unwrap();
//! assert_eq!(topology.edges().len(), 4);
//!
//! // Documents round-trip through YAML.
//! let yaml = topology.to_document().to_yaml().unwrap();
//! assert_eq!(generator.load_and_validate(&yaml).unwrap(), topology);
//! ```

pub mod address;
pub mod conf;
pub mod error;
pub mod generator;
pub mod netem;
pub mod schema;
pub mod state;
pub mod tank;
pub mod topology;

pub use address::{generate_address, Subnet, DEFAULT_SUBNET};
pub use conf::NodeConf;
pub use error::{CoreError, GenerationError, Result, SchemaError, SchemaLevel, SchemaReason, TopologyError};
pub use generator::{GenerateOptions, TopologyGenerator, DEFAULT_TAG, SUPPORTED_TAGS};
pub use schema::{Schema, SchemaValidator};
pub use state::{TankPhase, TankState};
pub use tank::{TankId, TankSelector};
pub use topology::{AttrValue, Attributes, Edge, Topology, TopologyDocument, Vertex};
