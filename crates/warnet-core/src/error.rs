//! Error types for topology handling.

use crate::schema::PropertyType;
use crate::tank::TankId;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Where in a topology document a schema failure was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaLevel {
    /// Graph-level attributes.
    Graph,
    /// The node at this position.
    Node(usize),
    /// The edge at this position in declaration order.
    Edge(usize),
}

impl fmt::Display for SchemaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Node(i) => write!(f, "node {i}"),
            Self::Edge(i) => write!(f, "edge {i}"),
        }
    }
}

/// Why a property was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaReason {
    /// Required and absent with no default.
    Missing,
    /// Present with the wrong primitive type.
    Type {
        /// The type the schema declares.
        expected: PropertyType,
    },
    /// Not declared at this level.
    Unknown,
    /// Node identity disagrees with its position.
    Identity,
    /// Edge endpoint names a vertex that does not exist.
    Reference,
    /// Edge starts and ends at the same vertex.
    SelfLoop,
    /// Directed edge already declared.
    Duplicate,
}

impl fmt::Display for SchemaReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Type { expected } => write!(f, "type (expected {expected})"),
            Self::Unknown => write!(f, "unknown"),
            Self::Identity => write!(f, "identity"),
            Self::Reference => write!(f, "reference"),
            Self::SelfLoop => write!(f, "self-loop"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// A topology document failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema error at {level}, property `{property}`: {reason}")]
pub struct SchemaError {
    /// Level the failure was found at.
    pub level: SchemaLevel,
    /// Offending property name.
    pub property: String,
    /// Failure classification.
    pub reason: SchemaReason,
}

impl SchemaError {
    /// Creates a new schema error.
    pub fn new(level: SchemaLevel, property: impl Into<String>, reason: SchemaReason) -> Self {
        Self {
            level,
            property: property.into(),
            reason,
        }
    }

    /// Creates a missing-property error.
    pub fn missing(level: SchemaLevel, property: impl Into<String>) -> Self {
        Self::new(level, property, SchemaReason::Missing)
    }

    /// Creates a type-mismatch error.
    pub fn type_mismatch(
        level: SchemaLevel,
        property: impl Into<String>,
        expected: PropertyType,
    ) -> Self {
        Self::new(level, property, SchemaReason::Type { expected })
    }

    /// Creates an unknown-property error.
    pub fn unknown(level: SchemaLevel, property: impl Into<String>) -> Self {
        Self::new(level, property, SchemaReason::Unknown)
    }
}

/// Structural violations of the topology invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// Edge endpoint does not exist.
    #[error("edge {source_id} -> {target} references unknown vertex {missing}")]
    UnknownVertex {
        /// Edge source.
        source_id: TankId,
        /// Edge target.
        target: TankId,
        /// The endpoint that is missing.
        missing: TankId,
    },

    /// Edge from a vertex to itself.
    #[error("self-loop on {0}")]
    SelfLoop(TankId),

    /// The same ordered pair was added twice.
    #[error("duplicate edge {source_id} -> {target}")]
    DuplicateEdge {
        /// Edge source.
        source_id: TankId,
        /// Edge target.
        target: TankId,
    },
}

/// The generator was given input it cannot satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// A graph needs at least one vertex.
    #[error("cannot generate a graph with {0} vertices, need at least 1")]
    TooFewVertices(usize),

    /// A version override that is neither a supported tag nor a source build.
    #[error("unsupported version {0:?}")]
    UnsupportedVersion(String),
}

/// Errors from the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema validation failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Topology invariant violation.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Generator input failure.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The document could not be parsed at all.
    #[error("malformed topology document: {0}")]
    Document(String),

    /// A subnet string could not be parsed.
    #[error("invalid subnet {subnet:?}: {reason}")]
    InvalidSubnet {
        /// The offending input.
        subnet: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl CoreError {
    /// Creates a document error.
    pub fn document(reason: impl Into<String>) -> Self {
        Self::Document(reason.into())
    }

    /// Creates an invalid subnet error.
    pub fn invalid_subnet(subnet: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSubnet {
            subnet: subnet.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Document(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Document(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = SchemaError::missing(SchemaLevel::Node(3), "resources");
        assert_eq!(
            err.to_string(),
            "schema error at node 3, property `resources`: missing"
        );

        let err = SchemaError::type_mismatch(SchemaLevel::Graph, "version", PropertyType::String);
        assert_eq!(
            err.to_string(),
            "schema error at graph, property `version`: type (expected string)"
        );
    }

    #[test]
    fn test_topology_error_display() {
        let err = TopologyError::DuplicateEdge {
            source_id: TankId(0),
            target: TankId(1),
        };
        assert_eq!(err.to_string(), "duplicate edge tank-0000 -> tank-0001");
    }

    #[test]
    fn test_generation_error_display() {
        assert_eq!(
            GenerationError::TooFewVertices(0).to_string(),
            "cannot generate a graph with 0 vertices, need at least 1"
        );
    }
}
