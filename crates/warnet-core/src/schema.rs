//! Attribute schema and document validation.
//!
//! The schema is data: each level (graph, node, edge) lists its allowed
//! properties with a primitive type, whether it is required, and an optional
//! default. Validation scans the graph level, then nodes in index order, then
//! edges in declaration order, and stops at the first failure.

use crate::error::{SchemaError, SchemaLevel, SchemaReason, TopologyError};
use crate::tank::TankId;
use crate::topology::{
    AttrValue, Attributes, RawAttributes, Topology, TopologyDocument, EDGE_SOURCE_KEY,
    EDGE_TARGET_KEY, NODE_ID_KEY,
};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Primitive type of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// UTF-8 string.
    String,
    /// Boolean.
    Boolean,
    /// Signed integer.
    Integer,
}

impl PropertyType {
    fn coerce(self, value: &Value) -> Option<AttrValue> {
        match (self, value) {
            (Self::String, Value::String(s)) => Some(AttrValue::Str(s.clone())),
            (Self::Boolean, Value::Bool(b)) => Some(AttrValue::Bool(*b)),
            (Self::Integer, Value::Number(n)) => n.as_i64().map(AttrValue::Int),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
            Self::Integer => write!(f, "integer"),
        }
    }
}

/// One declared property.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    /// Property name.
    pub name: String,
    /// Required type.
    pub ty: PropertyType,
    /// Whether the property must be present (after defaults).
    pub required: bool,
    /// Value used when absent.
    pub default: Option<AttrValue>,
}

impl PropertySchema {
    /// An optional property with no default.
    pub fn optional(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: None,
        }
    }

    /// A required property with no default.
    pub fn required(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            required: true,
            ..Self::optional(name, ty)
        }
    }

    /// A property filled with `default` when absent.
    pub fn with_default(name: impl Into<String>, ty: PropertyType, default: AttrValue) -> Self {
        Self {
            default: Some(default),
            ..Self::optional(name, ty)
        }
    }
}

/// Properties allowed at one level.
#[derive(Debug, Clone, Default)]
pub struct LevelSchema {
    properties: Vec<PropertySchema>,
}

impl LevelSchema {
    /// Creates a level from its declared properties.
    pub fn new(properties: Vec<PropertySchema>) -> Self {
        Self { properties }
    }

    /// Looks up a declared property.
    pub fn get(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Declared properties in declaration order.
    pub fn properties(&self) -> &[PropertySchema] {
        &self.properties
    }

    fn validate(
        &self,
        level: SchemaLevel,
        raw: &RawAttributes,
        structural: &[&str],
    ) -> Result<Attributes, SchemaError> {
        for key in raw.keys() {
            if structural.contains(&key.as_str()) {
                continue;
            }
            if self.get(key).is_none() {
                return Err(SchemaError::unknown(level, key));
            }
        }

        let mut out = Attributes::new();
        for prop in &self.properties {
            match raw.get(&prop.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &prop.default {
                        out.insert(prop.name.clone(), default.clone());
                    } else if prop.required {
                        return Err(SchemaError::missing(level, &prop.name));
                    }
                }
                Some(value) => {
                    let typed = prop
                        .ty
                        .coerce(value)
                        .ok_or_else(|| SchemaError::type_mismatch(level, &prop.name, prop.ty))?;
                    out.insert(prop.name.clone(), typed);
                }
            }
        }
        Ok(out)
    }
}

/// Full schema for a topology document.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Graph-level properties.
    pub graph: LevelSchema,
    /// Node-level properties.
    pub node: LevelSchema,
    /// Edge-level properties.
    pub edge: LevelSchema,
}

impl Default for Schema {
    fn default() -> Self {
        use PropertyType::{Boolean, String};
        Self {
            graph: LevelSchema::new(vec![
                PropertySchema::optional("version", String),
                PropertySchema::optional("services", String),
            ]),
            node: LevelSchema::new(vec![
                PropertySchema::optional("version", String),
                PropertySchema::optional("image", String),
                PropertySchema::optional("bitcoin_config", String),
                PropertySchema::optional("tc_netem", String),
                PropertySchema::optional("build_args", String),
                PropertySchema::with_default("exporter", Boolean, AttrValue::Bool(false)),
                PropertySchema::with_default("collect_logs", Boolean, AttrValue::Bool(false)),
                PropertySchema::with_default("resources", String, AttrValue::from("default")),
                PropertySchema::with_default("tor", Boolean, AttrValue::Bool(false)),
                PropertySchema::with_default("ln", Boolean, AttrValue::Bool(false)),
                PropertySchema::optional("ln_image", String),
            ]),
            edge: LevelSchema::default(),
        }
    }
}

/// Validates raw documents into [`Topology`] values.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    schema: Schema,
}

impl SchemaValidator {
    /// Creates a validator over a custom schema.
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// The schema in use.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validates a document, returning the typed topology or the first failure.
    pub fn validate(&self, document: &TopologyDocument) -> Result<Topology, SchemaError> {
        let mut topology = Topology::new();
        topology.graph_attributes = self.schema.graph.validate(SchemaLevel::Graph, &document.graph, &[])?;

        for (position, raw) in document.nodes.iter().enumerate() {
            let level = SchemaLevel::Node(position);
            if let Some(id) = raw.get(NODE_ID_KEY) {
                match id.as_u64() {
                    Some(id) if id == position as u64 => {}
                    Some(_) => {
                        return Err(SchemaError::new(level, NODE_ID_KEY, SchemaReason::Identity))
                    }
                    None => {
                        return Err(SchemaError::type_mismatch(
                            level,
                            NODE_ID_KEY,
                            PropertyType::Integer,
                        ))
                    }
                }
            }
            let attributes = self.schema.node.validate(level, raw, &[NODE_ID_KEY])?;
            topology.add_vertex(attributes);
        }

        for (position, raw) in document.edges.iter().enumerate() {
            let level = SchemaLevel::Edge(position);
            let source = endpoint(level, raw, EDGE_SOURCE_KEY)?;
            let target = endpoint(level, raw, EDGE_TARGET_KEY)?;
            self.schema
                .edge
                .validate(level, raw, &[EDGE_SOURCE_KEY, EDGE_TARGET_KEY])?;
            topology
                .add_edge(source, target)
                .map_err(|err| edge_violation(level, err))?;
        }

        debug!(
            vertices = topology.vertices().len(),
            edges = topology.edges().len(),
            "topology document validated"
        );
        Ok(topology)
    }
}

fn endpoint(level: SchemaLevel, raw: &RawAttributes, key: &str) -> Result<TankId, SchemaError> {
    let value = raw.get(key).ok_or_else(|| SchemaError::missing(level, key))?;
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .map(TankId)
        .ok_or_else(|| SchemaError::type_mismatch(level, key, PropertyType::Integer))
}

fn edge_violation(level: SchemaLevel, err: TopologyError) -> SchemaError {
    match err {
        TopologyError::UnknownVertex {
            source_id, missing, ..
        } => {
            let property = if missing == source_id {
                EDGE_SOURCE_KEY
            } else {
                EDGE_TARGET_KEY
            };
            SchemaError::new(level, property, SchemaReason::Reference)
        }
        TopologyError::SelfLoop(_) => {
            SchemaError::new(level, EDGE_TARGET_KEY, SchemaReason::SelfLoop)
        }
        TopologyError::DuplicateEdge { .. } => {
            SchemaError::new(level, EDGE_TARGET_KEY, SchemaReason::Duplicate)
        }
    }
}
