//! In-memory topology model and its document form.
//!
//! A [`Topology`] is the validated, typed view of a graph document. The
//! [`TopologyDocument`] is the raw serde form read from YAML or JSON and is
//! only turned into a `Topology` by the [`SchemaValidator`](crate::schema::SchemaValidator).

use crate::error::TopologyError;
use crate::tank::TankId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// String value.
    Str(String),
}

impl AttrValue {
    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Attribute map, ordered so serialization is stable.
pub type Attributes = BTreeMap<String, AttrValue>;

/// One tank in the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    /// Positional identity.
    pub id: TankId,
    /// Validated attributes, defaults applied.
    pub attributes: Attributes,
}

impl Vertex {
    /// Creates a vertex with no attributes.
    pub fn new(id: TankId) -> Self {
        Self {
            id,
            attributes: Attributes::new(),
        }
    }

    /// Sets an attribute.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(AttrValue::as_str)
            .filter(|s| !s.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    /// Image version override.
    pub fn version(&self) -> Option<&str> {
        self.str_attr("version")
    }

    /// Full image reference override.
    pub fn image(&self) -> Option<&str> {
        self.str_attr("image")
    }

    /// Raw node config overlay.
    pub fn config_overlay(&self) -> Option<&str> {
        self.str_attr("bitcoin_config")
    }

    /// Traffic-control command to apply once the unit is up.
    pub fn tc_netem(&self) -> Option<&str> {
        self.str_attr("tc_netem")
    }

    /// Extra build arguments for source builds.
    pub fn build_args(&self) -> Option<&str> {
        self.str_attr("build_args")
    }

    /// Resource profile name.
    pub fn resources(&self) -> &str {
        self.str_attr("resources").unwrap_or("default")
    }

    /// Whether a Tor sidecar is requested.
    pub fn tor(&self) -> bool {
        self.flag("tor")
    }

    /// Whether a Lightning companion node is requested.
    pub fn ln(&self) -> bool {
        self.flag("ln")
    }

    /// Image for the Lightning companion node.
    pub fn ln_image(&self) -> Option<&str> {
        self.str_attr("ln_image")
    }

    /// Whether a metrics exporter runs next to the node.
    pub fn exporter(&self) -> bool {
        self.flag("exporter")
    }

    /// Whether the node's logs are shipped to the collector.
    pub fn collect_logs(&self) -> bool {
        self.flag("collect_logs")
    }
}

/// A directed intent to connect `source` to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    /// Initiating tank.
    pub source: TankId,
    /// Tank being dialled.
    pub target: TankId,
}

impl Edge {
    /// Creates a new edge.
    pub const fn new(source: TankId, target: TankId) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// A directed graph of tanks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// Graph-level attributes, defaults applied.
    pub graph_attributes: Attributes,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    edge_set: HashSet<(TankId, TankId)>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a vertex; its identity is its position.
    pub fn add_vertex(&mut self, attributes: Attributes) -> TankId {
        let id = TankId(self.vertices.len() as u32);
        self.vertices.push(Vertex { id, attributes });
        id
    }

    /// Adds a directed edge, enforcing endpoint, self-loop and duplicate invariants.
    pub fn add_edge(&mut self, source: TankId, target: TankId) -> Result<(), TopologyError> {
        for endpoint in [source, target] {
            if !self.contains(endpoint) {
                return Err(TopologyError::UnknownVertex {
                    source_id: source,
                    target,
                    missing: endpoint,
                });
            }
        }
        if source == target {
            return Err(TopologyError::SelfLoop(source));
        }
        if !self.edge_set.insert((source, target)) {
            return Err(TopologyError::DuplicateEdge {
                source_id: source,
                target,
            });
        }
        self.edges.push(Edge::new(source, target));
        Ok(())
    }

    /// Returns true if the vertex exists.
    pub fn contains(&self, id: TankId) -> bool {
        (id.0 as usize) < self.vertices.len()
    }

    /// Returns true if the directed edge exists.
    pub fn has_edge(&self, source: TankId, target: TankId) -> bool {
        self.edge_set.contains(&(source, target))
    }

    /// Returns true if an edge exists in either direction.
    pub fn adjacent(&self, a: TankId, b: TankId) -> bool {
        self.has_edge(a, b) || self.has_edge(b, a)
    }

    /// Vertices in index order.
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Looks up a vertex.
    pub fn vertex(&self, id: TankId) -> Option<&Vertex> {
        self.vertices.get(id.0 as usize)
    }

    /// Mutable vertex lookup.
    pub fn vertex_mut(&mut self, id: TankId) -> Option<&mut Vertex> {
        self.vertices.get_mut(id.0 as usize)
    }

    /// Number of outbound edges from `id`.
    pub fn out_degree(&self, id: TankId) -> usize {
        self.edges.iter().filter(|e| e.source == id).count()
    }

    /// Graph-wide default version, if declared.
    pub fn default_version(&self) -> Option<&str> {
        self.graph_attributes
            .get("version")
            .and_then(AttrValue::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Converts to the serializable document form.
    pub fn to_document(&self) -> TopologyDocument {
        let graph = self
            .graph_attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let nodes = self
            .vertices
            .iter()
            .map(|v| {
                let mut node: RawAttributes = v
                    .attributes
                    .iter()
                    .map(|(k, val)| (k.clone(), val.to_json()))
                    .collect();
                node.insert(NODE_ID_KEY.to_string(), serde_json::Value::from(v.id.0));
                node
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .map(|e| {
                let mut edge = RawAttributes::new();
                edge.insert(EDGE_SOURCE_KEY.to_string(), serde_json::Value::from(e.source.0));
                edge.insert(EDGE_TARGET_KEY.to_string(), serde_json::Value::from(e.target.0));
                edge
            })
            .collect();
        TopologyDocument {
            graph,
            nodes,
            edges,
        }
    }
}

/// Key carrying a node's positional identity.
pub const NODE_ID_KEY: &str = "id";
/// Key carrying an edge's source index.
pub const EDGE_SOURCE_KEY: &str = "source";
/// Key carrying an edge's target index.
pub const EDGE_TARGET_KEY: &str = "target";

/// Untyped attribute map as read from a document.
pub type RawAttributes = BTreeMap<String, serde_json::Value>;

/// Raw topology document.
///
/// ```yaml
/// graph:
///   version: "27.0"
/// nodes:
///   - id: 0
///     bitcoin_config: "debug=net,uacomment=w0"
///   - id: 1
///     resources: laptop
/// edges:
///   - source: 0
///     target: 1
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyDocument {
    /// Graph-level properties.
    #[serde(default)]
    pub graph: RawAttributes,
    /// Node property maps in index order.
    #[serde(default)]
    pub nodes: Vec<RawAttributes>,
    /// Edge property maps in declaration order.
    #[serde(default)]
    pub edges: Vec<RawAttributes>,
}

impl TopologyDocument {
    /// Parses a YAML (or JSON) document.
    pub fn from_yaml(raw: &str) -> crate::error::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> crate::error::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
