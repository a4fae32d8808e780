/// Resource identity and node types for the topology graph
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque resource attributes, keyed by attribute name
pub type AttributeMap = BTreeMap<String, serde_json::Value>;

/// Kind of declared infrastructure resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Cluster,
    NodeGroup,
    Addon,
}

impl ResourceKind {
    /// Attribute keys that cannot be changed in place for this kind.
    ///
    /// A diff in one of these keys forces a Replace instead of an Update
    /// (e.g. a cluster's Kubernetes version cannot be rewritten on a live
    /// control plane).
    pub fn immutable_attrs(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Network => &["cidr"],
            ResourceKind::Cluster => &["version"],
            ResourceKind::NodeGroup => &["instance_type"],
            ResourceKind::Addon => &["addon_name"],
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Cluster => write!(f, "cluster"),
            ResourceKind::NodeGroup => write!(f, "node_group"),
            ResourceKind::Addon => write!(f, "addon"),
        }
    }
}

/// Stable identity of a declared resource: kind plus user-assigned logical name.
///
/// Logical names are unique across the whole graph, independent of any
/// provider-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A single declared resource with its desired attributes and dependencies.
///
/// Dependencies are weak references by logical name; the node does not own
/// the resources it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceNode {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            attributes: AttributeMap::new(),
            depends_on: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    #[allow(dead_code)]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }
}
