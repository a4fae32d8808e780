/// Resource graph model: validated DAG of declared infrastructure
pub mod node;

pub use node::{AttributeMap, ResourceId, ResourceKind, ResourceNode};

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A malformed declaration that can never be applied
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("duplicate logical name: {0}")]
    DuplicateName(String),

    #[error("resource {node} depends on undeclared resource '{dependency}'")]
    UnknownDependency { node: ResourceId, dependency: String },

    #[error("resource of kind {0} has an empty logical name")]
    EmptyName(ResourceKind),
}

/// A dependency cycle in the declaration, naming every node on the cycle
#[derive(Debug, Error)]
#[error("dependency cycle involving: {}", nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", "))]
pub struct CyclicDependencyError {
    pub nodes: Vec<ResourceId>,
}

/// Why a graph could not be built
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cycle(#[from] CyclicDependencyError),
}

/// Validated, acyclic set of resource nodes with a cached topological order
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, ResourceNode>,
    order: Vec<ResourceId>,
}

impl ResourceGraph {
    /// Build a graph from declared nodes, validating name uniqueness,
    /// dependency resolution, and acyclicity.
    pub fn build(nodes: Vec<ResourceNode>) -> Result<Self, GraphError> {
        let mut by_name: BTreeMap<String, ResourceNode> = BTreeMap::new();

        for node in nodes {
            if node.name().is_empty() {
                return Err(ValidationError::EmptyName(node.id.kind).into());
            }
            if by_name.contains_key(node.name()) {
                return Err(ValidationError::DuplicateName(node.name().to_string()).into());
            }
            by_name.insert(node.name().to_string(), node);
        }

        for node in by_name.values() {
            for dep in &node.depends_on {
                if !by_name.contains_key(dep) {
                    return Err(ValidationError::UnknownDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
            }
        }

        let order = topological_sort(&by_name)?;

        Ok(Self {
            nodes: by_name,
            order,
        })
    }

    /// Nodes in dependency order (dependencies before dependents).
    ///
    /// Deterministic: ties are broken by logical name ascending, and the
    /// order is computed once at build time.
    pub fn topological_order(&self) -> &[ResourceId] {
        &self.order
    }

    /// Look up a node by logical name
    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    /// Logical names of nodes that directly depend on `name`, ascending
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.depends_on.iter().any(|d| d == name))
            .map(|n| n.name())
            .collect()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Kahn's algorithm with an ordered ready set so equal-rank nodes come out
/// in logical-name order. Leftover nodes mean a cycle.
fn topological_sort(
    nodes: &BTreeMap<String, ResourceNode>,
) -> Result<Vec<ResourceId>, CyclicDependencyError> {
    let mut in_degree: BTreeMap<&str, usize> = nodes
        .values()
        .map(|n| (n.name(), n.depends_on.len()))
        .collect();

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in nodes.values() {
        for dep in &node.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(node.name());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(name) = ready.iter().next().copied() {
        ready.remove(name);
        order.push(nodes[name].id.clone());

        for &dependent in dependents.get(name).into_iter().flatten() {
            let degree = in_degree.get_mut(dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < nodes.len() {
        let cycle: Vec<ResourceId> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(name, _)| nodes[*name].id.clone())
            .collect();
        return Err(CyclicDependencyError { nodes: cycle });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_nodes() -> Vec<ResourceNode> {
        vec![
            ResourceNode::new(ResourceKind::Addon, "vpc_cni_addon")
                .with_dependency("eks_cluster"),
            ResourceNode::new(ResourceKind::Cluster, "eks_cluster").with_dependency("eks_vpc"),
            ResourceNode::new(ResourceKind::NodeGroup, "managed_node_group")
                .with_dependency("eks_cluster"),
            ResourceNode::new(ResourceKind::Network, "eks_vpc"),
        ]
    }

    #[test]
    fn test_topological_order_is_valid() {
        let graph = ResourceGraph::build(sample_nodes()).unwrap();
        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|id| id.name.as_str())
            .collect();

        let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(position("eks_vpc") < position("eks_cluster"));
        assert!(position("eks_cluster") < position("vpc_cni_addon"));
        assert!(position("eks_cluster") < position("managed_node_group"));
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let first = ResourceGraph::build(sample_nodes()).unwrap();
        let second = ResourceGraph::build(sample_nodes()).unwrap();
        assert_eq!(first.topological_order(), second.topological_order());

        // Ties broken by logical name: both leaves depend only on the cluster
        let order: Vec<&str> = first
            .topological_order()
            .iter()
            .map(|id| id.name.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                "eks_vpc",
                "eks_cluster",
                "managed_node_group",
                "vpc_cni_addon"
            ]
        );
    }

    #[test]
    fn test_cycle_fails_with_cyclic_dependency_error() {
        let nodes = vec![
            ResourceNode::new(ResourceKind::Network, "a").with_dependency("b"),
            ResourceNode::new(ResourceKind::Cluster, "b").with_dependency("a"),
        ];

        match ResourceGraph::build(nodes) {
            Err(GraphError::Cycle(err)) => {
                let names: Vec<&str> = err.nodes.iter().map(|id| id.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let nodes = vec![ResourceNode::new(ResourceKind::Network, "a").with_dependency("a")];
        assert!(matches!(
            ResourceGraph::build(nodes),
            Err(GraphError::Cycle(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let nodes = vec![
            ResourceNode::new(ResourceKind::Network, "dup"),
            ResourceNode::new(ResourceKind::Cluster, "dup"),
        ];
        assert!(matches!(
            ResourceGraph::build(nodes),
            Err(GraphError::Validation(ValidationError::DuplicateName(name))) if name == "dup"
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let nodes = vec![ResourceNode::new(ResourceKind::Cluster, "c").with_dependency("ghost")];
        assert!(matches!(
            ResourceGraph::build(nodes),
            Err(GraphError::Validation(
                ValidationError::UnknownDependency { .. }
            ))
        ));
    }

    #[test]
    fn test_dependents_of() {
        let graph = ResourceGraph::build(sample_nodes()).unwrap();
        assert_eq!(
            graph.dependents_of("eks_cluster"),
            vec!["managed_node_group", "vpc_cni_addon"]
        );
        assert!(graph.dependents_of("vpc_cni_addon").is_empty());
    }
}
