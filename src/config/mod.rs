/// Configuration management for Converge - declaration file handling
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

use crate::graph::{AttributeMap, GraphError, ResourceGraph, ResourceId, ResourceKind, ResourceNode};

/// Main topology declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Topology name (used for resource tagging and log context)
    pub name: String,

    /// Provider API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Declared resources
    pub resources: Vec<ResourceDecl>,
}

/// Provider API endpoint and credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Provider endpoint (can also be set via CONVERGE_API_ENDPOINT env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Provider API token (can also be set via CONVERGE_API_TOKEN env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// One declared resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Logical name, unique across the declaration
    pub name: String,

    /// Resource kind
    pub kind: ResourceKind,

    /// Desired attributes, opaque to the reconciler core
    #[serde(default)]
    pub attributes: AttributeMap,

    /// Logical names of resources this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TopologyConfig {
    /// Load a declaration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TopologyConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the declaration shape (graph-level validation happens in
    /// `to_graph`)
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("topology name cannot be empty");
        }
        if self.resources.is_empty() {
            anyhow::bail!("at least one resource must be declared");
        }
        Ok(())
    }

    /// Build the validated resource graph from the declaration
    pub fn to_graph(&self) -> Result<ResourceGraph, GraphError> {
        let nodes = self
            .resources
            .iter()
            .map(|decl| ResourceNode {
                id: ResourceId::new(decl.kind, decl.name.clone()),
                attributes: decl.attributes.clone(),
                depends_on: decl.depends_on.clone(),
            })
            .collect();
        ResourceGraph::build(nodes)
    }

    /// Get the provider endpoint from config or environment
    pub fn api_endpoint(&self) -> anyhow::Result<String> {
        self.api
            .endpoint
            .clone()
            .or_else(|| std::env::var("CONVERGE_API_ENDPOINT").ok())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Provider endpoint not found. Set CONVERGE_API_ENDPOINT environment variable or specify api.endpoint in the declaration"
                )
            })
    }

    /// Get the provider API token from config or environment
    pub fn api_token(&self) -> anyhow::Result<String> {
        self.api
            .token
            .clone()
            .or_else(|| std::env::var("CONVERGE_API_TOKEN").ok())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Provider API token not found. Set CONVERGE_API_TOKEN environment variable or specify api.token in the declaration"
                )
            })
    }

    /// Generate an example declaration: a VPC, an EKS-style cluster on it,
    /// the VPC CNI addon, and a fixed-size autoscaling managed node group
    pub fn example() -> Self {
        let attrs = |value: serde_json::Value| -> AttributeMap {
            serde_json::from_value(value).expect("example attributes are valid maps")
        };

        Self {
            name: "eks-workshop".to_string(),
            api: ApiConfig::default(),
            resources: vec![
                ResourceDecl {
                    name: "eks_vpc".to_string(),
                    kind: ResourceKind::Network,
                    attributes: attrs(json!({
                        "cidr": "10.42.0.0/16",
                        "max_azs": 3,
                        "nat_gateways": 1,
                        "subnets": [
                            {"name": "Public", "type": "public", "cidr_mask": 19},
                            {"name": "Private", "type": "private_with_egress", "cidr_mask": 19},
                        ],
                        "public_subnet_tags": {"kubernetes.io/role/elb": "1"},
                    })),
                    depends_on: vec![],
                },
                ResourceDecl {
                    name: "eks_cluster".to_string(),
                    kind: ResourceKind::Cluster,
                    attributes: attrs(json!({
                        "version": "1.29",
                        "default_capacity": 0,
                    })),
                    depends_on: vec!["eks_vpc".to_string()],
                },
                ResourceDecl {
                    name: "vpc_cni_addon".to_string(),
                    kind: ResourceKind::Addon,
                    attributes: attrs(json!({
                        "addon_name": "vpc-cni",
                        "resolve_conflicts": "OVERWRITE",
                        "configuration": {
                            "env": {
                                "ENABLE_PREFIX_DELEGATION": "true",
                                "ENABLE_POD_ENI": "true",
                                "POD_SECURITY_GROUP_ENFORCING_MODE": "standard",
                            }
                        },
                    })),
                    depends_on: vec!["eks_cluster".to_string()],
                },
                ResourceDecl {
                    name: "managed_node_group".to_string(),
                    kind: ResourceKind::NodeGroup,
                    attributes: attrs(json!({
                        "instance_type": "m5.large",
                        "min_size": 3,
                        "max_size": 6,
                        "desired_size": 3,
                        "subnet_type": "private_with_egress",
                        "max_unavailable_percentage": 50,
                        "labels": {"workshop-default": "yes"},
                    })),
                    depends_on: vec!["eks_cluster".to_string()],
                },
            ],
        }
    }
}
