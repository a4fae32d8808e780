/// Drift detection: compare live provider state against the applied baseline
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::graph::{AttributeMap, ResourceGraph, ResourceId};
use crate::provider::{Provider, ProviderError};
use crate::state::AppliedState;
use crate::utils::RetryConfig;

/// How urgent a divergence is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    /// Live state no longer matches the declared topology; an apply is due
    ShouldReconcile,
    /// Live state was changed out of band but still matches the declaration
    External,
}

impl std::fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftSeverity::ShouldReconcile => write!(f, "should reconcile"),
            DriftSeverity::External => write!(f, "external change"),
        }
    }
}

/// One attribute that differs between expected and observed state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    pub key: String,
    pub expected: Option<serde_json::Value>,
    pub observed: Option<serde_json::Value>,
}

/// What the scan found for a single resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftFinding {
    /// The resource no longer exists on the provider side
    Missing,
    Diverged {
        severity: DriftSeverity,
        deltas: Vec<FieldDelta>,
    },
}

/// Divergence report for one resource in the baseline
#[derive(Debug, Clone, Serialize)]
pub struct DriftRecord {
    pub id: ResourceId,
    pub finding: DriftFinding,
}

/// Reads live state for every applied resource and reports divergence.
///
/// Scans are side-effect-free on the model: each run re-reads the provider
/// and produces an independent set of records.
pub struct DriftDetector {
    provider: Arc<dyn Provider>,
    retry: RetryConfig,
}

impl DriftDetector {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retry: RetryConfig::default(),
        }
    }

    /// Scan every node in `baseline`, in logical-name order.
    ///
    /// A resource that cannot be found is reported as `Missing` and the
    /// scan continues; only an unreadable provider (transient errors beyond
    /// the retry budget) aborts the run.
    pub async fn scan(
        &self,
        desired: &ResourceGraph,
        baseline: &AppliedState,
    ) -> Result<Vec<DriftRecord>, ProviderError> {
        let mut records = Vec::new();

        for (name, applied) in &baseline.nodes {
            let id = ResourceId::new(applied.kind, name.clone());
            debug!("Reading live state of {} ({})", id, applied.provider_id);

            let live = match self
                .retry
                .run(&format!("read {}", id), || {
                    self.provider.read(&applied.provider_id)
                })
                .await
            {
                Ok(attrs) => attrs,
                Err(ProviderError::NotFound) => {
                    records.push(DriftRecord {
                        id,
                        finding: DriftFinding::Missing,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let desired_attrs = desired.node(name).map(|n| &n.attributes);

            if let Some(expected) = desired_attrs {
                if *expected != live {
                    records.push(DriftRecord {
                        id,
                        finding: DriftFinding::Diverged {
                            severity: DriftSeverity::ShouldReconcile,
                            deltas: deltas(expected, &live),
                        },
                    });
                    continue;
                }
            }

            if applied.attributes != live {
                records.push(DriftRecord {
                    id,
                    finding: DriftFinding::Diverged {
                        severity: DriftSeverity::External,
                        deltas: deltas(&applied.attributes, &live),
                    },
                });
            }
        }

        info!(
            "Drift scan finished: {} of {} resources diverged",
            records.len(),
            baseline.nodes.len()
        );

        Ok(records)
    }
}

/// Per-key differences between two attribute maps, key ascending
fn deltas(expected: &AttributeMap, observed: &AttributeMap) -> Vec<FieldDelta> {
    let keys: std::collections::BTreeSet<&String> =
        expected.keys().chain(observed.keys()).collect();

    keys.into_iter()
        .filter(|key| expected.get(*key) != observed.get(*key))
        .map(|key| FieldDelta {
            key: key.clone(),
            expected: expected.get(key).cloned(),
            observed: observed.get(key).cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{Executor, ExecutorConfig};
    use crate::graph::{ResourceGraph, ResourceKind, ResourceNode};
    use crate::plan::diff;
    use crate::provider::mock::MockProvider;
    use serde_json::json;

    fn network() -> ResourceNode {
        ResourceNode::new(ResourceKind::Network, "eks_vpc").with_attr("cidr", json!("10.42.0.0/16"))
    }

    fn cluster() -> ResourceNode {
        ResourceNode::new(ResourceKind::Cluster, "eks_cluster")
            .with_attr("version", json!("1.29"))
            .with_dependency("eks_vpc")
    }

    async fn converged(
        provider: Arc<MockProvider>,
        graph: &ResourceGraph,
    ) -> AppliedState {
        let executor = Executor::new(provider, ExecutorConfig::default());
        executor
            .apply(&diff(graph, &AppliedState::empty()), &AppliedState::empty())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_clean_scan_reports_nothing() {
        let provider = Arc::new(MockProvider::new());
        let graph = ResourceGraph::build(vec![network(), cluster()]).unwrap();
        let state = converged(provider.clone(), &graph).await;

        let detector = DriftDetector::new(provider);
        let records = detector.scan(&graph, &state).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_does_not_abort_scan() {
        let provider = Arc::new(MockProvider::new());
        let graph = ResourceGraph::build(vec![network(), cluster()]).unwrap();
        let state = converged(provider.clone(), &graph).await;

        let vpc_id = provider.provider_id_of("eks_vpc").unwrap();
        provider.remove_externally(&vpc_id);

        let detector = DriftDetector::new(provider.clone());
        let records = detector.scan(&graph, &state).await.unwrap();

        // Exactly one missing record, and the cluster was still scanned
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.name, "eks_vpc");
        assert_eq!(records[0].finding, DriftFinding::Missing);
        assert!(provider
            .calls()
            .iter()
            .any(|(op, name)| *op == "read" && name == "eks_cluster"));
    }

    #[tokio::test]
    async fn test_divergence_from_desired_is_should_reconcile() {
        let provider = Arc::new(MockProvider::new());
        let graph = ResourceGraph::build(vec![network()]).unwrap();
        let state = converged(provider.clone(), &graph).await;

        let vpc_id = provider.provider_id_of("eks_vpc").unwrap();
        provider.mutate_externally(&vpc_id, "cidr", json!("10.99.0.0/16"));

        let detector = DriftDetector::new(provider);
        let records = detector.scan(&graph, &state).await.unwrap();

        assert_eq!(records.len(), 1);
        match &records[0].finding {
            DriftFinding::Diverged { severity, deltas } => {
                assert_eq!(*severity, DriftSeverity::ShouldReconcile);
                assert_eq!(deltas.len(), 1);
                assert_eq!(deltas[0].key, "cidr");
                assert_eq!(deltas[0].expected, Some(json!("10.42.0.0/16")));
                assert_eq!(deltas[0].observed, Some(json!("10.99.0.0/16")));
            }
            other => panic!("expected divergence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_divergence_matching_desired_is_external() {
        let provider = Arc::new(MockProvider::new());
        let graph = ResourceGraph::build(vec![network()]).unwrap();
        let mut state = converged(provider.clone(), &graph).await;

        // Someone already fixed the resource by hand: live matches desired,
        // but the recorded baseline is stale
        state
            .nodes
            .get_mut("eks_vpc")
            .unwrap()
            .attributes
            .insert("cidr".to_string(), json!("10.0.0.0/8"));

        let detector = DriftDetector::new(provider);
        let records = detector.scan(&graph, &state).await.unwrap();

        assert_eq!(records.len(), 1);
        assert!(matches!(
            &records[0].finding,
            DriftFinding::Diverged {
                severity: DriftSeverity::External,
                ..
            }
        ));
    }
}
