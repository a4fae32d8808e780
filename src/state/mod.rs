/// Durable record of the last successfully applied topology
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::graph::{AttributeMap, ResourceKind, ResourceNode};

/// Current schema version of the persisted state document
pub const STATE_VERSION: u32 = 1;

/// A node as it was last applied, with its provider-assigned identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedNode {
    pub kind: ResourceKind,
    pub provider_id: String,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Fields written by newer schema versions, preserved on round-trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Snapshot of the last converged resource graph, keyed by logical name.
///
/// Serialized as a versioned JSON document; unknown fields survive
/// load/save so newer writers can evolve the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedState {
    pub version: u32,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub nodes: BTreeMap<String, AppliedNode>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AppliedState {
    /// Baseline for a first run: nothing applied yet
    pub fn empty() -> Self {
        Self {
            version: STATE_VERSION,
            applied_at: Utc::now(),
            nodes: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AppliedNode> {
        self.nodes.get(name)
    }

    /// Record a successful create/update/replace outcome for `node`
    pub fn record_applied(&mut self, node: &ResourceNode, provider_id: String) {
        self.nodes.insert(
            node.name().to_string(),
            AppliedNode {
                kind: node.id.kind,
                provider_id,
                attributes: node.attributes.clone(),
                depends_on: node.depends_on.clone(),
                extra: BTreeMap::new(),
            },
        );
    }

    /// Record a successful delete outcome
    pub fn remove(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    /// Logical names of applied nodes that directly depend on `name`, ascending
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.depends_on.iter().any(|d| d == name))
            .map(|(dependent, _)| dependent.as_str())
            .collect()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// State file could not be read, written, or understood
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state file {path} is not a valid state document: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("state file {path} has unsupported version {found} (this build supports up to {STATE_VERSION})")]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

/// File-backed store for the applied state.
///
/// Saves are atomic: the document is written to a temp file next to the
/// target and renamed over it, so a crash or concurrent reader never sees
/// a half-written state.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last applied state, or `None` if no state file exists yet
    pub async fn load(&self) -> Result<Option<AppliedState>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let state: AppliedState =
            serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Decode {
                path: self.path.clone(),
                source: e,
            })?;

        if state.version > STATE_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                path: self.path.clone(),
                found: state.version,
            });
        }

        debug!(
            "Loaded state with {} nodes from {}",
            state.nodes.len(),
            self.path.display()
        );

        Ok(Some(state))
    }

    /// Atomically persist `state`, overwriting any previous document
    pub async fn save(&self, state: &AppliedState) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(state).map_err(|e| PersistenceError::Decode {
            path: self.path.clone(),
            source: e,
        })?;

        let tmp_path = self.temp_path();
        let write_err = |e| PersistenceError::Write {
            path: self.path.clone(),
            source: e,
        };

        tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(write_err)?;

        debug!(
            "Saved state with {} nodes to {}",
            state.nodes.len(),
            self.path.display()
        );

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
