/// Changeset types produced by the diff engine
use serde::{Deserialize, Serialize};

use crate::graph::ResourceNode;

/// What has to happen to a resource to converge it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    /// Delete-then-create under the same logical name; taken when an
    /// immutable attribute differs
    Replace,
    Delete,
}

impl ChangeAction {
    /// Symbol used when rendering a plan
    pub fn symbol(&self) -> &'static str {
        match self {
            ChangeAction::Create => "+",
            ChangeAction::Update => "~",
            ChangeAction::Replace => "±",
            ChangeAction::Delete => "-",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Create => write!(f, "create"),
            ChangeAction::Update => write!(f, "update"),
            ChangeAction::Replace => write!(f, "replace"),
            ChangeAction::Delete => write!(f, "delete"),
        }
    }
}

/// One pending change, with the logical names of the changeset ops that
/// must complete before it may run
#[derive(Debug, Clone)]
pub struct ChangeOp {
    pub action: ChangeAction,
    /// Desired node for create/update/replace; baseline snapshot for delete
    pub node: ResourceNode,
    pub waits_on: Vec<String>,
}

impl ChangeOp {
    pub fn name(&self) -> &str {
        self.node.name()
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.action.symbol(), self.action, self.node.id)
    }
}

/// Deterministically ordered sequence of changes; consumed by the executor
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub ops: Vec<ChangeOp>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeOp> {
        self.ops.iter()
    }

    /// Find an op by the logical name of its target
    #[allow(dead_code)]
    pub fn op(&self, name: &str) -> Option<&ChangeOp> {
        self.ops.iter().find(|op| op.name() == name)
    }
}
