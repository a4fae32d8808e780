/// Diff engine: desired graph vs. last-applied baseline
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::graph::{ResourceGraph, ResourceId, ResourceNode};
use crate::state::{AppliedNode, AppliedState};

use super::changeset::{ChangeAction, ChangeOp, Changeset};

/// Compare the desired graph against the baseline and produce the ordered
/// changeset that converges one to the other.
///
/// Nodes with no difference are omitted. Output order is deterministic:
/// deletes in reverse topological order first, then creates, updates and
/// replaces in topological order.
pub fn diff(desired: &ResourceGraph, baseline: &AppliedState) -> Changeset {
    let deletes = ordered_deletes(desired, baseline);

    // Classify every changing node before wiring edges, since an op's
    // waits_on depends on what happens to its neighbors.
    let mut actions: BTreeMap<&str, ChangeAction> = deletes
        .iter()
        .map(|name| (*name, ChangeAction::Delete))
        .collect();

    for id in desired.topological_order() {
        let node = desired.node(&id.name).unwrap();
        if let Some(action) = classify(node, baseline.get(&id.name)) {
            actions.insert(node.name(), action);
        }
    }

    let mut ops = Vec::with_capacity(actions.len());

    for name in &deletes {
        let applied = baseline.get(name).unwrap();
        ops.push(ChangeOp {
            action: ChangeAction::Delete,
            node: baseline_node(name, applied),
            waits_on: delete_waits(name, baseline, &actions),
        });
    }

    for id in desired.topological_order() {
        let node = desired.node(&id.name).unwrap();
        let action = match actions.get(node.name()) {
            Some(&action) => action,
            None => continue,
        };
        ops.push(ChangeOp {
            action,
            node: node.clone(),
            waits_on: forward_waits(node, action, baseline, &actions),
        });
    }

    debug!("Diff produced {} ops", ops.len());

    Changeset { ops }
}

/// Decide what to do with a desired node given its baseline counterpart
fn classify(node: &ResourceNode, applied: Option<&AppliedNode>) -> Option<ChangeAction> {
    let applied = match applied {
        Some(applied) => applied,
        None => return Some(ChangeAction::Create),
    };

    if applied.kind != node.id.kind {
        return Some(ChangeAction::Replace);
    }
    if applied.attributes == node.attributes {
        return None;
    }

    let forces_replace = node.id.kind.immutable_attrs().iter().any(|key| {
        node.attributes.get(*key) != applied.attributes.get(*key)
    });

    if forces_replace {
        Some(ChangeAction::Replace)
    } else {
        Some(ChangeAction::Update)
    }
}

/// Baseline nodes absent from the desired graph, ordered so that dependents
/// are deleted before the nodes they depend on. Ties by logical name.
fn ordered_deletes<'a>(desired: &ResourceGraph, baseline: &'a AppliedState) -> Vec<&'a str> {
    let removed: BTreeSet<&str> = baseline
        .nodes
        .keys()
        .map(String::as_str)
        .filter(|name| desired.node(name).is_none())
        .collect();

    let mut pending = removed.clone();
    let mut ordered = Vec::with_capacity(removed.len());

    while !pending.is_empty() {
        let next = pending.iter().copied().find(|&name| {
            baseline
                .dependents_of(name)
                .iter()
                .filter(|dependent| removed.contains(*dependent))
                .all(|dependent| !pending.contains(dependent))
        });

        // The baseline was a DAG when it was written, so a deletable node
        // always exists; fall back to name order if the file was tampered with.
        let name = next.unwrap_or_else(|| *pending.iter().next().unwrap());
        pending.remove(name);
        ordered.push(name);
    }

    ordered
}

/// A delete must wait for every changeset op touching a baseline dependent:
/// removed dependents are deleted first, surviving dependents are updated or
/// replaced away from the node before it disappears.
fn delete_waits(
    name: &str,
    baseline: &AppliedState,
    actions: &BTreeMap<&str, ChangeAction>,
) -> Vec<String> {
    baseline
        .dependents_of(name)
        .into_iter()
        .filter(|dependent| actions.contains_key(dependent))
        .map(str::to_string)
        .collect()
}

/// Wire the upstream ops a create/update/replace must wait for.
///
/// Forward edges point at the ops of the node's desired dependencies. The
/// exception is a dependency being replaced while this node already exists:
/// there the ordering inverts (dependents are handled before the replace),
/// so the replace op instead waits on this node via its reverse edges.
fn forward_waits(
    node: &ResourceNode,
    action: ChangeAction,
    baseline: &AppliedState,
    actions: &BTreeMap<&str, ChangeAction>,
) -> Vec<String> {
    let in_baseline = baseline.get(node.name()).is_some();
    let mut waits = BTreeSet::new();

    for dep in &node.depends_on {
        match actions.get(dep.as_str()) {
            Some(ChangeAction::Replace) if in_baseline => {}
            Some(_) => {
                waits.insert(dep.clone());
            }
            None => {}
        }
    }

    if action == ChangeAction::Replace {
        for dependent in baseline.dependents_of(node.name()) {
            if actions.contains_key(dependent) {
                waits.insert(dependent.to_string());
            }
        }
    }

    waits.into_iter().collect()
}

fn baseline_node(name: &str, applied: &AppliedNode) -> ResourceNode {
    ResourceNode {
        id: ResourceId::new(applied.kind, name.to_string()),
        attributes: applied.attributes.clone(),
        depends_on: applied.depends_on.clone(),
    }
}
