/// Convergence executor: applies a changeset against live infrastructure
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::graph::ResourceId;
use crate::plan::{ChangeAction, ChangeOp, Changeset};
use crate::provider::{Provider, ProviderError};
use crate::state::AppliedState;
use crate::utils::RetryConfig;

/// Execution limits for one apply pass
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum ops in flight at once; kept small to respect provider
    /// rate limits
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryConfig::default(),
        }
    }
}

/// One op that could not be applied, with its terminal cause
#[derive(Debug)]
pub struct OpFailure {
    pub id: ResourceId,
    pub action: ChangeAction,
    pub cause: ProviderError,
}

/// Partial convergence: some ops succeeded, some did not.
///
/// `partial` reflects every op that did succeed and is always safe to
/// persist; `skipped` ops were never attempted because something upstream
/// of them failed or the run was cancelled.
#[derive(Debug, Error)]
#[error("convergence incomplete: {} applied, {} failed, {} skipped", succeeded.len(), failed.len(), skipped.len())]
pub struct ConvergenceError {
    pub partial: AppliedState,
    pub succeeded: Vec<ResourceId>,
    pub failed: Vec<OpFailure>,
    pub skipped: Vec<ResourceId>,
    pub cancelled: bool,
}

/// Shared cancellation flag. Once set, no new op starts; ops already in
/// flight run to completion so no single resource is left half-applied.
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

enum OpOutcome {
    /// Create/update/replace succeeded; the node now exists under this id
    Applied { provider_id: String },
    /// Delete succeeded
    Removed,
}

/// Applies changesets with bounded concurrency, dependency ordering,
/// retry on transient provider errors, and best-effort partial results
pub struct Executor {
    provider: Arc<dyn Provider>,
    config: ExecutorConfig,
    cancel: CancelSignal,
}

impl Executor {
    pub fn new(provider: Arc<dyn Provider>, config: ExecutorConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancelSignal::new(),
        }
    }

    /// Handle for wiring an external interrupt (e.g. ctrl-c) to this executor
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Apply `changeset` on top of `baseline`.
    ///
    /// Ops related by a `waits_on` edge never run concurrently; an op only
    /// launches once every op it waits on has succeeded. Each success
    /// updates the in-memory state immediately so dependents can proceed
    /// without waiting for the whole batch.
    pub async fn apply(
        &self,
        changeset: &Changeset,
        baseline: &AppliedState,
    ) -> Result<AppliedState, ConvergenceError> {
        let mut state = baseline.clone();

        let index: BTreeMap<&str, usize> = changeset
            .iter()
            .enumerate()
            .map(|(idx, op)| (op.name(), idx))
            .collect();

        let mut status = vec![OpStatus::Pending; changeset.len()];
        let mut failed: Vec<OpFailure> = Vec::new();
        let mut in_flight: FuturesUnordered<
            BoxFuture<'static, (usize, Result<OpOutcome, ProviderError>)>,
        > = FuturesUnordered::new();

        loop {
            propagate_skips(changeset, &index, &mut status);

            if !self.cancel.is_cancelled() {
                for (idx, op) in changeset.iter().enumerate() {
                    if in_flight.len() >= self.config.concurrency {
                        break;
                    }
                    if status[idx] != OpStatus::Pending || !is_ready(op, &index, &status) {
                        continue;
                    }

                    status[idx] = OpStatus::Running;
                    info!("Applying: {} {}", op.action, op.node.id);

                    let provider = self.provider.clone();
                    let retry = self.config.retry.clone();
                    let op = op.clone();
                    let provider_id = state.get(op.name()).map(|n| n.provider_id.clone());
                    in_flight.push(Box::pin(async move {
                        let result = execute_op(provider.as_ref(), &retry, &op, provider_id).await;
                        (idx, result)
                    }));
                }
            }

            let (idx, result) = match in_flight.next().await {
                Some(completed) => completed,
                None => break,
            };

            let op = &changeset.ops[idx];
            match result {
                Ok(OpOutcome::Applied { provider_id }) => {
                    status[idx] = OpStatus::Done;
                    state.record_applied(&op.node, provider_id);
                    info!("✓ {} {}", op.action, op.node.id);
                }
                Ok(OpOutcome::Removed) => {
                    status[idx] = OpStatus::Done;
                    state.remove(op.name());
                    info!("✓ {} {}", op.action, op.node.id);
                }
                Err(cause) => {
                    status[idx] = OpStatus::Failed;
                    warn!("✗ {} {} failed: {}", op.action, op.node.id, cause);
                    failed.push(OpFailure {
                        id: op.node.id.clone(),
                        action: op.action,
                        cause,
                    });
                }
            }
        }

        // Ops never started because of cancellation count as skipped
        for slot in status.iter_mut() {
            if *slot == OpStatus::Pending {
                *slot = OpStatus::Skipped;
            }
        }

        let ids_with = |wanted: OpStatus| -> Vec<ResourceId> {
            status
                .iter()
                .zip(changeset.iter())
                .filter(|(s, _)| **s == wanted)
                .map(|(_, op)| op.node.id.clone())
                .collect()
        };

        let succeeded = ids_with(OpStatus::Done);
        let skipped = ids_with(OpStatus::Skipped);

        if failed.is_empty() && skipped.is_empty() {
            state.applied_at = Utc::now();
            Ok(state)
        } else {
            Err(ConvergenceError {
                partial: state,
                succeeded,
                failed,
                skipped,
                cancelled: self.cancel.is_cancelled(),
            })
        }
    }
}

fn is_ready(op: &ChangeOp, index: &BTreeMap<&str, usize>, status: &[OpStatus]) -> bool {
    op.waits_on
        .iter()
        .all(|upstream| status[index[upstream.as_str()]] == OpStatus::Done)
}

/// Mark every op transitively blocked by a failed or skipped op as skipped.
/// Reverse edges mean skips can flow toward earlier changeset positions,
/// so iterate to a fixed point.
fn propagate_skips(changeset: &Changeset, index: &BTreeMap<&str, usize>, status: &mut [OpStatus]) {
    loop {
        let mut changed = false;
        for (idx, op) in changeset.iter().enumerate() {
            if status[idx] != OpStatus::Pending {
                continue;
            }
            let blocked = op.waits_on.iter().any(|upstream| {
                matches!(
                    status[index[upstream.as_str()]],
                    OpStatus::Failed | OpStatus::Skipped
                )
            });
            if blocked {
                status[idx] = OpStatus::Skipped;
                warn!("Skipping {} {}: upstream change failed", op.action, op.node.id);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

async fn execute_op(
    provider: &dyn Provider,
    retry: &RetryConfig,
    op: &ChangeOp,
    provider_id: Option<String>,
) -> Result<OpOutcome, ProviderError> {
    let describe = |verb: &str| format!("{} {}", verb, op.node.id);

    let recorded_id = |id: Option<String>| {
        id.ok_or_else(|| {
            ProviderError::Permanent(format!("no provider id recorded for {}", op.node.id))
        })
    };

    match op.action {
        ChangeAction::Create => {
            let provider_id = retry
                .run(&describe("create"), || {
                    provider.create(&op.node.id, &op.node.attributes)
                })
                .await?;
            Ok(OpOutcome::Applied { provider_id })
        }
        ChangeAction::Update => {
            let provider_id = recorded_id(provider_id)?;
            retry
                .run(&describe("update"), || {
                    provider.update(&provider_id, &op.node.attributes)
                })
                .await?;
            Ok(OpOutcome::Applied { provider_id })
        }
        ChangeAction::Replace => {
            let old_id = recorded_id(provider_id)?;
            match retry
                .run(&describe("delete (replace)"), || provider.delete(&old_id))
                .await
            {
                Ok(()) | Err(ProviderError::NotFound) => {}
                Err(e) => return Err(e),
            }
            let provider_id = retry
                .run(&describe("create (replace)"), || {
                    provider.create(&op.node.id, &op.node.attributes)
                })
                .await?;
            Ok(OpOutcome::Applied { provider_id })
        }
        ChangeAction::Delete => {
            let provider_id = recorded_id(provider_id)?;
            match retry
                .run(&describe("delete"), || provider.delete(&provider_id))
                .await
            {
                // Already gone on the provider side: converged regardless
                Ok(()) | Err(ProviderError::NotFound) => Ok(OpOutcome::Removed),
                Err(e) => Err(e),
            }
        }
    }
}
