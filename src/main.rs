/// Converge - Declarative Cluster Topology Reconciler
///
/// A Rust-based tool for converging cloud cluster topologies (network,
/// cluster, node groups, addons) to a declared state, with drift detection
/// and durable applied-state tracking.
mod apply;
mod config;
mod drift;
mod graph;
mod plan;
mod provider;
mod state;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::apply::{ConvergenceError, Executor, ExecutorConfig};
use crate::config::TopologyConfig;
use crate::drift::{DriftDetector, DriftFinding};
use crate::plan::{diff, Changeset};
use crate::provider::HttpProvider;
use crate::state::{AppliedState, StateStore};

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Converge cloud cluster topologies to a declared state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Declaration file path
    #[arg(short, long, default_value = "topology.yaml")]
    config: PathBuf,

    /// State file path
    #[arg(short, long, default_value = "converge.state.json")]
    state: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes an apply would make, without mutating anything
    Plan,

    /// Diff the declaration against the baseline and converge live infrastructure
    Apply {
        /// Maximum provider operations in flight at once
        #[arg(long, default_value_t = 5)]
        concurrency: usize,
    },

    /// Scan live infrastructure for drift from the applied state
    Drift,

    /// Generate an example declaration file
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("converge={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Execute command
    let result = match cli.command {
        Commands::Plan => plan_topology(&cli).await,
        Commands::Apply { concurrency } => apply_topology(&cli, concurrency).await,
        Commands::Drift => scan_drift(&cli).await,
        Commands::Init => init_config(&cli).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Diff only: show pending changes without touching live infrastructure
async fn plan_topology(cli: &Cli) -> Result<i32> {
    let config = TopologyConfig::from_file(&cli.config).context("Failed to load declaration")?;
    let graph = config.to_graph()?;

    info!("Topology: {}", config.name);

    let store = StateStore::new(&cli.state);
    let baseline = store.load().await?.unwrap_or_else(AppliedState::empty);

    let changeset = diff(&graph, &baseline);
    if changeset.is_empty() {
        info!("No changes. Live state matches the declaration.");
        return Ok(0);
    }

    print_changeset(&changeset);
    Ok(0)
}

/// Diff then converge, persisting the applied state afterwards
async fn apply_topology(cli: &Cli, concurrency: usize) -> Result<i32> {
    let config = TopologyConfig::from_file(&cli.config).context("Failed to load declaration")?;
    let graph = config.to_graph()?;

    info!("Topology: {}", config.name);

    let store = StateStore::new(&cli.state);
    let baseline = store.load().await?.unwrap_or_else(AppliedState::empty);

    let changeset = diff(&graph, &baseline);
    if changeset.is_empty() {
        info!("No changes. Live state matches the declaration.");
        return Ok(0);
    }

    print_changeset(&changeset);

    let provider = Arc::new(
        HttpProvider::new(&config.api_endpoint()?, &config.api_token()?)
            .context("Failed to create provider client")?,
    );
    let executor = Executor::new(
        provider,
        ExecutorConfig {
            concurrency,
            ..ExecutorConfig::default()
        },
    );

    // Let in-flight ops finish on ctrl-c, but start nothing new
    let cancel = executor.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received: finishing in-flight operations, starting nothing new");
            cancel.cancel();
        }
    });

    match executor.apply(&changeset, &baseline).await {
        Ok(state) => {
            store.save(&state).await?;
            info!("✓ Converged {} change(s) successfully", changeset.len());
            info!("State written to {}", store.path().display());
            Ok(0)
        }
        Err(err) => {
            report_partial_convergence(&err);

            // Progress must not be lost even on a failed pass
            if let Err(persist_err) = store.save(&err.partial).await {
                error!("Failed to persist partial state: {}", persist_err);
                error!(
                    "Resources currently applied: {}",
                    err.partial
                        .nodes
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            } else {
                info!("Partial state written to {}", store.path().display());
            }

            Ok(2)
        }
    }
}

/// Read-only scan of live infrastructure against the applied baseline
async fn scan_drift(cli: &Cli) -> Result<i32> {
    let config = TopologyConfig::from_file(&cli.config).context("Failed to load declaration")?;
    let graph = config.to_graph()?;

    let store = StateStore::new(&cli.state);
    let baseline = match store.load().await? {
        Some(baseline) => baseline,
        None => {
            info!("No state file yet, nothing to scan");
            return Ok(0);
        }
    };

    let provider = Arc::new(
        HttpProvider::new(&config.api_endpoint()?, &config.api_token()?)
            .context("Failed to create provider client")?,
    );
    let detector = DriftDetector::new(provider);

    let records = detector
        .scan(&graph, &baseline)
        .await
        .context("Drift scan aborted")?;

    if records.is_empty() {
        info!(
            "No drift detected across {} resource(s)",
            baseline.nodes.len()
        );
        return Ok(0);
    }

    warn!("Drift detected in {} resource(s):", records.len());
    for record in &records {
        match &record.finding {
            DriftFinding::Missing => {
                warn!("  missing: {} (deleted outside of converge)", record.id);
            }
            DriftFinding::Diverged { severity, deltas } => {
                warn!("  diverged ({}): {}", severity, record.id);
                for delta in deltas {
                    info!(
                        "    {}: expected {}, observed {}",
                        delta.key,
                        delta
                            .expected
                            .as_ref()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "<unset>".to_string()),
                        delta
                            .observed
                            .as_ref()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "<unset>".to_string()),
                    );
                }
            }
        }
    }

    Ok(0)
}

/// Initialize an example declaration file
async fn init_config(cli: &Cli) -> Result<i32> {
    if cli.config.exists() {
        anyhow::bail!(
            "Declaration file already exists: {}",
            cli.config.display()
        );
    }

    let example = TopologyConfig::example();
    let yaml = serde_yaml::to_string(&example)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write declaration file")?;

    info!("Example declaration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the declaration to match your topology");
    info!("  2. Set your provider endpoint and API token:");
    info!("     export CONVERGE_API_ENDPOINT=https://your-provider/v1");
    info!("     export CONVERGE_API_TOKEN=your-token-here");
    info!("  3. Preview the changes:");
    info!("     converge plan");
    info!("  4. Converge the topology:");
    info!("     converge apply");

    Ok(0)
}

fn print_changeset(changeset: &Changeset) {
    info!("Planned changes:");
    for op in changeset.iter() {
        if op.waits_on.is_empty() {
            info!("  {}", op);
        } else {
            info!("  {} (after {})", op, op.waits_on.join(", "));
        }
    }
    info!("{} change(s) total", changeset.len());
}

/// A failed apply must say exactly what converged, failed, and was skipped
fn report_partial_convergence(err: &ConvergenceError) {
    if err.cancelled {
        warn!("Apply was cancelled before completion");
    }
    error!("Apply did not fully converge: {}", err);
    for id in &err.succeeded {
        info!("  converged: {}", id);
    }
    for failure in &err.failed {
        error!("  failed: {} {} - {}", failure.action, failure.id, failure.cause);
    }
    for id in &err.skipped {
        warn!("  skipped (upstream failure): {}", id);
    }
}
