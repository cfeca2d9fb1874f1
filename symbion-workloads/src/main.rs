//! Symbion Workloads agent
//!
//! Runs the workload manager on top of podman until interrupted.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use symbion_workloads::{
    load_config, PodmanRuntime, WorkloadConfiguration, WorkloadEvent, WorkloadManager, WorkloadObserver,
    WorkloadRuntime,
};

/// Logs every lifecycle event reported by the runtime
struct EventLogger;

impl WorkloadObserver for EventLogger {
    fn on_event(&self, event: &WorkloadEvent) {
        match event {
            WorkloadEvent::Started { name, at } => info!("workload {} started at {}", name, at),
            WorkloadEvent::Removed { name, at } => info!("workload {} removed at {}", name, at),
        }
    }
}

async fn read_desired_state(path: &Path) -> Result<WorkloadConfiguration> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read desired state {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Invalid desired state {}", path.display()))
}

/// Reads a desired-state file and applies it; per-workload failures are logged
///
/// `update` does blocking runtime I/O under the management lock, hence
/// `block_in_place` (multi-threaded runtime only).
async fn apply_desired_state<R: WorkloadRuntime>(manager: &WorkloadManager<R>, path: &Path) -> Result<usize> {
    let desired = read_desired_state(path).await?;
    match task::block_in_place(|| manager.update(&desired)) {
        Ok(()) => info!("applied {} workloads from {}", desired.workloads.len(), path.display()),
        Err(errors) => {
            for e in errors.iter() {
                error!("{}", e);
            }
            warn!("desired state applied with {} errors", errors.len());
        }
    }
    Ok(desired.workloads.len())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("symbion_workloads=info")),
        )
        .init();

    info!("Symbion Workloads starting...");

    let config = load_config().await;
    let runtime = PodmanRuntime::new(config.podman.clone(), &config.manager.data_dir);
    let manager = WorkloadManager::new(&config.manager, runtime).context("Failed to create workload manager")?;
    manager.register_observer(Arc::new(EventLogger));

    if let Some(path) = &config.desired_state {
        if let Err(e) = apply_desired_state(&manager, path).await {
            error!("{:#}", e);
        }
    }

    info!("monitoring workloads every {:?}", manager.monitoring_interval());
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");

    if config.deregister_on_shutdown {
        task::block_in_place(|| manager.deregister()).context("Deregistration finished with errors")?;
        info!("deregistered, all workloads removed");
    }

    Ok(())
}
