//! Workload runtime backends
//!
//! The manager drives workloads only through [`WorkloadRuntime`]:
//! - `PodmanRuntime` executes pods on the node through the podman CLI
//! - `InMemoryRuntime` keeps workloads in memory and records every call, for tests
//!
//! The backend is a type parameter of the manager, chosen once at construction.

mod memory;
mod podman;

pub use memory::{InMemoryRuntime, RuntimeCall, RuntimeOperation};
pub use podman::{PodmanRuntime, PodmanSettings};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

use crate::models::WorkloadInfo;
use crate::pod::Pod;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("unexpected runtime output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("workload not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Rejected(String),
}

/// Lifecycle notification emitted by a runtime
#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadEvent {
    Started { name: String, at: OffsetDateTime },
    Removed { name: String, at: OffsetDateTime },
}

impl WorkloadEvent {
    pub fn started(name: &str) -> Self {
        Self::Started {
            name: name.to_string(),
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn removed(name: &str) -> Self {
        Self::Removed {
            name: name.to_string(),
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Started { name, .. } | Self::Removed { name, .. } => name,
        }
    }
}

pub trait WorkloadObserver: Send + Sync {
    fn on_event(&self, event: &WorkloadEvent);
}

/// Registered observers of one runtime
#[derive(Default, Clone)]
pub struct Observers {
    observers: Vec<Arc<dyn WorkloadObserver>>,
}

impl Observers {
    pub fn register(&mut self, observer: Arc<dyn WorkloadObserver>) {
        self.observers.push(observer);
    }

    pub fn notify(&self, event: WorkloadEvent) {
        debug!("workload event: {:?}", event);
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Capabilities the manager needs from a container runtime
pub trait WorkloadRuntime: Send + 'static {
    /// Prepares the backend; failure aborts manager construction
    fn init(&mut self) -> Result<(), RuntimeError>;

    fn list(&self) -> Result<Vec<WorkloadInfo>, RuntimeError>;

    /// Creates and starts the pod described by the manifest at `manifest_path`
    fn run(&mut self, pod: &Pod, manifest_path: &Path, config_map_paths: &[PathBuf]) -> Result<(), RuntimeError>;

    /// Starts an existing, non-running pod
    fn start(&mut self, pod: &Pod) -> Result<(), RuntimeError>;

    /// Removing an unknown workload succeeds
    fn remove(&mut self, name: &str) -> Result<(), RuntimeError>;

    fn register_observer(&mut self, observer: Arc<dyn WorkloadObserver>);

    /// Saves the runtime's own bookkeeping
    fn persist_configuration(&mut self) -> Result<(), RuntimeError>;

    /// Drops the network table used for workload port mappings
    fn remove_table(&mut self) -> Result<(), RuntimeError>;

    fn remove_mapping_file(&mut self) -> Result<(), RuntimeError>;
}
