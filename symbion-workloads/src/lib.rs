//! Symbion Workloads - node-local reconciler for containerized edge workloads
//!
//! Receives desired-state snapshots from the control plane and keeps the pods
//! running on the node in line with them:
//! - Desired workloads become pod manifests stored on disk
//! - A periodic monitor restarts, re-runs or removes pods to match the manifests
//! - Deregistration tears down every trace of managed workloads

pub mod config;
pub mod error;
pub mod manager;
pub mod manifests;
pub mod models;
pub mod monitor;
pub mod pod;
pub mod runtime;
pub mod state;
pub mod volumes;

pub use config::{load_config, AgentConfig, ManagerSettings};
pub use error::{AggregateError, WorkloadError};
pub use manager::WorkloadManager;
pub use models::{WorkloadConfiguration, WorkloadInfo, WorkloadSpec, WorkloadStatus};
pub use runtime::{
    InMemoryRuntime, PodmanRuntime, RuntimeError, WorkloadEvent, WorkloadObserver, WorkloadRuntime,
};
