//! Workload manager: converges the node's running workloads to the desired set
//!
//! Three sequences mutate state, and all of them run under one management
//! lock from start to finish:
//! - `update`: apply a full desired-state snapshot pushed by the control plane
//! - the monitor pass: restore what the manifests on disk describe
//! - `deregister`: terminal teardown
//!
//! Manifests are the durable record of what should run. A failed `run` during
//! `update` still leaves its manifest behind, and the next monitor pass picks
//! it up; that is the only retry path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::ManagerSettings;
use crate::error::{AggregateError, WorkloadError};
use crate::manifests::ManifestStore;
use crate::models::{is_valid_workload_name, WorkloadConfiguration, WorkloadInfo, WorkloadSpec, WorkloadStatus};
use crate::monitor::WorkloadMonitor;
use crate::pod::{self, Pod};
use crate::runtime::{WorkloadObserver, WorkloadRuntime};
use crate::state::{new_state, ManagedState, Shared};
use crate::volumes;

/// Part of the manager shared with the monitor task
struct Reconciler<R> {
    state: Shared<ManagedState<R>>,
    volumes_dir: PathBuf,
    config_map_name: String,
    config_map_path: PathBuf,
}

pub struct WorkloadManager<R: WorkloadRuntime> {
    core: Arc<Reconciler<R>>,
    monitor: WorkloadMonitor,
}

impl<R: WorkloadRuntime> WorkloadManager<R> {
    /// Creates the data directories, initializes the runtime and schedules
    /// the monitor. Fails outside a Tokio runtime.
    pub fn new(settings: &ManagerSettings, mut runtime: R) -> Result<Self, WorkloadError> {
        let handle = Handle::try_current()?;

        let manifests_dir = settings.data_dir.join("manifests");
        let manifests = ManifestStore::open(&manifests_dir).map_err(|e| {
            WorkloadError::persistence(format!("cannot create directory {}", manifests_dir.display()), e)
        })?;
        let volumes_dir = settings.data_dir.join("volumes");
        fs::create_dir_all(&volumes_dir).map_err(|e| {
            WorkloadError::persistence(format!("cannot create directory {}", volumes_dir.display()), e)
        })?;

        runtime
            .init()
            .map_err(|e| WorkloadError::runtime("cannot initialize workload runtime", e))?;

        let core = Arc::new(Reconciler {
            state: new_state(ManagedState {
                manifests,
                runtime,
                deregistered: false,
            }),
            volumes_dir,
            config_map_name: settings.config_map_name.clone(),
            config_map_path: settings.config_map_path.clone(),
        });

        let tick_core = core.clone();
        let monitor = WorkloadMonitor::spawn(&handle, settings.monitoring_interval(), move || {
            if let Err(e) = tick_core.ensure_workloads_running() {
                error!("workload monitoring pass failed: {}", e);
            }
        });

        Ok(Self { core, monitor })
    }

    pub fn list_workloads(&self) -> Result<Vec<WorkloadInfo>, WorkloadError> {
        let state = self.core.state.lock();
        state
            .runtime
            .list()
            .map_err(|e| WorkloadError::runtime("cannot list workloads", e))
    }

    pub fn get_exported_host_path(&self, workload_name: &str) -> PathBuf {
        volumes::host_path_volume_path(&self.core.volumes_dir, workload_name)
    }

    pub fn register_observer(&self, observer: Arc<dyn WorkloadObserver>) {
        self.core.state.lock().runtime.register_observer(observer);
    }

    pub fn monitoring_interval(&self) -> Duration {
        self.monitor.period()
    }

    pub fn is_deregistered(&self) -> bool {
        self.core.state.lock().deregistered
    }

    /// Runs one self-healing pass now, the same one the monitor runs
    pub fn reconcile_from_manifests(&self) -> Result<(), WorkloadError> {
        self.core.ensure_workloads_running()
    }

    /// Applies a desired-state snapshot
    ///
    /// Every workload is attempted; failures are collected and returned
    /// together. Workloads whose manifest is byte-identical to the new one are
    /// left alone. Live workloads missing from the snapshot are removed along
    /// with their manifest, and so is any other manifest the snapshot no
    /// longer backs.
    pub fn update(&self, configuration: &WorkloadConfiguration) -> Result<(), AggregateError> {
        let mut state = self.core.state.lock();
        if state.deregistered {
            info!("deregistration was finished, no need to update anymore");
            return Ok(());
        }

        let mut errors = AggregateError::new();
        let config_map_paths = self.core.config_map_paths();
        let mut configured: HashSet<&str> = HashSet::new();

        for workload in &configuration.workloads {
            debug!("deploying workload: {}", workload.name);
            configured.insert(workload.name.as_str());

            if let Err(e) = self.core.deploy(&mut state, workload, &config_map_paths) {
                error!("{}", e);
                errors.push(e);
            }
        }

        match state.runtime.list() {
            Ok(live) => {
                for workload in live.iter().filter(|w| !configured.contains(w.name.as_str())) {
                    info!("workload {} not configured anymore, removing", workload.name);
                    if let Err(e) = state.manifests.delete(&workload.name) {
                        errors.push(WorkloadError::persistence(
                            format!("cannot remove manifest of stale workload '{}'", workload.name),
                            e,
                        ));
                    }
                    match state.runtime.remove(&workload.name) {
                        Ok(()) => info!("workload {} removed", workload.name),
                        Err(e) => {
                            error!("cannot remove stale workload {}: {}", workload.name, e);
                            errors.push(WorkloadError::runtime(
                                format!("cannot remove stale workload '{}'", workload.name),
                                e,
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                error!("cannot get deployed workloads: {}", e);
                errors.push(WorkloadError::runtime("cannot get deployed workloads", e));
            }
        }

        // manifests of workloads that never came up are not in the live set
        let configured_paths: HashSet<PathBuf> =
            configured.iter().map(|name| state.manifests.path_for(name)).collect();
        match state.manifests.list_all() {
            Ok(entries) => {
                for entry in entries.iter().filter(|e| !configured_paths.contains(&e.path)) {
                    info!("manifest {} not configured anymore, deleting", entry.path.display());
                    if let Err(e) = state.manifests.delete_entry(entry) {
                        error!("cannot delete manifest {}: {}", entry.path.display(), e);
                        errors.push(WorkloadError::persistence(
                            format!("cannot delete stale manifest {}", entry.path.display()),
                            e,
                        ));
                    }
                }
            }
            Err(e) => {
                error!("cannot read manifests directory: {}", e);
                errors.push(WorkloadError::persistence("cannot read manifests directory", e));
            }
        }

        if configuration.monitoring_interval_seconds > 0 {
            self.monitor
                .reset(Duration::from_secs(configuration.monitoring_interval_seconds));
        }

        errors.into_result()
    }

    /// Tears down everything the manager owns; the manager ignores updates afterwards
    ///
    /// Workload removal stops at the first failure. Every later step runs
    /// regardless of earlier failures.
    pub fn deregister(&self) -> Result<(), AggregateError> {
        let mut state = self.core.state.lock();
        if state.deregistered {
            info!("already deregistered");
            return Ok(());
        }

        let mut errors = AggregateError::new();

        if let Err(e) = remove_all_workloads(&mut state.runtime) {
            error!("failed to remove workloads: {}", e);
            errors.push(e);
        }

        info!("deleting manifests directory");
        if let Err(e) = state.manifests.remove_all() {
            error!("failed to delete manifests directory: {}", e);
            errors.push(WorkloadError::persistence("failed to delete manifests directory", e));
        }

        info!("deleting nftable");
        if let Err(e) = state.runtime.remove_table() {
            error!("failed to delete table: {}", e);
            errors.push(WorkloadError::runtime("failed to delete table", e));
        }

        info!("deleting volumes directory");
        if let Err(e) = remove_dir_if_exists(&self.core.volumes_dir) {
            error!("failed to delete volumes directory: {}", e);
            errors.push(WorkloadError::persistence("failed to delete volumes directory", e));
        }

        info!("stopping workload monitor");
        self.monitor.cancel();

        info!("deleting mapping file");
        if let Err(e) = state.runtime.remove_mapping_file() {
            error!("failed to remove mapping file: {}", e);
            errors.push(WorkloadError::runtime("failed to remove mapping file", e));
        }

        state.deregistered = true;
        errors.into_result()
    }
}

impl<R: WorkloadRuntime> Reconciler<R> {
    fn config_map_paths(&self) -> Vec<PathBuf> {
        vec![self.config_map_path.clone()]
    }

    /// Writes the workload's manifest and (re)runs it, unless unchanged
    fn deploy(
        &self,
        state: &mut ManagedState<R>,
        workload: &WorkloadSpec,
        config_map_paths: &[PathBuf],
    ) -> Result<(), WorkloadError> {
        if !is_valid_workload_name(&workload.name) {
            return Err(WorkloadError::invalid_name(&workload.name));
        }
        let pod = pod::derive_pod(workload, &self.volumes_dir, &self.config_map_name)?;
        let pod_yaml = pod
            .to_yaml()
            .map_err(|e| WorkloadError::conversion(&workload.name, e))?;

        if !state.manifests.is_modified(&workload.name, &pod_yaml) {
            debug!(
                "pod '{}' definition is unchanged ({})",
                workload.name,
                state.manifests.path_for(&workload.name).display()
            );
            return Ok(());
        }

        let manifest_path = state.manifests.write(&workload.name, &pod_yaml).map_err(|e| {
            WorkloadError::persistence(format!("cannot store manifest for workload '{}'", workload.name), e)
        })?;

        state.runtime.remove(&workload.name).map_err(|e| {
            WorkloadError::runtime(format!("error removing workload '{}'", workload.name), e)
        })?;

        state
            .runtime
            .run(&pod, &manifest_path, config_map_paths)
            .map_err(|e| WorkloadError::runtime(format!("cannot run workload '{}'", workload.name), e))?;

        info!("workload {} deployed from {}", workload.name, manifest_path.display());
        Ok(())
    }

    /// One self-healing pass: manifests on disk are the desired set
    fn ensure_workloads_running(&self) -> Result<(), WorkloadError> {
        let mut state = self.state.lock();
        if state.deregistered {
            debug!("deregistered, skipping workload monitoring pass");
            return Ok(());
        }

        let live: HashMap<String, WorkloadInfo> = state
            .runtime
            .list()
            .map_err(|e| WorkloadError::runtime("cannot get deployed workloads", e))?
            .into_iter()
            .map(|w| (w.name.clone(), w))
            .collect();

        let entries = state
            .manifests
            .list_all()
            .map_err(|e| WorkloadError::persistence("cannot read manifests directory", e))?;
        let mut desired: BTreeMap<String, (Pod, PathBuf)> = BTreeMap::new();
        for entry in entries {
            match Pod::from_yaml(&entry.content) {
                Ok(pod) => {
                    desired.insert(pod.name().to_string(), (pod, entry.path));
                }
                Err(e) => error!("cannot parse manifest {}: {}", entry.path.display(), e),
            }
        }

        for name in live.keys().filter(|name| !desired.contains_key(*name)) {
            info!("workload {} has no manifest, removing", name);
            if let Err(e) = state.runtime.remove(name) {
                error!("failed to remove workload {}: {}", name, e);
            }
        }

        let config_map_paths = self.config_map_paths();
        for (name, (pod, manifest_path)) in &desired {
            match live.get(name) {
                Some(workload) if workload.status == WorkloadStatus::Running => {}
                Some(workload) => {
                    info!("workload {} is {}, starting", name, workload.status);
                    if let Err(e) = state.runtime.start(pod) {
                        error!("failed to start workload {}: {}", name, e);
                    }
                }
                None => {
                    info!("workload {} is not deployed, running it", name);
                    if let Err(e) = state.runtime.run(pod, manifest_path, &config_map_paths) {
                        error!(
                            "failed to run workload {} (manifest: {}): {}",
                            name,
                            manifest_path.display(),
                            e
                        );
                    }
                }
            }
        }

        if let Err(e) = state.runtime.persist_configuration() {
            warn!("failed to persist workload configuration: {}", e);
        }
        Ok(())
    }
}

/// Removes every live workload, stopping at the first failure
fn remove_all_workloads<R: WorkloadRuntime>(runtime: &mut R) -> Result<(), WorkloadError> {
    info!("removing all workloads");
    let workloads = runtime
        .list()
        .map_err(|e| WorkloadError::runtime("failed to list workloads", e))?;
    for workload in workloads {
        info!("removing workload {}", workload.name);
        runtime.remove(&workload.name).map_err(|e| {
            WorkloadError::runtime(format!("failed to remove workload '{}'", workload.name), e)
        })?;
    }
    Ok(())
}

fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
