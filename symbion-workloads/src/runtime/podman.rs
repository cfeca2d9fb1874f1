//! Podman-backed runtime
//!
//! Pods are created from their manifest with `podman play kube`, so whatever
//! the manifest says is what runs. The runtime keeps a name -> pod id mapping
//! that survives agent restarts through a JSON file in the data directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Observers, RuntimeError, WorkloadEvent, WorkloadObserver, WorkloadRuntime};
use crate::models::{WorkloadInfo, WorkloadStatus};
use crate::pod::Pod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodmanSettings {
    pub binary: PathBuf,
    pub nft_binary: PathBuf,
    /// nftables table (family inet) holding workload port mappings
    pub nft_table: String,
    /// Relative paths are resolved against the data directory
    pub mapping_file: PathBuf,
}

impl Default for PodmanSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("podman"),
            nft_binary: PathBuf::from("nft"),
            nft_table: "edgedevice".to_string(),
            mapping_file: PathBuf::from("workload-mapping.json"),
        }
    }
}

/// Entry of `podman pod ps --format json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PodSummary {
    id: String,
    name: String,
    #[serde(default)]
    status: String,
}

pub struct PodmanRuntime {
    settings: PodmanSettings,
    mapping_path: PathBuf,
    mapping: BTreeMap<String, String>,
    observers: Observers,
}

impl PodmanRuntime {
    pub fn new<P: AsRef<Path>>(settings: PodmanSettings, data_dir: P) -> Self {
        let mapping_path = data_dir.as_ref().join(&settings.mapping_file);
        Self {
            settings,
            mapping_path,
            mapping: BTreeMap::new(),
            observers: Observers::default(),
        }
    }

    pub fn mapping(&self) -> &BTreeMap<String, String> {
        &self.mapping
    }

    fn podman<I, S>(&self, args: I) -> Result<String, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        exec(&self.settings.binary, args)
    }

    fn load_mapping(&mut self) -> Result<(), RuntimeError> {
        match std::fs::read_to_string(&self.mapping_path) {
            Ok(content) if content.trim().is_empty() => Ok(()),
            Ok(content) => {
                self.mapping = serde_json::from_str(&content)?;
                info!("loaded {} workload mappings from {}", self.mapping.len(), self.mapping_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn pod_id(&self, name: &str) -> Result<String, RuntimeError> {
        let output = self.podman(["pod", "inspect", "--format", "{{.Id}}", name])?;
        Ok(output.trim().to_string())
    }
}

impl WorkloadRuntime for PodmanRuntime {
    fn init(&mut self) -> Result<(), RuntimeError> {
        let version = self.podman(["version", "--format", "{{.Client.Version}}"])?;
        info!("using podman {}", version.trim());
        self.load_mapping()
    }

    fn list(&self) -> Result<Vec<WorkloadInfo>, RuntimeError> {
        let output = self.podman(["pod", "ps", "--format", "json"])?;
        parse_pod_list(&output)
    }

    fn run(&mut self, pod: &Pod, manifest_path: &Path, config_map_paths: &[PathBuf]) -> Result<(), RuntimeError> {
        let mut args: Vec<&OsStr> = vec![OsStr::new("play"), OsStr::new("kube")];
        let config_maps = config_map_paths
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(",");
        if !config_maps.is_empty() {
            args.push(OsStr::new("--configmap"));
            args.push(OsStr::new(&config_maps));
        }
        args.push(manifest_path.as_os_str());
        self.podman(args)?;

        match self.pod_id(pod.name()) {
            Ok(id) => {
                self.mapping.insert(pod.name().to_string(), id);
            }
            Err(e) => warn!("pod {} started but its id could not be read: {}", pod.name(), e),
        }
        self.observers.notify(WorkloadEvent::started(pod.name()));
        Ok(())
    }

    fn start(&mut self, pod: &Pod) -> Result<(), RuntimeError> {
        self.podman(["pod", "start", pod.name()])?;
        self.observers.notify(WorkloadEvent::started(pod.name()));
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), RuntimeError> {
        self.podman(["pod", "rm", "--force", "--ignore", name])?;
        if self.mapping.remove(name).is_some() {
            self.observers.notify(WorkloadEvent::removed(name));
        }
        Ok(())
    }

    fn register_observer(&mut self, observer: Arc<dyn WorkloadObserver>) {
        self.observers.register(observer);
    }

    fn persist_configuration(&mut self) -> Result<(), RuntimeError> {
        let content = serde_json::to_string_pretty(&self.mapping)?;
        std::fs::write(&self.mapping_path, content)?;
        debug!("persisted {} workload mappings", self.mapping.len());
        Ok(())
    }

    fn remove_table(&mut self) -> Result<(), RuntimeError> {
        match exec(&self.settings.nft_binary, ["delete", "table", "inet", self.settings.nft_table.as_str()]) {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { ref stderr, .. }) if stderr.contains("No such file or directory") => {
                debug!("table {} already absent", self.settings.nft_table);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn remove_mapping_file(&mut self) -> Result<(), RuntimeError> {
        self.mapping.clear();
        match std::fs::remove_file(&self.mapping_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_pod_list(output: &str) -> Result<Vec<WorkloadInfo>, RuntimeError> {
    if output.trim().is_empty() || output.trim() == "null" {
        return Ok(Vec::new());
    }
    let pods: Vec<PodSummary> = serde_json::from_str(output)?;
    Ok(pods
        .into_iter()
        .map(|p| WorkloadInfo {
            id: p.id,
            name: p.name,
            status: WorkloadStatus::parse(&p.status),
        })
        .collect())
}

/// Runs a command to completion, returning stdout or a `CommandFailed` with stderr
fn exec<I, S>(program: &Path, args: I) -> Result<String, RuntimeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let command = std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("executing: {}", command);

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| RuntimeError::Spawn {
            command: command.clone(),
            source,
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(RuntimeError::CommandFailed {
            command,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pod_list() {
        let output = r#"[
            {"Id": "a1b2", "Name": "app1", "Status": "Running", "Containers": []},
            {"Id": "c3d4", "Name": "app2", "Status": "Exited"}
        ]"#;
        let pods = parse_pod_list(output).unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].name, "app1");
        assert_eq!(pods[0].status, WorkloadStatus::Running);
        assert_eq!(pods[1].status, WorkloadStatus::Exited);
        assert!(parse_pod_list("").unwrap().is_empty());
        assert!(parse_pod_list("null\n").unwrap().is_empty());
    }

    #[test]
    fn test_mapping_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let mut runtime = PodmanRuntime::new(PodmanSettings::default(), tmp.path());
        runtime.mapping.insert("app1".to_string(), "a1b2".to_string());
        runtime.persist_configuration().unwrap();

        let mut restarted = PodmanRuntime::new(PodmanSettings::default(), tmp.path());
        restarted.load_mapping().unwrap();
        assert_eq!(restarted.mapping().get("app1").map(String::as_str), Some("a1b2"));

        restarted.remove_mapping_file().unwrap();
        assert!(!tmp.path().join("workload-mapping.json").exists());
        restarted.remove_mapping_file().unwrap();
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = PodmanSettings {
            binary: tmp.path().join("no-such-podman"),
            ..Default::default()
        };
        let runtime = PodmanRuntime::new(settings, tmp.path());
        assert!(matches!(runtime.list(), Err(RuntimeError::Spawn { .. })));
    }
}
