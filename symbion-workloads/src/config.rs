use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::monitor::DEFAULT_MONITORING_INTERVAL;
use crate::runtime::PodmanSettings;

pub const CONFIG_ENV_VAR: &str = "SYMBION_WORKLOADS_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "workloads.yaml";

/// Inputs of the workload manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Holds `manifests/` and `volumes/`
    pub data_dir: PathBuf,
    /// Config map every container gets its environment from
    pub config_map_name: String,
    /// File handed to the runtime alongside each manifest
    pub config_map_path: PathBuf,
    /// Initial monitor period, 0 = default (15s)
    pub monitoring_interval_secs: u64,
}

impl ManagerSettings {
    pub fn new<P, Q>(data_dir: P, config_map_name: &str, config_map_path: Q) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            config_map_name: config_map_name.to_string(),
            config_map_path: config_map_path.as_ref().to_path_buf(),
            monitoring_interval_secs: 0,
        }
    }

    pub fn monitoring_interval(&self) -> Duration {
        match self.monitoring_interval_secs {
            0 => DEFAULT_MONITORING_INTERVAL,
            secs => Duration::from_secs(secs),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/local/symbion"),
            config_map_name: "device-config".to_string(),
            config_map_path: PathBuf::from("/var/local/symbion/device-config.yaml"),
            monitoring_interval_secs: 0,
        }
    }
}

/// Agent configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub manager: ManagerSettings,
    pub podman: PodmanSettings,
    /// YAML workload configuration applied at startup
    pub desired_state: Option<PathBuf>,
    /// Tear everything down when the agent is stopped
    pub deregister_on_shutdown: bool,
}

/// Reads the file named by `SYMBION_WORKLOADS_CONFIG`, or `workloads.yaml`
pub async fn load_config() -> AgentConfig {
    let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
    load_config_from(Path::new(&path)).await
}

/// A missing or invalid file falls back to defaults
pub async fn load_config_from(path: &Path) -> AgentConfig {
    if !path.exists() {
        warn!("no {}, using default config", path.display());
        return AgentConfig::default();
    }
    let txt = tokio::fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return AgentConfig::default();
    }
    match serde_yaml::from_str(&txt) {
        Ok(config) => {
            info!("loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("invalid config {}: {}", path.display(), e);
            AgentConfig::default()
        }
    }
}
