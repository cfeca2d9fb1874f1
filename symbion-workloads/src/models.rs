use serde::{Deserialize, Serialize};
use std::fmt;

/// Desired workload as pushed by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub name: String,
    /// Pod spec as YAML text
    pub specification: String,
}

/// A name becomes a file under `manifests/` and a directory under `volumes/`,
/// so it must stay a single path component
pub fn is_valid_workload_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

/// One full desired-state snapshot; supersedes the previous one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadConfiguration {
    #[serde(default)]
    pub workloads: Vec<WorkloadSpec>,
    /// 0 keeps the current monitor period
    #[serde(default)]
    pub monitoring_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadStatus {
    Running,
    Created,
    Stopped,
    Exited,
    Degraded,
    Unknown,
}

impl WorkloadStatus {
    /// Maps a runtime-reported status string, case-insensitively
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "created" => Self::Created,
            "stopped" => Self::Stopped,
            "exited" => Self::Exited,
            "degraded" => Self::Degraded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Running => "Running",
            Self::Created => "Created",
            Self::Stopped => "Stopped",
            Self::Exited => "Exited",
            Self::Degraded => "Degraded",
            Self::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Live workload as reported by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub id: String,
    pub name: String,
    pub status: WorkloadStatus,
}
