//! Pod definitions and their derivation from raw workload specifications
//!
//! A workload's `specification` is a pod spec in YAML. Deriving the pod names
//! it after the workload, adds the workload's export volume, and binds every
//! container to that volume and to the device config map. The result is what
//! gets written as the workload's manifest, so serialization has to produce
//! the same bytes for the same input: fields keep declaration order and every
//! map is a `BTreeMap`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::WorkloadError;
use crate::models::WorkloadSpec;
use crate::volumes;

/// Where every container sees its export volume
pub const EXPORT_MOUNT_PATH: &str = "/export";

const POD_API_VERSION: &str = "v1";
const POD_KIND: &str = "Pod";

/// Settings the agent does not interpret, kept verbatim
pub type Extra = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostPathVolumeSource {
    pub path: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<ConfigMapEnvSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapEnvSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl EnvFromSource {
    pub fn config_map(name: &str) -> Self {
        Self {
            config_map_ref: Some(ConfigMapEnvSource {
                name: name.to_string(),
                optional: None,
            }),
            ..Default::default()
        }
    }
}

impl Pod {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>, serde_yaml::Error> {
        serde_yaml::to_string(self).map(String::into_bytes)
    }

    pub fn from_yaml(bytes: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(bytes)
    }
}

/// Turns a workload specification into the pod the runtime will execute
pub fn derive_pod(
    workload: &WorkloadSpec,
    volumes_dir: &Path,
    config_map_name: &str,
) -> Result<Pod, WorkloadError> {
    let spec: PodSpec = serde_yaml::from_str(&workload.specification)
        .map_err(|e| WorkloadError::conversion(&workload.name, e))?;

    let mut pod = Pod {
        api_version: POD_API_VERSION.to_string(),
        kind: POD_KIND.to_string(),
        metadata: ObjectMeta {
            name: workload.name.clone(),
            ..Default::default()
        },
        spec,
    };

    let export_volume = volumes::host_path_volume(volumes_dir, &workload.name);
    for container in &mut pod.spec.containers {
        container.volume_mounts.push(VolumeMount {
            name: export_volume.name.clone(),
            mount_path: EXPORT_MOUNT_PATH.to_string(),
            ..Default::default()
        });
        container.env_from.push(EnvFromSource::config_map(config_map_name));
    }
    pod.spec.volumes.push(export_volume);

    Ok(pod)
}
