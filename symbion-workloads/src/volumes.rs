//! Host-path export volumes, one directory per workload under the volumes root

use std::path::{Path, PathBuf};

use crate::pod::{HostPathVolumeSource, Volume};

const EXPORT_VOLUME_PREFIX: &str = "export-";
const DIRECTORY_OR_CREATE: &str = "DirectoryOrCreate";

pub fn host_path_volume_path(volumes_dir: &Path, workload_name: &str) -> PathBuf {
    volumes_dir.join(workload_name)
}

pub fn host_path_volume(volumes_dir: &Path, workload_name: &str) -> Volume {
    Volume {
        name: format!("{}{}", EXPORT_VOLUME_PREFIX, workload_name),
        host_path: Some(HostPathVolumeSource {
            path: host_path_volume_path(volumes_dir, workload_name)
                .to_string_lossy()
                .into_owned(),
            kind: Some(DIRECTORY_OR_CREATE.to_string()),
        }),
        ..Default::default()
    }
}
