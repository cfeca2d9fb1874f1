//! Manifest store: one YAML file per workload in a dedicated directory
//!
//! A manifest's existence is what makes a workload "desired"; the monitor
//! rebuilds its view of the desired set from this directory alone.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::models::is_valid_workload_name;

const MANIFEST_EXTENSION: &str = "yaml";

/// A manifest file as found on disk
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    /// File stem, i.e. the sanitized workload name
    pub name: String,
    pub content: Vec<u8>,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    /// Opens the store, creating its directory if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name is the workload name with spaces turned into hyphens
    pub fn path_for(&self, workload_name: &str) -> PathBuf {
        let file_name = format!("{}.{}", workload_name.replace(' ', "-"), MANIFEST_EXTENSION);
        self.dir.join(file_name)
    }

    /// Like `path_for`, refusing names that would leave the store directory
    fn checked_path(&self, workload_name: &str) -> std::io::Result<PathBuf> {
        if !is_valid_workload_name(workload_name) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid workload name '{}'", workload_name),
            ));
        }
        Ok(self.path_for(workload_name))
    }

    pub fn write(&self, workload_name: &str, content: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.checked_path(workload_name)?;
        fs::write(&path, content)?;
        restrict_permissions(&path)?;
        Ok(path)
    }

    /// `Ok(None)` when no manifest exists for the workload
    pub fn read(&self, workload_name: &str) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(self.checked_path(workload_name)?) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True when the stored manifest differs from `content` or cannot be read
    pub fn is_modified(&self, workload_name: &str, content: &[u8]) -> bool {
        match self.read(workload_name) {
            Ok(Some(stored)) => stored != content,
            _ => true,
        }
    }

    /// Deleting an absent manifest is not an error
    pub fn delete(&self, workload_name: &str) -> std::io::Result<()> {
        match fs::remove_file(self.checked_path(workload_name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Deletes a file found by `list_all`; absent is fine
    pub fn delete_entry(&self, entry: &ManifestEntry) -> std::io::Result<()> {
        match fs::remove_file(&entry.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reads every manifest; unreadable files are logged and skipped
    pub fn list_all(&self) -> std::io::Result<Vec<ManifestEntry>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some(MANIFEST_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match fs::read(&path) {
                Ok(content) => entries.push(ManifestEntry { name, content, path }),
                Err(e) => error!("cannot read manifest {}: {}", path.display(), e),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("found {} manifests in {}", entries.len(), self.dir.display());
        Ok(entries)
    }

    /// Deletes the directory and everything under it; absent is fine
    pub fn remove_all(&self) -> std::io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o640))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
