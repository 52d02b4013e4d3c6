//! WF-012: Mount devices backed by host directories.
//!
//! The object-store device namespaces every site under its own directory
//! below a common root; a local-fs device is a directory the user granted
//! for one site and registered in the handle registry.

use crate::core::error::{ProvisionError, Result};
use crate::core::state;
use crate::core::types::{FileTree, MountDevice};
use crate::runtime::host::{read_host_tree, remove_host_files, write_host_tree};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File whose presence at the device root marks an installed site.
pub const INSTALLATION_MARKER: &str = "wp-config.php";

/// Access to mount devices.
#[async_trait]
pub trait DeviceAccessor: Send + Sync {
    /// Open the device. Unavailable devices fail with `BootDecision`.
    async fn open(&self, device: &MountDevice) -> Result<DeviceHandle>;

    /// Directory granted for a local-fs site, if one was registered.
    fn directory_handle(&self, slug: &str) -> Result<Option<PathBuf>>;
}

/// Opened device rooted at a host directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    root: PathBuf,
}

impl DeviceHandle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if the device already holds an installed site.
    pub async fn probe_installation(&self) -> Result<bool> {
        let marker = self.root.join(INSTALLATION_MARKER);
        tokio::fs::try_exists(&marker)
            .await
            .map_err(|e| ProvisionError::BootDecision(format!("cannot probe {}: {}", marker.display(), e)))
    }

    pub async fn read_tree(&self) -> Result<FileTree> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || read_host_tree(&root))
            .await
            .map_err(|e| ProvisionError::filesystem(self.root.display().to_string(), e))?
    }

    /// Merge `tree` into the device. Nothing outside `tree` is touched.
    pub async fn write_tree(&self, tree: &FileTree) -> Result<()> {
        let root = self.root.clone();
        let tree = tree.clone();
        tokio::task::spawn_blocking(move || write_host_tree(&root, &tree, false))
            .await
            .map_err(|e| ProvisionError::filesystem(self.root.display().to_string(), e))?
    }

    /// Delete the given files from the device. Returns how many existed.
    pub async fn remove_files(&self, rels: Vec<String>) -> Result<usize> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || remove_host_files(&root, &rels))
            .await
            .map_err(|e| ProvisionError::filesystem(self.root.display().to_string(), e))?
    }
}

/// Devices on the host: object-store paths live below `opfs_root`,
/// local-fs handles come from the registry in `state_dir`.
#[derive(Debug, Clone)]
pub struct HostDevices {
    opfs_root: PathBuf,
    state_dir: PathBuf,
}

impl HostDevices {
    pub fn new(opfs_root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            opfs_root: opfs_root.into(),
            state_dir: state_dir.into(),
        }
    }

    /// Host directory of an object-store path such as `/site-blog`.
    pub fn opfs_dir(&self, path: &str) -> Result<PathBuf> {
        let rel = path.trim_matches('/');
        if rel.is_empty() || rel.split('/').any(|c| c == ".." || c.is_empty()) {
            return Err(ProvisionError::BootDecision(format!(
                "invalid object-store path {}",
                path
            )));
        }
        Ok(self.opfs_root.join(rel))
    }
}

#[async_trait]
impl DeviceAccessor for HostDevices {
    async fn open(&self, device: &MountDevice) -> Result<DeviceHandle> {
        match device {
            MountDevice::Opfs { path } => {
                let dir = self.opfs_dir(path)?;
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    ProvisionError::BootDecision(format!(
                        "cannot open object store {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
                Ok(DeviceHandle::new(dir))
            }
            MountDevice::LocalFs { path } => {
                let meta = tokio::fs::metadata(path).await.map_err(|e| {
                    ProvisionError::BootDecision(format!(
                        "local directory {} is unavailable: {}",
                        path.display(),
                        e
                    ))
                })?;
                if !meta.is_dir() {
                    return Err(ProvisionError::BootDecision(format!(
                        "local directory {} is not a directory",
                        path.display()
                    )));
                }
                let _entries = tokio::fs::read_dir(path).await.map_err(|e| {
                    ProvisionError::BootDecision(format!(
                        "local directory {} is not readable: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(DeviceHandle::new(path.clone()))
            }
        }
    }

    fn directory_handle(&self, slug: &str) -> Result<Option<PathBuf>> {
        state::load_handle(&self.state_dir, slug).map_err(ProvisionError::BootDecision)
    }
}
