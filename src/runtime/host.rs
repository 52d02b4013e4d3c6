//! WF-022: Host-directory runtime.
//!
//! Maps the virtual document root onto a directory of the host
//! filesystem. Activation and core install shell out to wp-cli through
//! the local transport.

use super::{basename, join_paths, Runtime, WriteOptions, DOCUMENT_ROOT};
use crate::core::codegen;
use crate::core::error::{ProvisionError, Result};
use crate::core::types::{tree_key, AssetKind, FileTree, Versions};
use crate::transport;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Runtime whose document root is a host directory.
#[derive(Debug, Clone)]
pub struct HostRuntime {
    host_root: PathBuf,
}

impl HostRuntime {
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
        }
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Host path of a virtual path below the document root.
    pub fn host_path(&self, path: &str) -> Result<PathBuf> {
        let normalized = join_paths(&[path]);
        if normalized.split('/').any(|s| s == "..") {
            return Err(ProvisionError::filesystem(path, "path escapes the document root"));
        }
        let rel = if normalized == DOCUMENT_ROOT {
            ""
        } else if let Some(rel) = normalized.strip_prefix(&format!("{}/", DOCUMENT_ROOT)) {
            rel
        } else {
            return Err(ProvisionError::filesystem(
                path,
                format!("outside the document root {}", DOCUMENT_ROOT),
            ));
        };
        Ok(if rel.is_empty() {
            self.host_root.clone()
        } else {
            self.host_root.join(rel)
        })
    }

    async fn run(&self, script: String, name: &str) -> std::result::Result<(), String> {
        let out = transport::exec_script(script, Some(self.host_root.clone())).await?;
        if out.success() {
            tracing::debug!(name, stdout = %out.stdout.trim(), "script succeeded");
            Ok(())
        } else {
            Err(out.failure_detail())
        }
    }
}

/// Read every regular file below `root` into a tree, plus every empty
/// directory. Symlinks are skipped.
pub(crate) fn read_host_tree(root: &Path) -> Result<FileTree> {
    let mut tree = FileTree::new();
    if !root.exists() {
        return Ok(tree);
    }
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ProvisionError::filesystem(root.display().to_string(), e))?;
        let path = entry.path();
        let fs_err = |e: std::io::Error| ProvisionError::filesystem(path.display().to_string(), e);
        let rel = path
            .strip_prefix(root)
            .map_err(|e| ProvisionError::filesystem(path.display().to_string(), e))?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_file() {
            tree.insert(&key, std::fs::read(path).map_err(fs_err)?)?;
        } else if entry.file_type().is_dir() && std::fs::read_dir(path).map_err(fs_err)?.next().is_none() {
            tree.insert_dir(&key)?;
        }
    }
    Ok(tree)
}

/// Write `tree` below `root`, optionally clearing `root` first. Each file
/// lands through a temp file + rename, so a reader never sees it half
/// written.
pub(crate) fn write_host_tree(root: &Path, tree: &FileTree, replace_root: bool) -> Result<()> {
    let fs_err = |p: &Path, e: std::io::Error| ProvisionError::filesystem(p.display().to_string(), e);
    if replace_root && root.exists() {
        if root.is_dir() {
            std::fs::remove_dir_all(root).map_err(|e| fs_err(root, e))?;
        } else {
            std::fs::remove_file(root).map_err(|e| fs_err(root, e))?;
        }
    }
    std::fs::create_dir_all(root).map_err(|e| fs_err(root, e))?;
    for dir in tree.dirs() {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).map_err(|e| fs_err(&path, e))?;
    }
    for (rel, data) in tree.iter() {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
        }
        let tmp_path = temp_sibling(&path);
        std::fs::write(&tmp_path, data).map_err(|e| fs_err(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| fs_err(&path, e))?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.wpforge-tmp", name))
}

/// Remove the files at `rels` below `root`. Already-missing files are fine.
pub(crate) fn remove_host_files(root: &Path, rels: &[String]) -> Result<usize> {
    let mut removed = 0;
    for rel in rels {
        let key = tree_key(rel).ok_or_else(|| {
            ProvisionError::filesystem(rel, "path escapes the device root")
        })?;
        let path = root.join(key);
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProvisionError::filesystem(path.display().to_string(), e)),
        }
    }
    Ok(removed)
}

async fn blocking<T: Send + 'static>(
    path: &Path,
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProvisionError::filesystem(path.display().to_string(), e))?
}

#[async_trait]
impl Runtime for HostRuntime {
    fn document_root(&self) -> &str {
        DOCUMENT_ROOT
    }

    async fn write_tree(&self, target: &str, tree: &FileTree, opts: WriteOptions) -> Result<()> {
        let root = self.host_path(target)?;
        let tree = tree.clone();
        let at = root.clone();
        blocking(&at, move || write_host_tree(&root, &tree, opts.replace_root)).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let host = self.host_path(path)?;
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProvisionError::filesystem(parent.display().to_string(), e))?;
        }
        tokio::fs::write(&host, data)
            .await
            .map_err(|e| ProvisionError::filesystem(host.display().to_string(), e))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let host = self.host_path(path)?;
        tokio::fs::create_dir_all(&host)
            .await
            .map_err(|e| ProvisionError::filesystem(host.display().to_string(), e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let host = self.host_path(path)?;
        tokio::fs::try_exists(&host)
            .await
            .map_err(|e| ProvisionError::filesystem(host.display().to_string(), e))
    }

    async fn read_tree(&self, path: &str) -> Result<FileTree> {
        let host = self.host_path(path)?;
        let at = host.clone();
        blocking(&at, move || read_host_tree(&host)).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let host = self.host_path(path)?;
        let result = match tokio::fs::metadata(&host).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&host).await,
            Ok(_) => tokio::fs::remove_file(&host).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
        result.map_err(|e| ProvisionError::filesystem(host.display().to_string(), e))
    }

    async fn activate(&self, kind: AssetKind, path: &str, name: &str) -> Result<()> {
        self.host_path(path)?;
        let script = codegen::wp_activate_script(&self.host_root, kind, basename(path));
        self.run(script, name)
            .await
            .map_err(|reason| ProvisionError::Activation {
                name: name.to_string(),
                reason,
            })
    }

    async fn install_application(&self, versions: &Versions) -> Result<()> {
        let script = codegen::wp_core_install_script(&self.host_root, versions);
        tracing::info!(root = %self.host_root.display(), wp = %versions.wp, "downloading WordPress core");
        self.run(script, "core")
            .await
            .map_err(|reason| ProvisionError::filesystem(self.host_root.display().to_string(), reason))
    }
}
