//! WF-020: Runtime collaborator interfaces.
//!
//! The application runtime is a black box reached through [`Runtime`]:
//! a document root, tree writes, and the activation and core-install
//! primitives. [`memfs::MemFs`] is the in-memory filesystem runtime;
//! [`host::HostRuntime`] maps the document root onto a host directory.

pub mod host;
pub mod memfs;

use crate::core::error::Result;
use crate::core::types::{AssetKind, FileTree, Versions};
use async_trait::async_trait;

/// Where the application lives inside every runtime.
pub const DOCUMENT_ROOT: &str = "/wordpress";

/// Options for [`Runtime::write_tree`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Remove anything at the target path before writing
    pub replace_root: bool,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    /// Absolute path of the application's document root.
    fn document_root(&self) -> &str;

    /// Write every file of `tree` below `target`.
    async fn write_tree(&self, target: &str, tree: &FileTree, opts: WriteOptions) -> Result<()>;

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    /// True if a file or directory exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// All files below `path`, relative to it.
    async fn read_tree(&self, path: &str) -> Result<FileTree>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Activation primitive. Fails with `Activation` when the unit at
    /// `path` cannot be recognized or enabled.
    async fn activate(&self, kind: AssetKind, path: &str, name: &str) -> Result<()>;

    /// Lay down the application core for a fresh, unprovisioned site.
    async fn install_application(&self, versions: &Versions) -> Result<()>;
}

/// Advisory progress channel. Never affects control flow.
pub trait ProgressObserver: Send + Sync {
    fn set_caption(&self, caption: &str);
}

impl<F: Fn(&str) + Send + Sync> ProgressObserver for F {
    fn set_caption(&self, caption: &str) {
        self(caption)
    }
}

/// Join path segments with single `/` separators. Leading `/` of the
/// first segment is kept.
pub fn join_paths(parts: &[&str]) -> String {
    let absolute = parts.first().is_some_and(|p| p.starts_with('/'));
    let joined = parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Last segment of a `/`-separated path.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Resolve `path` against the document root unless already absolute.
pub fn absolutize(document_root: &str, path: &str) -> String {
    if path.starts_with('/') {
        join_paths(&[path])
    } else {
        join_paths(&[document_root, path])
    }
}
