//! WF-021: In-memory filesystem runtime.
//!
//! Files live in an ordered map keyed by absolute path; directories are
//! implied by descendants or recorded explicitly by `mkdir`. Activation
//! recognizes units the way WordPress does, by their file headers.

use super::{join_paths, Runtime, WriteOptions, DOCUMENT_ROOT};
use crate::core::error::{ProvisionError, Result};
use crate::core::types::{AssetKind, FileTree, Versions};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use tokio::sync::Mutex;

/// One successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRecord {
    pub kind: AssetKind,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Default)]
struct MemFsState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    activations: Vec<ActivationRecord>,
    installed: Option<Versions>,
}

/// In-memory runtime filesystem.
#[derive(Debug)]
pub struct MemFs {
    document_root: String,
    state: Mutex<MemFsState>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self::with_document_root(DOCUMENT_ROOT)
    }

    pub fn with_document_root(root: &str) -> Self {
        Self {
            document_root: join_paths(&[root]),
            state: Mutex::new(MemFsState::default()),
        }
    }

    /// Activations performed so far, in order.
    pub async fn activations(&self) -> Vec<ActivationRecord> {
        self.state.lock().await.activations.clone()
    }

    /// Versions passed to `install_application`, if it ran.
    pub async fn installed_versions(&self) -> Option<Versions> {
        self.state.lock().await.installed.clone()
    }

    pub async fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().await.files.get(&join_paths(&[path])).cloned()
    }

    /// Names of the direct children of `path`.
    pub async fn child_names(&self, path: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let prefix = dir_prefix(&join_paths(&[path]));
        let mut names = BTreeSet::new();
        for key in state.files.keys().chain(state.dirs.iter()) {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(first) = rest.split('/').next().filter(|s| !s.is_empty()) {
                    names.insert(first.to_string());
                }
            }
        }
        names.into_iter().collect()
    }
}

fn normalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(ProvisionError::filesystem(path, "path must be absolute"));
    }
    if path.split('/').any(|s| s == "..") {
        return Err(ProvisionError::filesystem(path, "path must not contain .."));
    }
    Ok(join_paths(&[path]))
}

fn dir_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

fn has_descendant<'a>(keys: impl Iterator<Item = &'a String>, prefix: &str) -> bool {
    keys.into_iter().any(|k| k.starts_with(prefix))
}

impl MemFsState {
    fn exists(&self, path: &str) -> bool {
        let prefix = dir_prefix(path);
        path == "/"
            || self.files.contains_key(path)
            || self.dirs.contains(path)
            || has_descendant(self.files.range(prefix.clone()..).map(|(k, _)| k).take(1), &prefix)
            || has_descendant(self.dirs.range(prefix.clone()..).take(1), &prefix)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.exists(path) && !self.files.contains_key(path)
    }

    fn remove(&mut self, path: &str) {
        let prefix = dir_prefix(path);
        self.files
            .retain(|k, _| k != path && !k.starts_with(&prefix));
        self.dirs.retain(|k| k != path && !k.starts_with(&prefix));
    }

    /// Files below `path`, plus explicit directories with nothing below them.
    fn subtree(&self, path: &str) -> Result<FileTree> {
        let prefix = dir_prefix(path);
        let mut tree = FileTree::new();
        for (k, v) in self
            .files
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
        {
            tree.insert(&k[prefix.len()..], v.clone())?;
        }
        for d in self
            .dirs
            .range(prefix.clone()..)
            .take_while(|k| k.starts_with(&prefix))
        {
            let below = dir_prefix(d);
            let empty = !has_descendant(self.files.range(below.clone()..).map(|(k, _)| k).take(1), &below)
                && !has_descendant(self.dirs.range(below.clone()..).take(1), &below);
            if empty {
                tree.insert_dir(&d[prefix.len()..])?;
            }
        }
        Ok(tree)
    }
}

/// Value of a WordPress file header such as `Plugin Name`.
pub fn read_header(contents: &[u8], field: &str) -> Option<String> {
    static PLUGIN: OnceLock<Option<Regex>> = OnceLock::new();
    static THEME: OnceLock<Option<Regex>> = OnceLock::new();
    let uncached;
    let re = match field {
        "Plugin Name" => PLUGIN.get_or_init(|| header_regex(field)).as_ref(),
        "Theme Name" => THEME.get_or_init(|| header_regex(field)).as_ref(),
        other => {
            uncached = header_regex(other);
            uncached.as_ref()
        }
    }?;
    let text = String::from_utf8_lossy(contents);
    re.captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}

fn header_regex(field: &str) -> Option<Regex> {
    let pattern = format!(
        r"(?mi)^(?:[ \t]*<\?php)?[ \t/*#@]*{}:(.*)$",
        regex::escape(field)
    );
    Regex::new(&pattern).ok()
}

fn recognize(kind: AssetKind, unit: &FileTree, single_file: Option<&[u8]>) -> Option<String> {
    match kind {
        AssetKind::Plugin => {
            if let Some(data) = single_file {
                return read_header(data, "Plugin Name");
            }
            unit.root_files()
                .filter(|(k, _)| k.ends_with(".php"))
                .find_map(|(_, data)| read_header(data, "Plugin Name"))
        }
        AssetKind::Theme => unit
            .get("style.css")
            .and_then(|data| read_header(data, "Theme Name")),
    }
}

#[async_trait]
impl Runtime for MemFs {
    fn document_root(&self) -> &str {
        &self.document_root
    }

    async fn write_tree(&self, target: &str, tree: &FileTree, opts: WriteOptions) -> Result<()> {
        let target = normalize(target)?;
        let mut state = self.state.lock().await;
        if state.files.contains_key(&target) {
            return Err(ProvisionError::filesystem(&target, "is a file"));
        }
        if opts.replace_root {
            state.remove(&target);
        }
        for (rel, data) in tree.iter() {
            let path = join_paths(&[&target, rel]);
            tracing::debug!(path = %path, bytes = data.len(), "memfs write");
            state.files.insert(path, data.to_vec());
        }
        for rel in tree.dirs() {
            state.dirs.insert(join_paths(&[&target, rel]));
        }
        state.dirs.insert(target);
        Ok(())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = normalize(path)?;
        let mut state = self.state.lock().await;
        if state.is_dir(&path) {
            return Err(ProvisionError::filesystem(&path, "is a directory"));
        }
        state.files.insert(path, data.to_vec());
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let mut state = self.state.lock().await;
        if state.files.contains_key(&path) {
            return Err(ProvisionError::filesystem(&path, "is a file"));
        }
        state.dirs.insert(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize(path)?;
        Ok(self.state.lock().await.exists(&path))
    }

    async fn read_tree(&self, path: &str) -> Result<FileTree> {
        let path = normalize(path)?;
        self.state.lock().await.subtree(&path)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        self.state.lock().await.remove(&path);
        Ok(())
    }

    async fn activate(&self, kind: AssetKind, path: &str, name: &str) -> Result<()> {
        let path = normalize(path)?;
        let mut state = self.state.lock().await;
        if !state.exists(&path) {
            return Err(ProvisionError::Activation {
                name: name.to_string(),
                reason: format!("{} does not exist", path),
            });
        }
        let unit = state.subtree(&path)?;
        let single_file = state.files.get(&path).map(Vec::as_slice);
        if recognize(kind, &unit, single_file).is_none() {
            let expected = match kind {
                AssetKind::Plugin => "a PHP file with a Plugin Name header",
                AssetKind::Theme => "a style.css with a Theme Name header",
            };
            return Err(ProvisionError::Activation {
                name: name.to_string(),
                reason: format!("{} has no {}", path, expected),
            });
        }
        state.activations.push(ActivationRecord {
            kind,
            path,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn install_application(&self, versions: &Versions) -> Result<()> {
        let root = self.document_root.clone();
        let mut state = self.state.lock().await;
        state.files.insert(
            join_paths(&[&root, "wp-config.php"]),
            b"<?php\ndefine( 'DB_NAME', 'wordpress' );\nrequire_once ABSPATH . 'wp-settings.php';\n"
                .to_vec(),
        );
        state.files.insert(
            join_paths(&[&root, "wp-includes/version.php"]),
            format!("<?php\n$wp_version = '{}';\n", versions.wp).into_bytes(),
        );
        state.dirs.insert(join_paths(&[&root, "wp-content/plugins"]));
        state.dirs.insert(join_paths(&[&root, "wp-content/themes"]));
        state.installed = Some(versions.clone());
        Ok(())
    }
}
