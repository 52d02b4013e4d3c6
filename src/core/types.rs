//! WF-001: All types of the blueprint wire format and the provisioning engine.
//!
//! Defines the raw Blueprint, the compiled Manifest, steps, resource
//! references, install results, site records, mount descriptors and
//! provenance events. Wire types use the camelCase JSON shape blueprint
//! authors write against.

use super::error::{ProvisionError, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Blueprint (raw) and Manifest (compiled)
// ============================================================================

/// Raw provisioning document as authored. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_versions: Option<PreferredVersions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub php_extension_bundles: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<IndexMap<String, bool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_libraries: Option<Vec<String>>,

    /// Ordered provisioning steps
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Requested versions; `None` or `"latest"` means the latest known stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredVersions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub php: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wp: Option<String>,
}

/// Concrete runtime and application versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    pub php: String,
    pub wp: String,
}

/// Compiled blueprint. Versions and extension bundles are always populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub versions: Versions,
    pub php_extension_bundles: IndexSet<String>,
    pub features: IndexMap<String, bool>,
    pub extra_libraries: Vec<String>,
    pub steps: Vec<Step>,
}

impl From<Manifest> for Blueprint {
    fn from(m: Manifest) -> Self {
        Self {
            preferred_versions: Some(PreferredVersions {
                php: Some(m.versions.php),
                wp: Some(m.versions.wp),
            }),
            php_extension_bundles: Some(m.php_extension_bundles.into_iter().collect()),
            features: Some(m.features),
            extra_libraries: Some(m.extra_libraries),
            steps: m.steps,
        }
    }
}

// ============================================================================
// Steps
// ============================================================================

/// One declarative provisioning action, tagged by `"step"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step")]
pub enum Step {
    #[serde(rename = "installPlugin")]
    InstallPlugin(InstallPluginStep),
    #[serde(rename = "installTheme")]
    InstallTheme(InstallThemeStep),
    #[serde(rename = "writeFile")]
    WriteFile(WriteFileStep),
    #[serde(rename = "mkdir")]
    Mkdir(MkdirStep),
    /// Any step kind this engine does not implement
    #[serde(other)]
    Unsupported,
}

impl Step {
    /// Wire-level kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InstallPlugin(_) => "installPlugin",
            Self::InstallTheme(_) => "installTheme",
            Self::WriteFile(_) => "writeFile",
            Self::Mkdir(_) => "mkdir",
            Self::Unsupported => "unsupported",
        }
    }

    /// Install-style view of the step, if it is one.
    pub fn install_spec(&self) -> Option<InstallSpec<'_>> {
        match self {
            Self::InstallPlugin(s) => Some(InstallSpec {
                kind: AssetKind::Plugin,
                archive: s.plugin_zip_file.as_ref(),
                directory: s.plugin_directory_root.as_ref(),
                policy: s
                    .options
                    .if_already_installed
                    .or(s.if_already_installed)
                    .unwrap_or_default(),
                activate: s.options.activate.unwrap_or(true),
            }),
            Self::InstallTheme(s) => Some(InstallSpec {
                kind: AssetKind::Theme,
                archive: s.theme_zip_file.as_ref(),
                directory: s.theme_directory_root.as_ref(),
                policy: s
                    .options
                    .if_already_installed
                    .or(s.if_already_installed)
                    .unwrap_or_default(),
                activate: s.options.activate.unwrap_or(true),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallPluginStep {
    /// Archive-shaped resource (zip or tar.gz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_zip_file: Option<ResourceReference>,

    /// Directory-shaped resource; the plugin must sit at its root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_directory_root: Option<ResourceReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_already_installed: Option<ConflictPolicy>,

    #[serde(default, skip_serializing_if = "InstallOptions::is_empty")]
    pub options: InstallOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallThemeStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_zip_file: Option<ResourceReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_directory_root: Option<ResourceReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_already_installed: Option<ConflictPolicy>,

    #[serde(default, skip_serializing_if = "InstallOptions::is_empty")]
    pub options: InstallOptions,
}

/// Per-step install options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOptions {
    /// Activate after install (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activate: Option<bool>,

    /// Takes precedence over the step-level field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_already_installed: Option<ConflictPolicy>,
}

impl InstallOptions {
    fn is_empty(&self) -> bool {
        self.activate.is_none() && self.if_already_installed.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileStep {
    /// Absolute, or relative to the document root
    pub path: String,
    pub data: ResourceReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirStep {
    pub path: String,
}

/// Normalized view over installPlugin / installTheme.
#[derive(Debug, Clone, Copy)]
pub struct InstallSpec<'a> {
    pub kind: AssetKind,
    pub archive: Option<&'a ResourceReference>,
    pub directory: Option<&'a ResourceReference>,
    pub policy: ConflictPolicy,
    pub activate: bool,
}

/// Kind of installable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Plugin,
    Theme,
}

impl AssetKind {
    /// Directory under `wp-content` holding units of this kind.
    pub fn content_dir(self) -> &'static str {
        match self {
            Self::Plugin => "plugins",
            Self::Theme => "themes",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin => write!(f, "plugin"),
            Self::Theme => write!(f, "theme"),
        }
    }
}

/// Behavior when the install path already holds a same-named unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Overwrite,
    Skip,
    Error,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::Skip => write!(f, "skip"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Where to obtain content for a step, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource")]
pub enum ResourceReference {
    #[serde(rename = "url")]
    ArchiveByUrl { url: String },

    #[serde(rename = "wordpress.org/plugins")]
    CorePlugin { slug: String },

    #[serde(rename = "wordpress.org/themes")]
    CoreTheme { slug: String },

    /// Uploaded bytes, base64 on the wire
    #[serde(rename = "literal")]
    ArchiveUpload {
        name: String,
        #[serde(with = "base64_bytes")]
        contents: Vec<u8>,
    },

    #[serde(rename = "git-directory")]
    RepositorySubtree {
        url: String,
        #[serde(rename = "ref", default = "default_git_ref")]
        git_ref: String,
        #[serde(default)]
        path: String,
    },

    /// Inline directory tree, path → UTF-8 contents
    #[serde(rename = "literal:directory")]
    Literal {
        name: String,
        files: IndexMap<String, String>,
    },
}

fn default_git_ref() -> String {
    "HEAD".to_string()
}

impl ResourceReference {
    /// Short locator used in captions, logs and errors.
    pub fn locator(&self) -> String {
        match self {
            Self::ArchiveByUrl { url } => url.clone(),
            Self::CorePlugin { slug } => format!("wordpress.org/plugins/{}", slug),
            Self::CoreTheme { slug } => format!("wordpress.org/themes/{}", slug),
            Self::ArchiveUpload { name, .. } => format!("literal:{}", name),
            Self::RepositorySubtree { url, git_ref, path } => {
                format!("{}#{}:{}", url, git_ref, path)
            }
            Self::Literal { name, .. } => format!("literal:directory:{}", name),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

/// Normalized tree key of `path`: `/`-separated normal components with
/// empty and `.` segments dropped. `None` if a component climbs out of
/// the root or nothing is left.
pub fn tree_key(path: &str) -> Option<String> {
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            normal => parts.push(normal),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// In-memory file tree. Keys are `/`-separated paths relative to the tree
/// root and never leave it. Empty directories are carried explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

fn escaping_path(path: &str) -> ProvisionError {
    ProvisionError::MalformedAsset(format!("path {} escapes the tree root", path))
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file. Fails with `MalformedAsset` if the path escapes the root.
    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let key = tree_key(path).ok_or_else(|| escaping_path(path))?;
        self.files.insert(key, data.into());
        Ok(())
    }

    /// Record an empty directory.
    pub fn insert_dir(&mut self, path: &str) -> Result<()> {
        let key = tree_key(path).ok_or_else(|| escaping_path(path))?;
        self.dirs.insert(key);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Explicit empty directories.
    pub fn dirs(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().map(String::as_str)
    }

    /// Names of the entries directly under the root.
    pub fn top_level_names(&self) -> BTreeSet<&str> {
        self.files
            .keys()
            .map(|k| k.split('/').next().unwrap_or(k.as_str()))
            .collect()
    }

    /// The root's sole entry when it is a directory.
    pub fn single_top_level_dir(&self) -> Option<&str> {
        let names = self.top_level_names();
        if names.len() != 1 {
            return None;
        }
        let name = names.into_iter().next()?;
        let is_dir = self.files.keys().all(|k| k.starts_with(&format!("{}/", name)));
        is_dir.then_some(name)
    }

    /// Files sitting directly at the root.
    pub fn root_files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.iter().filter(|(k, _)| !k.contains('/'))
    }

    /// Subtree under `prefix`, with the prefix stripped.
    pub fn subtree(&self, prefix: &str) -> FileTree {
        let prefix = format!("{}/", prefix.trim_matches('/'));
        let files = self
            .files
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rel| (rel.to_string(), v.clone())))
            .collect();
        let dirs = self
            .dirs
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        FileTree { files, dirs }
    }
}

/// Test and fixture convenience. Entries whose path escapes the root are
/// dropped with a warning; use [`FileTree::insert`] to see the error.
impl<P: AsRef<str>, D: Into<Vec<u8>>> FromIterator<(P, D)> for FileTree {
    fn from_iter<I: IntoIterator<Item = (P, D)>>(iter: I) -> Self {
        let mut tree = FileTree::new();
        for (path, data) in iter {
            if let Err(e) = tree.insert(path.as_ref(), data) {
                tracing::warn!(error = %e, "dropping tree entry");
            }
        }
        tree
    }
}

/// A single named byte buffer (archive or plain file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A named directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResource {
    pub name: String,
    pub files: FileTree,
}

/// Resolved content of a resource reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    File(FileResource),
    Directory(DirectoryResource),
}

// ============================================================================
// Install and run results
// ============================================================================

/// Where an installable unit landed and what it is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    /// Absolute runtime path of the unit's directory
    pub asset_folder_path: String,
    /// Human-readable name
    pub asset_folder_name: String,
}

/// What the installer did at the install path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallDisposition {
    Created,
    Replaced,
    Skipped,
}

impl fmt::Display for InstallDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Replaced => write!(f, "REPLACED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub result: InstallResult,
    pub disposition: InstallDisposition,
    /// BLAKE3 of the payload tree; empty when skipped
    pub hash: String,
}

/// Activation status of an install step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationStatus {
    NotRequested,
    Activated,
    Failed { reason: String },
}

/// Result of one executed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub index: usize,
    pub step: &'static str,
    pub install: Option<InstallOutcome>,
    pub activation: ActivationStatus,
    pub duration: std::time::Duration,
}

/// Result of a full provisioning run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub results: Vec<StepResult>,
    pub total_duration: std::time::Duration,
}

impl RunReport {
    /// Steps whose activation failed, with the reason.
    pub fn activation_failures(&self) -> Vec<(usize, &str)> {
        self.results
            .iter()
            .filter_map(|r| match &r.activation {
                ActivationStatus::Failed { reason } => Some((r.index, reason.as_str())),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Sites and storage
// ============================================================================

/// Persistent storage backend of a site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    #[default]
    None,
    Opfs,
    LocalFs,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Opfs => write!(f, "opfs"),
            Self::LocalFs => write!(f, "local-fs"),
        }
    }
}

/// Configuration the runtime boots with when provisioning is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfiguration {
    pub preferred_versions: Versions,
    pub php_extension_bundles: IndexSet<String>,
    #[serde(default)]
    pub features: IndexMap<String, bool>,
    #[serde(default)]
    pub extra_libraries: Vec<String>,
}

impl From<&Manifest> for RuntimeConfiguration {
    fn from(m: &Manifest) -> Self {
        Self {
            preferred_versions: m.versions.clone(),
            php_extension_bundles: m.php_extension_bundles.clone(),
            features: m.features.clone(),
            extra_libraries: m.extra_libraries.clone(),
        }
    }
}

impl From<&RuntimeConfiguration> for Blueprint {
    fn from(rc: &RuntimeConfiguration) -> Self {
        Self {
            preferred_versions: Some(PreferredVersions {
                php: Some(rc.preferred_versions.php.clone()),
                wp: Some(rc.preferred_versions.wp.clone()),
            }),
            php_extension_bundles: Some(rc.php_extension_bundles.iter().cloned().collect()),
            features: Some(rc.features.clone()),
            extra_libraries: Some(rc.extra_libraries.clone()),
            steps: Vec::new(),
        }
    }
}

/// Persisted site record, consumed read-only by the boot path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMetadata {
    pub slug: String,
    pub name: String,
    pub when_created: String,
    #[serde(default)]
    pub storage: StorageKind,
    pub runtime_configuration: RuntimeConfiguration,
    pub original_blueprint: Blueprint,
}

/// Backing device of a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MountDevice {
    /// Namespaced object-store directory, e.g. `/site-my-blog`
    Opfs { path: String },
    /// User-granted local directory
    LocalFs { path: PathBuf },
}

/// Direction of the tree copy between device and runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    OpfsToMemfs,
    MemfsToOpfs,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpfsToMemfs => write!(f, "opfs-to-memfs"),
            Self::MemfsToOpfs => write!(f, "memfs-to-opfs"),
        }
    }
}

/// Mount chosen at boot. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountDescriptor {
    pub device: MountDevice,
    pub mountpoint: String,
    pub initial_sync_direction: SyncDirection,
}

/// Boot decision for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEnvironment {
    /// `None` for ephemeral sites
    pub mount: Option<MountDescriptor>,
    pub effective_manifest: Manifest,
    pub should_provision: bool,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    BootDecided {
        site: String,
        storage: StorageKind,
        should_provision: bool,
    },
    RunStarted {
        site: String,
        run_id: String,
        steps: usize,
        wpforge_version: String,
    },
    StepStarted {
        site: String,
        index: usize,
        step: String,
    },
    StepCompleted {
        site: String,
        index: usize,
        step: String,
        duration_seconds: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
    StepFailed {
        site: String,
        index: usize,
        step: String,
        error: String,
    },
    ActivationFailed {
        site: String,
        index: usize,
        name: String,
        error: String,
    },
    RunCompleted {
        site: String,
        run_id: String,
        steps_completed: usize,
        activation_failures: usize,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Tests
// ============================================================================
