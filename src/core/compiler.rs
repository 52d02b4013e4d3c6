//! WF-003: Blueprint parsing, compilation and validation.
//!
//! `compile` is pure and total: absent fields receive defaults.
//! `validate_manifest` checks structural constraints before any step runs:
//! - Install steps carry at least one resource
//! - Step kinds are implemented
//! - Paths are non-empty and git subtrees stay inside the repository
//! - The PHP version is supported

use super::error::{ProvisionError, Result};
use super::types::*;
use indexmap::{IndexMap, IndexSet};
use std::path::Path;

/// Latest known stable PHP runtime.
pub const LATEST_PHP_VERSION: &str = "8.3";

/// Latest known stable WordPress release.
pub const LATEST_WP_VERSION: &str = "6.6";

pub const SUPPORTED_PHP_VERSIONS: &[&str] = &["8.4", "8.3", "8.2", "8.1", "8.0", "7.4"];

pub const DEFAULT_EXTENSION_BUNDLE: &str = "kitchen-sink";

/// Validation error, optionally tied to a step index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub index: Option<usize>,
    pub step: Option<&'static str>,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.index, self.step) {
            (Some(i), Some(step)) => write!(f, "step #{} ({}): {}", i, step, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Parse a blueprint file from disk (JSON or YAML).
pub fn parse_blueprint_file(path: &Path) -> Result<Blueprint> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ProvisionError::filesystem(path.display().to_string(), e))?;
    parse_blueprint(&content)
}

/// Parse a blueprint from a string. JSON documents start with `{`.
pub fn parse_blueprint(text: &str) -> Result<Blueprint> {
    if text.trim_start().starts_with('{') {
        serde_json::from_str(text).map_err(|e| ProvisionError::Parse(format!("JSON: {}", e)))
    } else {
        serde_yaml_ng::from_str(text).map_err(|e| ProvisionError::Parse(format!("YAML: {}", e)))
    }
}

/// Normalize a blueprint into a manifest.
pub fn compile(blueprint: &Blueprint) -> Manifest {
    let preferred = blueprint.preferred_versions.clone().unwrap_or_default();

    let php_extension_bundles: IndexSet<String> = match &blueprint.php_extension_bundles {
        Some(bundles) if !bundles.is_empty() => bundles.iter().cloned().collect(),
        _ => IndexSet::from([DEFAULT_EXTENSION_BUNDLE.to_string()]),
    };

    let mut extra_libraries: Vec<String> = Vec::new();
    for lib in blueprint.extra_libraries.iter().flatten() {
        if !extra_libraries.contains(lib) {
            extra_libraries.push(lib.clone());
        }
    }

    Manifest {
        versions: Versions {
            php: resolve_version(preferred.php.as_deref(), LATEST_PHP_VERSION),
            wp: resolve_version(preferred.wp.as_deref(), LATEST_WP_VERSION),
        },
        php_extension_bundles,
        features: blueprint.features.clone().unwrap_or_else(IndexMap::new),
        extra_libraries,
        steps: blueprint.steps.clone(),
    }
}

fn resolve_version(requested: Option<&str>, latest: &str) -> String {
    match requested.map(str::trim) {
        None | Some("") | Some("latest") => latest.to_string(),
        Some(v) => v.to_string(),
    }
}

/// Validate a compiled manifest. Returns a list of errors (empty = valid).
pub fn validate_manifest(manifest: &Manifest) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !SUPPORTED_PHP_VERSIONS.contains(&manifest.versions.php.as_str()) {
        errors.push(ValidationError {
            index: None,
            step: None,
            message: format!(
                "unsupported PHP version \"{}\" (supported: {})",
                manifest.versions.php,
                SUPPORTED_PHP_VERSIONS.join(", ")
            ),
        });
    }

    for (index, step) in manifest.steps.iter().enumerate() {
        for message in validate_step(step) {
            errors.push(ValidationError {
                index: Some(index),
                step: Some(step.kind()),
                message,
            });
        }
    }

    errors
}

fn validate_step(step: &Step) -> Vec<String> {
    let mut messages = Vec::new();

    match step {
        Step::InstallPlugin(_) | Step::InstallTheme(_) => {
            if let Some(spec) = step.install_spec() {
                let (archive_field, dir_field) = match spec.kind {
                    AssetKind::Plugin => ("pluginZipFile", "pluginDirectoryRoot"),
                    AssetKind::Theme => ("themeZipFile", "themeDirectoryRoot"),
                };
                if spec.archive.is_none() && spec.directory.is_none() {
                    messages.push(format!(
                        "one of the {} or {} options must be provided but both were empty",
                        dir_field, archive_field
                    ));
                }
                for reference in spec.archive.into_iter().chain(spec.directory) {
                    messages.extend(validate_resource(reference));
                }
            }
        }
        Step::WriteFile(s) => {
            if s.path.trim().is_empty() {
                messages.push("writeFile has no path".to_string());
            }
            if has_parent_component(&s.path) {
                messages.push(format!("writeFile path must not contain ..: {}", s.path));
            }
            if matches!(
                s.data,
                ResourceReference::RepositorySubtree { .. } | ResourceReference::Literal { .. }
            ) {
                messages.push("writeFile data must be a file resource".to_string());
            }
            messages.extend(validate_resource(&s.data));
        }
        Step::Mkdir(s) => {
            if s.path.trim().is_empty() {
                messages.push("mkdir has no path".to_string());
            }
            if has_parent_component(&s.path) {
                messages.push(format!("mkdir path must not contain ..: {}", s.path));
            }
        }
        Step::Unsupported => {
            messages.push("unsupported step kind".to_string());
        }
    }

    messages
}

fn has_parent_component(path: &str) -> bool {
    path.split('/').any(|c| c == "..")
}

fn validate_resource(reference: &ResourceReference) -> Vec<String> {
    let mut messages = Vec::new();
    match reference {
        ResourceReference::ArchiveByUrl { url } => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                messages.push(format!("resource url must be http(s), got \"{}\"", url));
            }
        }
        ResourceReference::CorePlugin { slug } | ResourceReference::CoreTheme { slug } => {
            if slug.is_empty() || slug.contains('/') {
                messages.push(format!("invalid wordpress.org slug \"{}\"", slug));
            }
        }
        ResourceReference::ArchiveUpload { name, .. } => {
            if name.trim().is_empty() {
                messages.push("literal resource has no name".to_string());
            }
        }
        ResourceReference::Literal { name, files } => {
            if name.trim().is_empty() {
                messages.push("literal resource has no name".to_string());
            }
            for path in files.keys() {
                if tree_key(path).is_none() {
                    messages.push(format!(
                        "literal:directory entry \"{}\" escapes the directory",
                        path
                    ));
                }
            }
        }
        ResourceReference::RepositorySubtree { url, path, .. } => {
            if url.trim().is_empty() {
                messages.push("git-directory resource has no url".to_string());
            }
            if has_parent_component(path) {
                messages.push(format!("git-directory path escapes the repository: {}", path));
            }
        }
    }
    messages
}
