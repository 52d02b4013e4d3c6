//! WF-011: Site records — load, save (atomic), path derivation, handle registry.
//!
//! Layout under the state directory:
//! - `<slug>/site.yaml`: the site record
//! - `<slug>/events.jsonl`: provenance events (see tripwire)
//! - `handles.yaml`: slug → granted local directory

use super::compiler;
use super::types::{Blueprint, RuntimeConfiguration, SiteMetadata, StorageKind};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};

const HANDLES_FILE: &str = "handles.yaml";

/// Derive the site record path within the state directory.
pub fn site_file_path(state_dir: &Path, slug: &str) -> PathBuf {
    state_dir.join(slug).join("site.yaml")
}

/// URL- and path-safe slug of a display name: `My Blog!` → `my-blog`.
pub fn derive_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "site".to_string()
    } else {
        slug
    }
}

/// Create a site record; the runtime configuration comes from the
/// compiled blueprint.
pub fn new_site(name: &str, blueprint: Blueprint, storage: StorageKind) -> SiteMetadata {
    use crate::tripwire::eventlog::now_iso8601;
    let manifest = compiler::compile(&blueprint);
    SiteMetadata {
        slug: derive_slug(name),
        name: name.to_string(),
        when_created: now_iso8601(),
        storage,
        runtime_configuration: RuntimeConfiguration::from(&manifest),
        original_blueprint: blueprint,
    }
}

/// Load a site record. Returns None if the site doesn't exist.
pub fn load_site(state_dir: &Path, slug: &str) -> Result<Option<SiteMetadata>, String> {
    let path = site_file_path(state_dir, slug);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let site: SiteMetadata = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid site record {}: {}", path.display(), e))?;
    Ok(Some(site))
}

/// Save a site record atomically.
pub fn save_site(state_dir: &Path, site: &SiteMetadata) -> Result<(), String> {
    write_yaml_atomic(&site_file_path(state_dir, &site.slug), site)
}

/// All site records, sorted by slug.
pub fn list_sites(state_dir: &Path) -> Result<Vec<SiteMetadata>, String> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read dir {}: {}", state_dir.display(), e))?;
    let mut slugs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().join("site.yaml").is_file())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    slugs.sort();

    let mut sites = Vec::with_capacity(slugs.len());
    for slug in slugs {
        if let Some(site) = load_site(state_dir, &slug)? {
            sites.push(site);
        }
    }
    Ok(sites)
}

fn load_handles(state_dir: &Path) -> Result<IndexMap<String, PathBuf>, String> {
    let path = state_dir.join(HANDLES_FILE);
    if !path.exists() {
        return Ok(IndexMap::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid handle registry {}: {}", path.display(), e))
}

/// Record the local directory granted for a site.
pub fn register_handle(state_dir: &Path, slug: &str, dir: &Path) -> Result<(), String> {
    let mut handles = load_handles(state_dir)?;
    handles.insert(slug.to_string(), dir.to_path_buf());
    write_yaml_atomic(&state_dir.join(HANDLES_FILE), &handles)
}

/// The local directory granted for a site, if any.
pub fn load_handle(state_dir: &Path, slug: &str) -> Result<Option<PathBuf>, String> {
    Ok(load_handles(state_dir)?.shift_remove(slug))
}

/// Atomic write: temp file + rename.
fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }
    let yaml = serde_yaml_ng::to_string(value).map_err(|e| format!("serialize error: {}", e))?;
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })
}
