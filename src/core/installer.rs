//! WF-007: Asset installation — place resolved content under a target directory.
//!
//! Archives are unpacked; a single top-level directory names the install
//! folder, otherwise the sanitized display name does. Directory content
//! always lands in a fresh, randomly suffixed folder. Conflict policy
//! applies to archive installs only.

use super::archive;
use super::error::{ProvisionError, Result};
use super::types::{
    AssetKind, ConflictPolicy, Content, FileTree, InstallDisposition, InstallOutcome,
    InstallResult,
};
use crate::runtime::{basename, join_paths, Runtime, WriteOptions};
use crate::tripwire::hasher;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

const SUFFIX_LEN: usize = 10;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Human-readable name from an archive file name:
/// `my-great_plugin.1.2.zip` → `My Great Plugin`.
pub fn human_name(file_name: &str) -> String {
    let base = basename(file_name);
    let stem = base.split('.').next().unwrap_or_default();
    let name = stem
        .split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        base.to_string()
    } else {
        name
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Folder-safe form of a name: lowercase, runs of anything outside
/// `[a-z0-9_-]` collapsed to `-`.
pub fn sanitize_folder_name(name: &str) -> String {
    static UNSAFE: OnceLock<Option<Regex>> = OnceLock::new();
    let lower = name.to_lowercase();
    let replaced = match UNSAFE.get_or_init(|| Regex::new(r"[^a-z0-9_-]+").ok()) {
        Some(re) => re.replace_all(&lower, "-").into_owned(),
        None => lower,
    };
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        "asset".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Ten random lowercase alphanumerics.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Name shown in captions before the install runs.
pub fn display_name(content: &Content) -> String {
    match content {
        Content::File(f) => human_name(&f.name),
        Content::Directory(d) => d.name.clone(),
    }
}

/// Cheap structural checks on a payload before it is written.
pub fn check_structure(kind: AssetKind, payload: &FileTree, name: &str) -> Result<()> {
    if payload.is_empty() {
        return Err(ProvisionError::MalformedAsset(format!(
            "{} contains no files",
            name
        )));
    }
    match kind {
        AssetKind::Plugin => {
            if !payload.root_files().any(|(k, _)| k.ends_with(".php")) {
                return Err(ProvisionError::MalformedAsset(format!(
                    "plugin {} has no PHP file at its root",
                    name
                )));
            }
        }
        AssetKind::Theme => {
            if payload.get("style.css").is_none() {
                return Err(ProvisionError::MalformedAsset(format!(
                    "theme {} has no style.css at its root",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Install `content` below `target_parent` in the runtime.
pub async fn install(
    runtime: &dyn Runtime,
    content: Content,
    target_parent: &str,
    policy: ConflictPolicy,
    kind: AssetKind,
) -> Result<InstallOutcome> {
    match content {
        Content::File(file) => {
            let tree = archive::unpack(&file.name, &file.bytes)?;
            let display = human_name(&file.name);
            let (folder, payload) = match tree.single_top_level_dir() {
                Some(dir) => (dir.to_string(), tree.subtree(dir)),
                None => (sanitize_folder_name(&display), tree),
            };

            let path = join_paths(&[target_parent, &folder]);
            let result = InstallResult {
                asset_folder_path: path.clone(),
                asset_folder_name: display,
            };

            let exists = runtime.exists(&path).await?;
            let disposition = if exists {
                match policy {
                    ConflictPolicy::Skip => {
                        tracing::info!(path = %path, "already installed, skipping");
                        return Ok(InstallOutcome {
                            result,
                            disposition: InstallDisposition::Skipped,
                            hash: String::new(),
                        });
                    }
                    ConflictPolicy::Error => {
                        return Err(ProvisionError::AlreadyInstalled { path });
                    }
                    ConflictPolicy::Overwrite => InstallDisposition::Replaced,
                }
            } else {
                InstallDisposition::Created
            };
            check_structure(kind, &payload, &file.name)?;

            runtime
                .write_tree(&path, &payload, WriteOptions { replace_root: exists })
                .await?;
            tracing::debug!(path = %path, files = payload.len(), %disposition, "installed archive");
            Ok(InstallOutcome {
                result,
                disposition,
                hash: hasher::hash_tree(&payload),
            })
        }
        Content::Directory(dir) => {
            check_structure(kind, &dir.files, &dir.name)?;
            let folder = format!("{}-{}", sanitize_folder_name(&dir.name), random_suffix());
            let path = join_paths(&[target_parent, &folder]);
            runtime
                .write_tree(&path, &dir.files, WriteOptions { replace_root: true })
                .await?;
            tracing::debug!(path = %path, files = dir.files.len(), "installed directory");
            Ok(InstallOutcome {
                result: InstallResult {
                    asset_folder_path: path,
                    asset_folder_name: dir.name,
                },
                disposition: InstallDisposition::Created,
                hash: hasher::hash_tree(&dir.files),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DirectoryResource, FileResource};
    use crate::runtime::memfs::MemFs;
    use crate::testing::{plugin_php, tar_gz_archive, theme_css, zip_archive};
    use proptest::prelude::*;

    const PLUGINS: &str = "/wordpress/wp-content/plugins";

    fn zip_content(name: &str, files: &[(&str, &str)]) -> Content {
        Content::File(FileResource {
            name: name.to_string(),
            bytes: zip_archive(files),
        })
    }

    fn dir_content(name: &str, files: &[(&str, &str)]) -> Content {
        Content::Directory(DirectoryResource {
            name: name.to_string(),
            files: files.iter().copied().collect(),
        })
    }

    #[test]
    fn test_wf007_human_name() {
        assert_eq!(human_name("hello.zip"), "Hello");
        assert_eq!(human_name("my-great_plugin.1.2.zip"), "My Great Plugin");
        assert_eq!(human_name("https://x/dl/akismet.5.3.zip"), "Akismet");
        assert_eq!(human_name(".zip"), ".zip");
    }

    #[test]
    fn test_wf007_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("My Great Plugin"), "my-great-plugin");
        assert_eq!(sanitize_folder_name("a__b--c"), "a__b--c");
        assert_eq!(sanitize_folder_name("Ünïcode!! Name"), "n-code-name");
        assert_eq!(sanitize_folder_name("***"), "asset");
    }

    #[test]
    fn test_wf007_random_suffix() {
        let s = random_suffix();
        assert_eq!(s.len(), 10);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    proptest! {
        #[test]
        fn prop_wf007_sanitized_names_are_folder_safe(name in ".{0,40}") {
            let s = sanitize_folder_name(&name);
            prop_assert!(!s.is_empty());
            prop_assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'));
            prop_assert!(!s.starts_with('-') && !s.ends_with('-'));
        }

        #[test]
        fn prop_wf007_human_name_has_no_separators(name in "[a-z][a-z_-]{0,11}\\.zip") {
            let h = human_name(&name);
            prop_assert!(!h.contains('_') && !h.contains('.'));
        }
    }

    #[tokio::test]
    async fn test_wf007_single_top_level_dir_names_folder() {
        let fs = MemFs::new();
        let hello = plugin_php("Hello");
        let content = zip_content("hello.1.0.zip", &[("hello-dolly/hello.php", hello.as_str())]);
        let out = install(&fs, content, PLUGINS, ConflictPolicy::Overwrite, AssetKind::Plugin)
            .await
            .unwrap();
        assert_eq!(out.result.asset_folder_path, "/wordpress/wp-content/plugins/hello-dolly");
        assert_eq!(out.result.asset_folder_name, "Hello");
        assert_eq!(out.disposition, InstallDisposition::Created);
        assert!(out.hash.starts_with("blake3:"));
        assert!(fs
            .exists("/wordpress/wp-content/plugins/hello-dolly/hello.php")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_wf007_flat_archive_uses_sanitized_name() {
        let fs = MemFs::new();
        let php = plugin_php("Flat");
        let content = zip_content("My Flat_Plugin.zip", &[("flat.php", php.as_str()), ("readme.txt", "r")]);
        let out = install(&fs, content, PLUGINS, ConflictPolicy::Overwrite, AssetKind::Plugin)
            .await
            .unwrap();
        assert_eq!(out.result.asset_folder_path, "/wordpress/wp-content/plugins/my-flat-plugin");
        assert_eq!(out.result.asset_folder_name, "My Flat Plugin");
    }

    #[tokio::test]
    async fn test_wf007_tar_gz_archive() {
        let fs = MemFs::new();
        let css = theme_css("Tarred");
        let content = Content::File(FileResource {
            name: "tarred.tar.gz".into(),
            bytes: tar_gz_archive(&[("tarred/style.css", css.as_str())]),
        });
        let out = install(
            &fs,
            content,
            "/wordpress/wp-content/themes",
            ConflictPolicy::Overwrite,
            AssetKind::Theme,
        )
        .await
        .unwrap();
        assert_eq!(out.result.asset_folder_path, "/wordpress/wp-content/themes/tarred");
    }

    #[tokio::test]
    async fn test_wf007_skip_returns_existing_without_writing() {
        let fs = MemFs::new();
        let v1 = plugin_php("Hello");
        let first = install(
            &fs,
            zip_content("hello.zip", &[("hello/hello.php", v1.as_str())]),
            PLUGINS,
            ConflictPolicy::Overwrite,
            AssetKind::Plugin,
        )
        .await
        .unwrap();

        let v2 = format!("{}// v2", v1);
        let second = install(
            &fs,
            zip_content("hello.zip", &[("hello/hello.php", v2.as_str())]),
            PLUGINS,
            ConflictPolicy::Skip,
            AssetKind::Plugin,
        )
        .await
        .unwrap();
        assert_eq!(second.result, first.result);
        assert_eq!(second.disposition, InstallDisposition::Skipped);
        let on_disk = fs.file("/wordpress/wp-content/plugins/hello/hello.php").await.unwrap();
        assert_eq!(on_disk, v1.as_bytes());
    }

    #[tokio::test]
    async fn test_wf007_error_policy_refuses_without_writing() {
        let fs = MemFs::new();
        let v1 = plugin_php("Hello");
        install(
            &fs,
            zip_content("hello.zip", &[("hello/hello.php", v1.as_str())]),
            PLUGINS,
            ConflictPolicy::Overwrite,
            AssetKind::Plugin,
        )
        .await
        .unwrap();

        let err = install(
            &fs,
            zip_content("hello.zip", &[("hello/hello.php", "<?php // new"), ("hello/extra.php", "x")]),
            PLUGINS,
            ConflictPolicy::Error,
            AssetKind::Plugin,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::AlreadyInstalled { ref path } if path.ends_with("/hello")));
        assert_eq!(fs.child_names("/wordpress/wp-content/plugins/hello").await, vec!["hello.php"]);
    }

    #[tokio::test]
    async fn test_wf007_conflict_policy_decides_before_structure_check() {
        let fs = MemFs::new();
        install(
            &fs,
            zip_content("hello.zip", &[("hello/hello.php", plugin_php("Hello").as_str())]),
            PLUGINS,
            ConflictPolicy::Overwrite,
            AssetKind::Plugin,
        )
        .await
        .unwrap();

        let skipped = install(
            &fs,
            zip_content("hello.zip", &[("hello/readme.txt", "no php here")]),
            PLUGINS,
            ConflictPolicy::Skip,
            AssetKind::Plugin,
        )
        .await
        .unwrap();
        assert_eq!(skipped.disposition, InstallDisposition::Skipped);
        assert_eq!(skipped.result.asset_folder_path, "/wordpress/wp-content/plugins/hello");

        let err = install(
            &fs,
            zip_content("hello.zip", &[("hello/readme.txt", "no php here")]),
            PLUGINS,
            ConflictPolicy::Error,
            AssetKind::Plugin,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::AlreadyInstalled { .. }));

        let err = install(
            &fs,
            zip_content("hello.zip", &[("hello/readme.txt", "no php here")]),
            PLUGINS,
            ConflictPolicy::Overwrite,
            AssetKind::Plugin,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedAsset(_)));
        assert_eq!(fs.child_names("/wordpress/wp-content/plugins/hello").await, vec!["hello.php"]);
    }

    #[tokio::test]
    async fn test_wf007_overwrite_replaces_folder() {
        let fs = MemFs::new();
        let php = plugin_php("Hello");
        install(
            &fs,
            zip_content("hello.zip", &[("hello/hello.php", php.as_str()), ("hello/old.php", "o")]),
            PLUGINS,
            ConflictPolicy::Overwrite,
            AssetKind::Plugin,
        )
        .await
        .unwrap();
        let out = install(
            &fs,
            zip_content("hello.zip", &[("hello/hello.php", php.as_str())]),
            PLUGINS,
            ConflictPolicy::Overwrite,
            AssetKind::Plugin,
        )
        .await
        .unwrap();
        assert_eq!(out.disposition, InstallDisposition::Replaced);
        assert_eq!(fs.child_names("/wordpress/wp-content/plugins/hello").await, vec!["hello.php"]);
    }

    #[tokio::test]
    async fn test_wf007_directory_installs_get_distinct_paths() {
        let fs = MemFs::new();
        let php = plugin_php("Demo");
        let a = install(
            &fs,
            dir_content("demo", &[("demo.php", php.as_str())]),
            PLUGINS,
            ConflictPolicy::Error,
            AssetKind::Plugin,
        )
        .await
        .unwrap();
        let b = install(
            &fs,
            dir_content("demo", &[("demo.php", php.as_str())]),
            PLUGINS,
            ConflictPolicy::Error,
            AssetKind::Plugin,
        )
        .await
        .unwrap();
        assert_ne!(a.result.asset_folder_path, b.result.asset_folder_path);
        assert!(a.result.asset_folder_path.starts_with("/wordpress/wp-content/plugins/demo-"));
        assert_eq!(a.result.asset_folder_name, "demo");
        assert_eq!(fs.child_names(PLUGINS).await.len(), 2);
    }

    #[tokio::test]
    async fn test_wf007_structural_checks() {
        let fs = MemFs::new();
        let empty = install(&fs, dir_content("e", &[]), PLUGINS, ConflictPolicy::Overwrite, AssetKind::Plugin).await;
        assert!(matches!(empty, Err(ProvisionError::MalformedAsset(_))));

        let nested = install(
            &fs,
            dir_content("nested", &[("inner/nested.php", "<?php")]),
            PLUGINS,
            ConflictPolicy::Overwrite,
            AssetKind::Plugin,
        )
        .await;
        assert!(matches!(nested, Err(ProvisionError::MalformedAsset(_))));

        let theme = install(
            &fs,
            zip_content("t.zip", &[("t/index.php", "<?php")]),
            "/wordpress/wp-content/themes",
            ConflictPolicy::Overwrite,
            AssetKind::Theme,
        )
        .await;
        assert!(matches!(theme, Err(ProvisionError::MalformedAsset(_))));
        assert!(fs.child_names("/wordpress/wp-content").await.is_empty());
    }

    #[test]
    fn test_wf007_display_name() {
        assert_eq!(display_name(&dir_content("x-y", &[])), "x-y");
        assert_eq!(
            display_name(&Content::File(FileResource {
                name: "akismet.5.3.zip".into(),
                bytes: Vec::new()
            })),
            "Akismet"
        );
    }
}
