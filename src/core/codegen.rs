//! WF-005: Script generation for the external tools the engine drives.
//!
//! - git: fetch a single ref shallowly and check out one subtree
//! - wp: activate plugins/themes, download core into a host document root

use super::types::{AssetKind, Versions};
use std::path::Path;

/// Quote a value for a single-quoted bash word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Fetch `git_ref` of `url` at depth 1 and materialize only `path`
/// into the current directory.
pub fn git_subtree_script(git: &str, url: &str, git_ref: &str, path: &str) -> String {
    let git = shell_quote(git);
    let mut lines = vec![
        "set -euo pipefail".to_string(),
        format!("{} init -q .", git),
        format!("{} remote add origin {}", git, shell_quote(url)),
        format!("{} fetch -q --depth 1 origin {}", git, shell_quote(git_ref)),
    ];
    if path.trim_matches('/').is_empty() {
        lines.push(format!("{} checkout -q FETCH_HEAD", git));
    } else {
        lines.push(format!(
            "{} checkout -q FETCH_HEAD -- {}",
            git,
            shell_quote(path.trim_matches('/'))
        ));
    }
    lines.join("\n")
}

/// Activate a plugin (by folder) or theme (by folder) with wp-cli.
pub fn wp_activate_script(host_root: &Path, kind: AssetKind, folder: &str) -> String {
    let sub = match kind {
        AssetKind::Plugin => "plugin",
        AssetKind::Theme => "theme",
    };
    [
        "set -euo pipefail".to_string(),
        format!(
            "wp --path={} {} activate {}",
            shell_quote(&host_root.to_string_lossy()),
            sub,
            shell_quote(folder)
        ),
    ]
    .join("\n")
}

/// Download WordPress core and create a config from the sample.
pub fn wp_core_install_script(host_root: &Path, versions: &Versions) -> String {
    let root = shell_quote(&host_root.to_string_lossy());
    [
        "set -euo pipefail".to_string(),
        format!("mkdir -p {}", root),
        format!(
            "wp core download --path={} --version={} --skip-content --force",
            root,
            shell_quote(&versions.wp)
        ),
        format!(
            "if [ ! -f {r}/wp-config.php ]; then cp {r}/wp-config-sample.php {r}/wp-config.php; fi",
            r = root
        ),
        format!("mkdir -p {r}/wp-content/plugins {r}/wp-content/themes", r = root),
    ]
    .join("\n")
}
