//! WF-004: Archive unpacking into an in-memory file tree.
//!
//! Supports zip and gzip-compressed tar, detected by magic bytes.
//! Entries that would land outside the unpack root are rejected.
//! macOS resource-fork folders (`__MACOSX/`) are dropped.

use super::error::{ProvisionError, Result};
use super::types::FileTree;
use std::io::{Cursor, Read};
use std::path::{Component, Path};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Supported archive container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

/// Detect the archive format from leading bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ArchiveFormat> {
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        Some(ArchiveFormat::Zip)
    } else if bytes.starts_with(GZIP_MAGIC) {
        Some(ArchiveFormat::TarGz)
    } else {
        None
    }
}

/// Unpack an archive. `name` is only used in error messages.
pub fn unpack(name: &str, bytes: &[u8]) -> Result<FileTree> {
    match detect_format(bytes) {
        Some(ArchiveFormat::Zip) => unpack_zip(name, bytes),
        Some(ArchiveFormat::TarGz) => unpack_tar_gz(name, bytes),
        None => Err(ProvisionError::MalformedAsset(format!(
            "{} is not a zip or tar.gz archive",
            name
        ))),
    }
}

fn unpack_zip(name: &str, bytes: &[u8]) -> Result<FileTree> {
    let malformed = |e: &dyn std::fmt::Display| {
        ProvisionError::MalformedAsset(format!("{}: {}", name, e))
    };
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| malformed(&e))?;
    let mut tree = FileTree::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| malformed(&e))?;
        if entry.is_dir() {
            continue;
        }
        let raw = entry.name().to_string();
        let path = entry
            .enclosed_name()
            .ok_or_else(|| malformed(&format!("entry {} escapes the archive root", raw)))?;
        let Some(rel) = relative_entry_path(&path) else {
            return Err(malformed(&format!("entry {} escapes the archive root", raw)));
        };
        if is_ignored(&rel) {
            continue;
        }
        let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut data).map_err(|e| malformed(&e))?;
        tree.insert(&rel, data)?;
    }

    Ok(tree)
}

fn unpack_tar_gz(name: &str, bytes: &[u8]) -> Result<FileTree> {
    let malformed = |e: &dyn std::fmt::Display| {
        ProvisionError::MalformedAsset(format!("{}: {}", name, e))
    };
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    let mut tree = FileTree::new();

    for entry in archive.entries().map_err(|e| malformed(&e))? {
        let mut entry = entry.map_err(|e| malformed(&e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(|e| malformed(&e))?.into_owned();
        let Some(rel) = relative_entry_path(&path) else {
            return Err(malformed(&format!(
                "entry {} escapes the archive root",
                path.display()
            )));
        };
        if is_ignored(&rel) {
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|e| malformed(&e))?;
        tree.insert(&rel, data)?;
    }

    Ok(tree)
}

/// Join normal components with `/`; `None` if any component climbs or roots.
fn relative_entry_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(p) => parts.push(p.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn is_ignored(rel: &str) -> bool {
    rel == "__MACOSX" || rel.starts_with("__MACOSX/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tar_gz_archive, zip_archive};

    #[test]
    fn test_wf004_detect_format() {
        assert_eq!(detect_format(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(detect_format(&[0x1f, 0x8b, 0x08]), Some(ArchiveFormat::TarGz));
        assert_eq!(detect_format(b"<?php"), None);
    }

    #[test]
    fn test_wf004_unpack_zip() {
        let bytes = zip_archive(&[("hello/hello.php", "<?php"), ("hello/readme.txt", "hi")]);
        let tree = unpack("hello.zip", &bytes).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get("hello/hello.php"), Some(&b"<?php"[..]));
    }

    #[test]
    fn test_wf004_unpack_tar_gz_matches_zip() {
        let files = [("theme/style.css", "/* Theme Name: T */"), ("theme/index.php", "<?php")];
        let from_zip = unpack("t.zip", &zip_archive(&files)).unwrap();
        let from_tar = unpack("t.tar.gz", &tar_gz_archive(&files)).unwrap();
        assert_eq!(from_zip, from_tar);
    }

    #[test]
    fn test_wf004_macosx_entries_dropped() {
        let bytes = zip_archive(&[
            ("hello/hello.php", "<?php"),
            ("__MACOSX/hello/._hello.php", "junk"),
        ]);
        let tree = unpack("hello.zip", &bytes).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.single_top_level_dir(), Some("hello"));
    }

    #[test]
    fn test_wf004_not_an_archive() {
        let err = unpack("plain.zip", b"just text").unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedAsset(_)));
        assert!(err.to_string().contains("plain.zip"));
    }

    #[test]
    fn test_wf004_truncated_zip() {
        let mut bytes = zip_archive(&[("a.php", "<?php")]);
        bytes.truncate(12);
        assert!(matches!(
            unpack("a.zip", &bytes),
            Err(ProvisionError::MalformedAsset(_))
        ));
    }

    #[test]
    fn test_wf004_relative_entry_path() {
        assert_eq!(
            relative_entry_path(Path::new("./a/b.php")),
            Some("a/b.php".to_string())
        );
        assert_eq!(relative_entry_path(Path::new("a/../../b")), None);
        assert_eq!(relative_entry_path(Path::new("/etc/passwd")), None);
        assert_eq!(relative_entry_path(Path::new(".")), None);
    }
}
