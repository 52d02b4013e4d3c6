//! Shared fixtures for unit tests: archive builders and offline resolvers.

use crate::core::error::{ProvisionError, Result};
use crate::core::resolver::{Fetcher, GitSource, ResourceResolver};
use crate::core::types::FileTree;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

/// Build a zip archive from `(path, contents)` pairs.
pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (path, contents) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Build a gzip-compressed tar archive from `(path, contents)` pairs.
pub fn tar_gz_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Plugin main file with a recognizable header.
pub fn plugin_php(name: &str) -> String {
    format!("<?php\n/**\n * Plugin Name: {}\n * Version: 1.0\n */\n", name)
}

/// Theme stylesheet with a recognizable header.
pub fn theme_css(name: &str) -> String {
    format!("/*\nTheme Name: {}\nVersion: 1.0\n*/\n", name)
}

/// Fetcher serving fixed bytes per URL.
#[derive(Debug, Default, Clone)]
pub struct StaticFetcher {
    responses: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), bytes);
        self
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| ProvisionError::fetch(url, "HTTP 404 Not Found"))
    }
}

/// Git source serving fixed trees per (url, ref, path).
#[derive(Debug, Default, Clone)]
pub struct StaticGit {
    trees: HashMap<(String, String, String), FileTree>,
}

impl StaticGit {
    pub fn with(mut self, url: &str, git_ref: &str, path: &str, tree: FileTree) -> Self {
        self.trees
            .insert((url.to_string(), git_ref.to_string(), path.to_string()), tree);
        self
    }
}

#[async_trait]
impl GitSource for StaticGit {
    async fn fetch_subtree(&self, url: &str, git_ref: &str, path: &str) -> Result<FileTree> {
        self.trees
            .get(&(url.to_string(), git_ref.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| {
                ProvisionError::fetch(format!("{}#{}:{}", url, git_ref, path), "no such ref")
            })
    }
}

/// Resolver over the given static sources.
pub fn static_resolver(fetcher: StaticFetcher, git: StaticGit) -> ResourceResolver {
    ResourceResolver::new(Arc::new(fetcher), Arc::new(git))
}
