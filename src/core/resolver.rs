//! WF-006: Resource resolution — turn a resource reference into content.
//!
//! Network and repository access sit behind the [`Fetcher`] and
//! [`GitSource`] seams so the engine can be driven offline. Resolution
//! never touches the destination runtime.

use super::codegen;
use super::error::{ProvisionError, Result};
use super::types::{Content, DirectoryResource, FileResource, FileTree, ResourceReference};
use crate::runtime::host::read_host_tree;
use crate::transport;
use async_trait::async_trait;
use std::sync::Arc;

const PLUGIN_DOWNLOADS: &str = "https://downloads.wordpress.org/plugin";
const THEME_DOWNLOADS: &str = "https://downloads.wordpress.org/theme";

/// Byte download by URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Single-subtree checkout of a repository at a ref.
#[async_trait]
pub trait GitSource: Send + Sync {
    /// Files below `path` at `git_ref`, relative to `path`.
    async fn fetch_subtree(&self, url: &str, git_ref: &str, path: &str) -> Result<FileTree>;
}

/// Default resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub user_agent: String,
    pub git_binary: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("wpforge/{}", env!("CARGO_PKG_VERSION")),
            git_binary: "git".to_string(),
        }
    }
}

/// HTTP(S) fetcher. Non-2xx responses are failures; no retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProvisionError::fetch("http client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "fetching");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProvisionError::fetch(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProvisionError::fetch(url, format!("HTTP {}", status)));
        }
        let body = resp.bytes().await.map_err(|e| ProvisionError::fetch(url, e))?;
        tracing::debug!(url, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }
}

/// `git` command-line checkout into a temporary directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    git: String,
}

impl GitCli {
    pub fn new(git: impl Into<String>) -> Self {
        Self { git: git.into() }
    }
}

#[async_trait]
impl GitSource for GitCli {
    async fn fetch_subtree(&self, url: &str, git_ref: &str, path: &str) -> Result<FileTree> {
        let locator = format!("{}#{}:{}", url, git_ref, path);
        let dir = tempfile::tempdir().map_err(|e| ProvisionError::fetch(&locator, e))?;
        let script = codegen::git_subtree_script(&self.git, url, git_ref, path);
        tracing::debug!(url, git_ref, path, "git checkout");

        let out = transport::exec_script(script, Some(dir.path().to_path_buf()))
            .await
            .map_err(|e| ProvisionError::fetch(&locator, e))?;
        if !out.success() {
            return Err(ProvisionError::fetch(&locator, out.failure_detail()));
        }

        let sub = path.trim_matches('/');
        let root = if sub.is_empty() {
            dir.path().to_path_buf()
        } else {
            dir.path().join(sub)
        };
        let tree = tokio::task::spawn_blocking(move || read_host_tree(&root))
            .await
            .map_err(|e| ProvisionError::fetch(&locator, e))??;
        let mut files = FileTree::new();
        for (k, data) in tree.iter().filter(|(k, _)| *k != ".git" && !k.starts_with(".git/")) {
            files.insert(k, data)?;
        }
        if files.is_empty() {
            return Err(ProvisionError::fetch(
                &locator,
                "path not found in repository",
            ));
        }
        Ok(files)
    }
}

/// Resolves references through the configured fetcher and git source.
#[derive(Clone)]
pub struct ResourceResolver {
    fetcher: Arc<dyn Fetcher>,
    git: Arc<dyn GitSource>,
}

impl ResourceResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, git: Arc<dyn GitSource>) -> Self {
        Self { fetcher, git }
    }

    /// HTTP fetcher plus git CLI.
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(HttpFetcher::new(config)?),
            Arc::new(GitCli::new(config.git_binary.clone())),
        ))
    }

    pub async fn resolve(&self, reference: &ResourceReference) -> Result<Content> {
        match reference {
            ResourceReference::ArchiveByUrl { url } => {
                let bytes = self.fetcher.fetch(url).await?;
                Ok(Content::File(FileResource {
                    name: url_file_name(url),
                    bytes,
                }))
            }
            ResourceReference::CorePlugin { slug } => {
                self.fetch_named(&core_download_url(PLUGIN_DOWNLOADS, slug), slug)
                    .await
            }
            ResourceReference::CoreTheme { slug } => {
                self.fetch_named(&core_download_url(THEME_DOWNLOADS, slug), slug)
                    .await
            }
            ResourceReference::ArchiveUpload { name, contents } => {
                Ok(Content::File(FileResource {
                    name: name.clone(),
                    bytes: contents.clone(),
                }))
            }
            ResourceReference::RepositorySubtree { url, git_ref, path } => {
                let files = self.git.fetch_subtree(url, git_ref, path).await?;
                Ok(Content::Directory(DirectoryResource {
                    name: subtree_name(url, path),
                    files,
                }))
            }
            ResourceReference::Literal { name, files } => {
                let mut tree = FileTree::new();
                for (path, contents) in files {
                    tree.insert(path, contents.as_bytes())?;
                }
                Ok(Content::Directory(DirectoryResource {
                    name: name.clone(),
                    files: tree,
                }))
            }
        }
    }

    async fn fetch_named(&self, url: &str, slug: &str) -> Result<Content> {
        let bytes = self.fetcher.fetch(url).await?;
        Ok(Content::File(FileResource {
            name: format!("{}.zip", slug),
            bytes,
        }))
    }
}

/// Download URL of a wordpress.org directory entry.
pub fn core_download_url(base: &str, slug: &str) -> String {
    format!("{}/{}.zip", base, slug)
}

/// Last path segment of a URL, without query or fragment.
pub fn url_file_name(url: &str) -> String {
    let without_query = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url);
    let without_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let mut segments = without_scheme.split('/').filter(|s| !s.is_empty());
    let host = segments.next().unwrap_or_default();
    segments.last().unwrap_or(host).to_string()
}

/// Name of a checked-out subtree: its last path component, or the
/// repository name for the whole tree.
pub fn subtree_name(url: &str, path: &str) -> String {
    let component = path.trim_matches('/').rsplit('/').next().unwrap_or_default();
    if !component.is_empty() {
        return component.to_string();
    }
    let repo = url_file_name(url);
    repo.strip_suffix(".git").unwrap_or(&repo).to_string()
}
