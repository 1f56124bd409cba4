//! GitHub snapshot provider.
//!
//! Talks to the GitHub REST API to resolve a repository's latest commit and
//! to materialize its text files on disk:
//!
//! 1. `GET /repos/{owner}/{name}/commits?per_page=1` — latest commit hash.
//! 2. `GET /repos/{owner}/{name}/git/trees/{sha}?recursive=1` — full tree
//!    listing; blob SHAs double as per-file content hashes.
//! 3. `GET /repos/{owner}/{name}/git/blobs/{sha}` — base64 file content.
//!
//! Only text-classified paths under the size cap are downloaded; everything
//! else never enters `file_hashes`. A `GITHUB_TOKEN` environment variable,
//! when present, is sent as a bearer token (anonymous access works but rate
//! limits are strict).

use std::collections::BTreeMap;
use std::path::{Component, Path};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::chunk::{is_text_path, MAX_TEXT_FILE_SIZE};
use crate::error::{Error, Result};
use crate::models::RepoId;
use crate::traits::{FetchedTree, RepoSnapshot, SnapshotProvider};

const DEFAULT_API_BASE: &str = "https://api.github.com";

pub struct GitHubFetcher {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CommitEntry {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

#[derive(Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

impl GitHubFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rsearch/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token: std::env::var("GITHUB_TOKEN").ok(),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.to_string();
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }

    async fn fetch_blob(&self, repo: &RepoId, sha: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/repos/{}/{}/git/blobs/{}",
            self.api_base, repo.owner, repo.name, sha
        );
        let resp = self
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::download(repo.to_string(), e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::download(
                repo.to_string(),
                format!("blob {sha}: HTTP {}", resp.status()),
            ));
        }

        let blob: BlobResponse = resp
            .json()
            .await
            .map_err(|e| Error::download(repo.to_string(), format!("blob {sha}: {e}")))?;

        if blob.encoding != "base64" {
            return Err(Error::decode(
                sha,
                format!("unsupported blob encoding '{}'", blob.encoding),
            ));
        }

        decode_blob_content(&blob.content).map_err(|e| Error::decode(sha, e.to_string()))
    }
}

/// Blob payloads arrive base64-encoded with embedded newlines.
fn decode_blob_content(content: &str) -> Result<Vec<u8>> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| Error::decode("blob", e.to_string()))
}

/// Reject tree paths that would escape the destination directory.
fn is_safe_rel_path(path: &str) -> bool {
    let p = Path::new(path);
    !p.is_absolute()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait]
impl SnapshotProvider for GitHubFetcher {
    async fn resolve(&self, repo: &RepoId) -> Result<RepoSnapshot> {
        let url = format!(
            "{}/repos/{}/{}/commits?per_page=1",
            self.api_base, repo.owner, repo.name
        );
        let resp = self
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::resolve(repo.to_string(), e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::resolve(
                repo.to_string(),
                format!("HTTP {}", resp.status()),
            ));
        }

        let commits: Vec<CommitEntry> = resp
            .json()
            .await
            .map_err(|e| Error::resolve(repo.to_string(), e.to_string()))?;

        let head = commits
            .into_iter()
            .next()
            .ok_or_else(|| Error::resolve(repo.to_string(), "repository has no commits"))?;

        Ok(RepoSnapshot {
            commit_hash: head.sha,
            url: format!("https://github.com/{}/{}", repo.owner, repo.name),
        })
    }

    async fn fetch(&self, repo: &RepoId, commit: &str, dest: &Path) -> Result<FetchedTree> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, repo.owner, repo.name, commit
        );
        let resp = self
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::download(repo.to_string(), e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::download(
                repo.to_string(),
                format!("tree listing: HTTP {}", resp.status()),
            ));
        }

        let listing: TreeResponse = resp
            .json()
            .await
            .map_err(|e| Error::download(repo.to_string(), e.to_string()))?;

        if listing.truncated {
            eprintln!(
                "Warning: tree listing for {} is truncated; some files will be missed",
                repo
            );
        }

        let wanted: Vec<&TreeEntry> = listing
            .tree
            .iter()
            .filter(|e| e.kind == "blob")
            .filter(|e| is_text_path(&e.path) && is_safe_rel_path(&e.path))
            .filter(|e| e.size.unwrap_or(0) <= MAX_TEXT_FILE_SIZE)
            .collect();

        println!("Downloading {} files from {}...", wanted.len(), repo);

        let mut file_hashes = BTreeMap::new();
        for entry in &wanted {
            let bytes = match self.fetch_blob(repo, &entry.sha).await {
                Ok(b) => b,
                Err(e) if e.is_decode() => {
                    eprintln!("Skipping {}: {}", entry.path, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let target = dest.join(&entry.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, bytes)?;

            file_hashes.insert(entry.path.clone(), entry.sha.clone());
        }

        println!(
            "Downloaded {} of {} files from {}",
            file_hashes.len(),
            wanted.len(),
            repo
        );

        Ok(FetchedTree {
            file_hashes,
            root: dest.to_path_buf(),
        })
    }
}
