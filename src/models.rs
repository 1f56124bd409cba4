//! Core data models used throughout the indexing pipeline.
//!
//! These types represent repository identifiers, the persisted per-repository
//! indexing state, the chunks derived from source files, and search results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A repository identifier in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    /// Parse an `owner/name` string. Both components must be non-empty and
    /// the name must not itself contain a slash.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::resolve(s, "expected format: owner/name")),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Persisted indexing state, one row per repository.
///
/// The three `*_ok` flags record per-stage success on the current
/// `commit_hash`. They are only meaningful as a chain: `chunk_ok` implies
/// `download_ok`, and `embed_ok` implies `chunk_ok`. The pipeline persists
/// this record after every stage so an interrupted run leaves a resumable,
/// not corrupted, record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryState {
    /// Unique key, `owner/name`.
    pub repository: String,
    /// Web URL of the repository.
    pub url: String,
    /// Commit hash of the last observed content snapshot. `None` until a
    /// snapshot identity has been recorded for this repository.
    pub commit_hash: Option<String>,
    /// Relative file path → content hash, as of the last successful download.
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    pub download_ok: bool,
    pub chunk_ok: bool,
    pub embed_ok: bool,
    pub num_files: u64,
    pub num_chunks: u64,
    /// Set when the embed stage last completed successfully.
    pub last_indexed: Option<DateTime<Utc>>,
}

impl RepositoryState {
    pub fn new(repo: &RepoId, url: &str) -> Self {
        Self {
            repository: repo.to_string(),
            url: url.to_string(),
            commit_hash: None,
            file_hashes: BTreeMap::new(),
            download_ok: false,
            chunk_ok: false,
            embed_ok: false,
            num_files: 0,
            num_chunks: 0,
            last_indexed: None,
        }
    }

    /// All three stages completed on the current commit.
    pub fn is_fully_indexed(&self) -> bool {
        self.download_ok && self.chunk_ok && self.embed_ok
    }
}

/// Strategy tag recorded on each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Markdown,
    Text,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }

    pub fn from_str_or_text(s: &str) -> Self {
        match s {
            "code" => Self::Code,
            "markdown" => Self::Markdown,
            _ => Self::Text,
        }
    }
}

/// A retrievable unit of content derived from one source file.
///
/// The id is deterministic (UUID v5 over `repository/path:start-end`), so
/// re-chunking unchanged content produces identical ids and upserts cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub repository: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub content: String,
    /// Assigned by the embed stage; `None` until then.
    pub embedding: Option<Vec<f32>>,
}

/// A chunk plus its similarity score, returned from semantic search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: ChunkRecord,
    pub score: f32,
}

impl SearchResult {
    /// Human-readable source description, e.g. `owner/name - path:10-42`.
    pub fn source(&self) -> String {
        match (self.chunk.start_line, self.chunk.end_line) {
            (Some(start), Some(end)) => format!(
                "{} - {}:{}-{}",
                self.chunk.repository, self.chunk.file_path, start, end
            ),
            _ => format!("{} - {}", self.chunk.repository, self.chunk.file_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_id_parse() {
        let id = RepoId::parse("rust-lang/cargo").unwrap();
        assert_eq!(id.owner, "rust-lang");
        assert_eq!(id.name, "cargo");
        assert_eq!(id.to_string(), "rust-lang/cargo");
    }

    #[test]
    fn test_repo_id_rejects_malformed() {
        assert!(RepoId::parse("no-slash").is_err());
        assert!(RepoId::parse("/name").is_err());
        assert!(RepoId::parse("owner/").is_err());
        assert!(RepoId::parse("a/b/c").is_err());
        assert!(RepoId::parse("").is_err());
    }

    #[test]
    fn test_state_roundtrip() {
        let repo = RepoId::parse("a/b").unwrap();
        let mut state = RepositoryState::new(&repo, "https://github.com/a/b");
        state.commit_hash = Some("abc123".to_string());
        state
            .file_hashes
            .insert("src/main.rs".to_string(), "h1".to_string());
        state.download_ok = true;

        let json = serde_json::to_string(&state).unwrap();
        let restored: RepositoryState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn test_fully_indexed_requires_all_flags() {
        let repo = RepoId::parse("a/b").unwrap();
        let mut state = RepositoryState::new(&repo, "");
        assert!(!state.is_fully_indexed());
        state.download_ok = true;
        state.chunk_ok = true;
        assert!(!state.is_fully_indexed());
        state.embed_ok = true;
        assert!(state.is_fully_indexed());
    }

    #[test]
    fn test_search_result_source() {
        let chunk = ChunkRecord {
            id: "c1".to_string(),
            repository: "a/b".to_string(),
            file_path: "src/lib.rs".to_string(),
            kind: ChunkKind::Code,
            start_line: Some(3),
            end_line: Some(9),
            content: String::new(),
            embedding: None,
        };
        let result = SearchResult { chunk, score: 0.9 };
        assert_eq!(result.source(), "a/b - src/lib.rs:3-9");
    }
}
