//! Collaborator seams consumed by the indexing pipeline.
//!
//! The pipeline core ([`crate::plan`], [`crate::pipeline`]) never talks to
//! GitHub, the filesystem chunker, the embedding API, or SQLite directly; it
//! goes through these traits. Production wiring lives in [`crate::github`],
//! [`crate::chunk`], [`crate::embedding`], and [`crate::store`]; tests swap
//! in in-memory fakes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkRecord, RepoId, RepositoryState};

/// Identity of a repository snapshot, resolved without downloading content.
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    pub commit_hash: String,
    pub url: String,
}

/// Result of materializing a snapshot's text files on local disk.
#[derive(Debug, Clone)]
pub struct FetchedTree {
    /// Relative path → content hash for every materialized file.
    pub file_hashes: BTreeMap<String, String>,
    /// Directory under which the files were written.
    pub root: PathBuf,
}

/// Provides repository snapshots: identity resolution and content download.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Resolve the current commit hash for a repository.
    ///
    /// Fails with [`crate::error::Error::Resolve`] if the identifier is
    /// malformed or the repository is inaccessible.
    async fn resolve(&self, repo: &RepoId) -> Result<RepoSnapshot>;

    /// Materialize the text files of `commit` under `dest` and return their
    /// content hashes.
    ///
    /// Fails with [`crate::error::Error::Download`] on network or auth
    /// failure.
    async fn fetch(&self, repo: &RepoId, commit: &str, dest: &Path) -> Result<FetchedTree>;
}

/// Splits source files into chunk records.
pub trait FileChunker: Send + Sync {
    /// Chunk a single file. `rel_path` is the repository-relative path
    /// recorded on the chunks.
    ///
    /// Fails with [`crate::error::Error::Decode`] for unreadable content;
    /// callers treat that as a per-file skip.
    fn chunk_file(&self, path: &Path, rel_path: &str, repository: &str)
        -> Result<Vec<ChunkRecord>>;

    /// Chunk every text file under `root`. Per-file decode failures are
    /// skipped internally; only structural errors surface.
    fn chunk_tree(&self, root: &Path, repository: &str) -> Result<Vec<ChunkRecord>>;
}

/// Computes embedding vectors for batches of texts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    /// Embed one batch, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Persistence for repository states, chunks, and embedding vectors.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get_repository(&self, repository: &str) -> Result<Option<RepositoryState>>;

    /// Upsert with full-replace semantics.
    async fn put_repository(&self, state: &RepositoryState) -> Result<()>;

    async fn list_repositories(&self) -> Result<Vec<RepositoryState>>;

    /// Remove a repository and all of its chunks. Returns false if the
    /// repository was not present.
    async fn delete_repository(&self, repository: &str) -> Result<bool>;

    /// Delete every chunk of a repository (and their vectors).
    async fn delete_all_chunks(&self, repository: &str) -> Result<u64>;

    /// Delete the chunks of a single file (and their vectors). The deletion
    /// is transactional: old chunks disappear before replacements are
    /// written by a following [`store_chunks`](Self::store_chunks).
    async fn delete_chunks_for_file(&self, repository: &str, file_path: &str) -> Result<u64>;

    /// Insert chunk records (without vectors). Idempotent on chunk id.
    async fn store_chunks(&self, chunks: &[ChunkRecord]) -> Result<()>;

    /// Chunks of a repository that have no embedding vector yet.
    async fn pending_chunks(&self, repository: &str) -> Result<Vec<ChunkRecord>>;

    /// Upsert embedding vectors for the given chunk ids.
    async fn put_embeddings(&self, model: &str, dims: usize, items: &[(String, Vec<f32>)])
        -> Result<()>;

    /// Chunks that carry an embedding vector, optionally filtered to one
    /// repository. Used by the search scan.
    async fn embedded_chunks(&self, repository: Option<&str>) -> Result<Vec<ChunkRecord>>;

    async fn count_chunks(&self, repository: &str) -> Result<u64>;

    /// Wipe everything.
    async fn clear(&self) -> Result<()>;
}
