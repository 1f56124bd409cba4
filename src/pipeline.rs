//! Pipeline executor: turns an [`IndexPlan`](crate::plan::IndexPlan) into
//! effects.
//!
//! The executor owns the three-stage run (download → chunk → embed) against
//! the collaborator traits and keeps the persisted [`RepositoryState`]
//! consistent at every step. State is written immediately after each stage's
//! completion or failure, never batched at the end of the run, so a crash
//! between stages leaves a record from which the next run's planner computes
//! a correct resumption plan.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use crate::changes::{diff_file_hashes, ChangeSet};
use crate::error::{Error, Result};
use crate::models::{RepoId, RepositoryState};
use crate::plan::{self, ChunkScope, ForceFlags};
use crate::traits::{EmbeddingProvider, FileChunker, IndexStore, SnapshotProvider};

pub struct Indexer {
    provider: Arc<dyn SnapshotProvider>,
    chunker: Arc<dyn FileChunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn IndexStore>,
    embed_batch_size: usize,
}

impl Indexer {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        chunker: Arc<dyn FileChunker>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn IndexStore>,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            provider,
            chunker,
            embedder,
            store,
            embed_batch_size: embed_batch_size.max(1),
        }
    }

    /// Index a repository, doing only the work the planner requires.
    ///
    /// Idempotent for unchanged content: a second call with no force flags
    /// performs no download/chunk/embed work and returns the same state.
    pub async fn index(&self, repo: &RepoId, force: ForceFlags) -> Result<RepositoryState> {
        let key = repo.to_string();

        println!("Checking repository {key}...");
        let snapshot = self.provider.resolve(repo).await?;

        let prior = self.store.get_repository(&key).await?;
        let plan = plan::plan(prior.as_ref(), &snapshot.commit_hash, force);

        if plan.is_noop() {
            // A no-op plan only arises from a fully evaluated prior state.
            if let Some(existing) = &prior {
                println!(
                    "Repository {key} is already fully indexed at commit {}.",
                    snapshot.commit_hash
                );
                return Ok(existing.clone());
            }
        }

        let mut state = match &prior {
            Some(p) => {
                let mut s = p.clone();
                s.url = snapshot.url.clone();
                s
            }
            None => RepositoryState::new(repo, &snapshot.url),
        };

        // Scratch space for fetched content, removed when the run ends on
        // any path.
        let scratch = TempDir::with_prefix("rsearch_")?;

        let mut tree_root: Option<PathBuf> = None;
        let mut changes: Option<ChangeSet> = None;

        if plan.download {
            println!("Fetching repository {key}...");
            match self
                .provider
                .fetch(repo, &snapshot.commit_hash, scratch.path())
                .await
            {
                Ok(tree) => {
                    if plan.chunk == ChunkScope::Changed {
                        // Diff against the hashes persisted before this
                        // download replaces them.
                        changes = Some(diff_file_hashes(&state.file_hashes, &tree.file_hashes));
                    }
                    state.commit_hash = Some(snapshot.commit_hash.clone());
                    state.file_hashes = tree.file_hashes;
                    state.num_files = state.file_hashes.len() as u64;
                    state.download_ok = true;
                    // Fresh content invalidates downstream stage results.
                    state.chunk_ok = false;
                    state.embed_ok = false;
                    self.store.put_repository(&state).await?;
                    tree_root = Some(tree.root);
                }
                Err(e) => {
                    // Record the observed commit identity when one was
                    // already on file, so the retry can diff instead of
                    // starting over. A failed first download leaves no
                    // identity to record.
                    if state.commit_hash.is_some() {
                        state.commit_hash = Some(snapshot.commit_hash.clone());
                    }
                    state.download_ok = false;
                    self.store.put_repository(&state).await?;
                    return Err(e);
                }
            }
        }

        if plan.chunk != ChunkScope::Skip {
            // Chunking reads files from disk. If the download stage was
            // skipped, materialize the recorded commit into scratch without
            // rerunning that stage's bookkeeping.
            let root = match &tree_root {
                Some(r) => r.clone(),
                None => {
                    match self
                        .provider
                        .fetch(repo, &snapshot.commit_hash, scratch.path())
                        .await
                    {
                        Ok(tree) => tree.root,
                        Err(e) => {
                            state.download_ok = false;
                            self.store.put_repository(&state).await?;
                            return Err(e);
                        }
                    }
                }
            };

            match self
                .run_chunk_stage(&key, plan.chunk, changes.as_ref(), &root)
                .await
            {
                Ok(stored) => {
                    state.chunk_ok = true;
                    state.embed_ok = false;
                    self.store.put_repository(&state).await?;
                    println!("Generated {stored} chunks.");
                }
                Err(e) => {
                    state.chunk_ok = false;
                    state.embed_ok = false;
                    self.store.put_repository(&state).await?;
                    return Err(e);
                }
            }
        }

        if plan.embed {
            match self.run_embed_stage(&key).await {
                Ok((embedded, total)) => {
                    state.num_chunks = total;
                    state.embed_ok = true;
                    state.last_indexed = Some(Utc::now());
                    self.store.put_repository(&state).await?;
                    println!("Embedded {embedded} chunks ({total} total).");
                }
                Err(e) => {
                    state.embed_ok = false;
                    self.store.put_repository(&state).await?;
                    return Err(e);
                }
            }
        }

        if let Err(e) = scratch.close() {
            eprintln!("Warning: could not clean up scratch directory: {e}");
        }

        Ok(state)
    }

    /// Execute the chunk stage for the given scope. Returns the number of
    /// chunk records stored.
    async fn run_chunk_stage(
        &self,
        repository: &str,
        scope: ChunkScope,
        changes: Option<&ChangeSet>,
        root: &Path,
    ) -> Result<usize> {
        let produced = match (scope, changes) {
            (ChunkScope::Changed, Some(set)) => {
                println!(
                    "Chunking {} changed files, removing {} deleted...",
                    set.changed.len(),
                    set.deleted.len()
                );

                for path in &set.deleted {
                    self.store.delete_chunks_for_file(repository, path).await?;
                }

                let mut chunks = Vec::new();
                for rel in &set.changed {
                    // A file's old chunks go before its new ones arrive so
                    // no file ever holds both generations.
                    self.store.delete_chunks_for_file(repository, rel).await?;

                    let path = root.join(rel);
                    if !path.is_file() {
                        continue;
                    }
                    match self.chunker.chunk_file(&path, rel, repository) {
                        Ok(file_chunks) => chunks.extend(file_chunks),
                        Err(e) if e.is_decode() => {
                            eprintln!("Skipping undecodable file: {rel}");
                        }
                        Err(e) => return Err(e),
                    }
                }
                chunks
            }
            _ => {
                println!("Chunking all repository contents...");
                self.store.delete_all_chunks(repository).await?;
                self.chunker.chunk_tree(root, repository)?
            }
        };

        self.store.store_chunks(&produced).await?;
        Ok(produced.len())
    }

    /// Embed every chunk of the repository that has no vector yet. Returns
    /// `(newly embedded, total chunks)`.
    async fn run_embed_stage(&self, repository: &str) -> Result<(u64, u64)> {
        let pending = self.store.pending_chunks(repository).await?;
        let mut embedded = 0u64;

        for batch in pending.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embed(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            let items: Vec<(String, Vec<f32>)> = batch
                .iter()
                .map(|c| c.id.clone())
                .zip(vectors)
                .collect();
            self.store
                .put_embeddings(self.embedder.model_name(), self.embedder.dims(), &items)
                .await?;
            embedded += batch.len() as u64;
        }

        let total = self.store.count_chunks(repository).await?;
        Ok((embedded, total))
    }
}
