//! # RepoSearch CLI (`rsearch`)
//!
//! Semantic search for GitHub repositories.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rsearch index <owner/name>` | Incrementally index a repository |
//! | `rsearch search "<query>"` | Search indexed repositories |
//! | `rsearch list` | Show indexed repositories and their stage status |
//! | `rsearch delete <owner/name>` | Remove a repository and its chunks |
//! | `rsearch clear` | Wipe the whole index |
//!
//! ## Examples
//!
//! ```bash
//! # First index downloads, chunks, and embeds everything
//! rsearch index rust-lang/log
//!
//! # Subsequent runs only re-process what changed
//! rsearch index rust-lang/log
//!
//! # Search across everything, or scoped to one repository
//! rsearch search "how is the global logger installed"
//! rsearch search "logger" --repository rust-lang/log --limit 5
//! ```
//!
//! Credentials come from the environment: `OPENAI_API_KEY` (required for
//! indexing and search), `GITHUB_TOKEN` (optional, raises rate limits).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use repo_search::chunk::TextChunker;
use repo_search::config::{load_config, Config};
use repo_search::embedding::OpenAiEmbedder;
use repo_search::github::GitHubFetcher;
use repo_search::models::RepoId;
use repo_search::pipeline::Indexer;
use repo_search::plan::ForceFlags;
use repo_search::search::semantic_search;
use repo_search::store::SqliteStore;
use repo_search::traits::IndexStore;

/// RepoSearch — incremental semantic indexing and search for GitHub
/// repositories.
#[derive(Parser)]
#[command(
    name = "rsearch",
    about = "Semantic search for GitHub repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file falls back to
    /// defaults.
    #[arg(long, global = true, default_value = "./reposearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a repository for semantic search.
    ///
    /// Incremental by default: if the repository's commit hash is unchanged
    /// and all stages previously succeeded, this is a no-op. Failed stages
    /// are retried without redoing the ones that succeeded.
    Index {
        /// Repository in `owner/name` format.
        repository: String,

        /// Redo every stage even if nothing changed.
        #[arg(long)]
        force_refresh: bool,

        /// Redo the download stage (chunk and embed follow).
        #[arg(long)]
        force_download: bool,

        /// Re-chunk the entire file set.
        #[arg(long)]
        force_chunk: bool,

        /// Re-run the embed stage.
        #[arg(long)]
        force_embed: bool,
    },

    /// Search indexed repositories.
    Search {
        /// The query text.
        query: String,

        /// Restrict results to one repository (`owner/name`).
        #[arg(long)]
        repository: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity score in [0, 1].
        #[arg(long)]
        score_threshold: Option<f32>,
    },

    /// List indexed repositories with their stage status.
    List,

    /// Remove a repository and all of its chunks from the index.
    Delete {
        /// Repository in `owner/name` format.
        repository: String,
    },

    /// Remove every repository and chunk from the index.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            repository,
            force_refresh,
            force_download,
            force_chunk,
            force_embed,
        } => {
            let repo = RepoId::parse(&repository)?;
            let force = ForceFlags {
                refresh: force_refresh,
                download: force_download,
                chunk: force_chunk,
                embed: force_embed,
            };
            let indexer = build_indexer(&config).await?;
            let state = indexer.index(&repo, force).await?;

            println!();
            println!("Indexed {}", state.repository);
            println!("  url: {}", state.url);
            println!(
                "  commit: {}",
                state.commit_hash.as_deref().unwrap_or("(none)")
            );
            println!("  files: {}", state.num_files);
            println!("  chunks: {}", state.num_chunks);
            if let Some(ts) = state.last_indexed {
                println!("  last indexed: {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }

        Commands::Search {
            query,
            repository,
            limit,
            score_threshold,
        } => {
            let store = SqliteStore::open(&config.storage.path).await?;
            let embedder = OpenAiEmbedder::new(&config.embedding)?;
            let results = semantic_search(
                &store,
                &embedder,
                &query,
                repository.as_deref(),
                limit.unwrap_or(config.search.max_results),
                score_threshold.unwrap_or(config.search.score_threshold),
            )
            .await?;

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, result) in results.iter().enumerate() {
                println!("{}. [{:.3}] {}", i + 1, result.score, result.source());
                let excerpt: String = result.chunk.content.chars().take(240).collect();
                println!("    {}", excerpt.replace('\n', " "));
                println!();
            }
        }

        Commands::List => {
            let store = SqliteStore::open(&config.storage.path).await?;
            let repositories = store.list_repositories().await?;

            if repositories.is_empty() {
                println!("No repositories indexed.");
                return Ok(());
            }

            for state in repositories {
                println!("{}", state.repository);
                println!(
                    "  commit: {}",
                    state.commit_hash.as_deref().unwrap_or("(none)")
                );
                println!("  files: {}, chunks: {}", state.num_files, state.num_chunks);
                println!(
                    "  stages: download {}, chunk {}, embed {}",
                    status(state.download_ok),
                    status(state.chunk_ok),
                    status(state.embed_ok)
                );
                if let Some(ts) = state.last_indexed {
                    println!("  last indexed: {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
        }

        Commands::Delete { repository } => {
            let store = SqliteStore::open(&config.storage.path).await?;
            if store.delete_repository(&repository).await? {
                println!("Deleted {repository}.");
            } else {
                println!("Repository {repository} is not indexed.");
            }
        }

        Commands::Clear => {
            let store = SqliteStore::open(&config.storage.path).await?;
            store.clear().await?;
            println!("Cleared the index.");
        }
    }

    Ok(())
}

async fn build_indexer(config: &Config) -> Result<Indexer> {
    let store = Arc::new(SqliteStore::open(&config.storage.path).await?);
    let provider = Arc::new(GitHubFetcher::new(config.github.timeout_secs)?);
    let chunker = Arc::new(TextChunker::new(
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
        config.chunking.max_tokens,
    ));
    let embedder = Arc::new(OpenAiEmbedder::new(&config.embedding)?);

    Ok(Indexer::new(
        provider,
        chunker,
        embedder,
        store,
        config.embedding.batch_size,
    ))
}

fn status(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "failed"
    }
}
