//! Error taxonomy for the indexing pipeline.
//!
//! Every stage failure maps to a distinct variant so the executor can decide
//! what to persist and what to propagate:
//!
//! | Variant | Scope | Effect |
//! |---------|-------|--------|
//! | [`Error::Resolve`] | whole run | fatal, nothing new persisted |
//! | [`Error::Download`] | whole run | fatal, `download_ok=false` persisted |
//! | [`Error::Decode`] | one file | file skipped, never escalates |
//! | [`Error::Chunk`] | chunk stage | fatal, `chunk_ok=false` persisted |
//! | [`Error::Embed`] | embed stage | fatal, `embed_ok=false` persisted |
//! | [`Error::Store`] | current stage | fatal, stage flag persisted |

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The repository identifier is malformed, unknown, or unreachable.
    #[error("cannot resolve repository '{repository}': {message}")]
    Resolve { repository: String, message: String },

    /// Fetching repository content failed (network, auth, rate limit).
    #[error("download failed for '{repository}': {message}")]
    Download { repository: String, message: String },

    /// A single file could not be decoded as text. Recoverable: the file is
    /// omitted from the run, the stage continues.
    #[error("cannot decode '{path}': {message}")]
    Decode { path: String, message: String },

    /// Structural chunk-stage failure (not a per-file decode problem).
    #[error("chunk stage failed: {0}")]
    Chunk(String),

    /// Embedding provider failure after retries, or a missing credential.
    #[error("embed stage failed: {0}")]
    Embed(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn resolve(repository: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            repository: repository.into(),
            message: message.into(),
        }
    }

    pub fn download(repository: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            repository: repository.into(),
            message: message.into(),
        }
    }

    pub fn decode(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for per-file decode failures, which are skipped rather than
    /// escalated.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
