//! Semantic search over the chunk store.
//!
//! Embeds the query, scans stored vectors with cosine similarity, and
//! returns the top matches. The scan is exhaustive; ordering is
//! deterministic (score descending, chunk id ascending on ties).

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::SearchResult;
use crate::traits::{EmbeddingProvider, IndexStore};

pub async fn semantic_search(
    store: &dyn IndexStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    repository: Option<&str>,
    limit: usize,
    score_threshold: f32,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embedder
        .embed(&[query.to_string()])
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    let candidates = store.embedded_chunks(repository).await?;

    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .filter_map(|chunk| {
            let vector = chunk.embedding.as_deref()?;
            let score = cosine_similarity(&query_vec, vector);
            if score < score_threshold {
                return None;
            }
            Some(SearchResult { chunk, score })
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(limit);

    Ok(results)
}
