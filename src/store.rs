//! SQLite-backed index store.
//!
//! Persists repository states, chunks, and embedding vectors. All multi-row
//! mutations run inside a transaction so a file's old chunks are gone before
//! its replacements land, and a repository delete never leaves orphans.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Result;
use crate::migrate;
use crate::models::{ChunkKind, ChunkRecord, RepositoryState};
use crate::traits::IndexStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path`, creating it and the schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn row_to_state(row: &SqliteRow) -> Result<RepositoryState> {
    let file_hashes_json: String = row.get("file_hashes");
    let file_hashes: BTreeMap<String, String> = serde_json::from_str(&file_hashes_json)?;
    let last_indexed: Option<i64> = row.get("last_indexed");

    Ok(RepositoryState {
        repository: row.get("repository"),
        url: row.get("url"),
        commit_hash: row.get("commit_hash"),
        file_hashes,
        download_ok: row.get::<i64, _>("download_ok") != 0,
        chunk_ok: row.get::<i64, _>("chunk_ok") != 0,
        embed_ok: row.get::<i64, _>("embed_ok") != 0,
        num_files: row.get::<i64, _>("num_files") as u64,
        num_chunks: row.get::<i64, _>("num_chunks") as u64,
        last_indexed: last_indexed.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
    })
}

fn row_to_chunk(row: &SqliteRow, embedding: Option<Vec<f32>>) -> ChunkRecord {
    let kind: String = row.get("kind");
    ChunkRecord {
        id: row.get("id"),
        repository: row.get("repository"),
        file_path: row.get("file_path"),
        kind: ChunkKind::from_str_or_text(&kind),
        start_line: row.get::<Option<i64>, _>("start_line").map(|v| v as u32),
        end_line: row.get::<Option<i64>, _>("end_line").map(|v| v as u32),
        content: row.get("content"),
        embedding,
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn get_repository(&self, repository: &str) -> Result<Option<RepositoryState>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE repository = ?")
            .bind(repository)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn put_repository(&self, state: &RepositoryState) -> Result<()> {
        let file_hashes = serde_json::to_string(&state.file_hashes)?;

        sqlx::query(
            r#"
            INSERT INTO repositories
                (repository, url, commit_hash, file_hashes, download_ok, chunk_ok,
                 embed_ok, num_files, num_chunks, last_indexed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repository) DO UPDATE SET
                url = excluded.url,
                commit_hash = excluded.commit_hash,
                file_hashes = excluded.file_hashes,
                download_ok = excluded.download_ok,
                chunk_ok = excluded.chunk_ok,
                embed_ok = excluded.embed_ok,
                num_files = excluded.num_files,
                num_chunks = excluded.num_chunks,
                last_indexed = excluded.last_indexed
            "#,
        )
        .bind(&state.repository)
        .bind(&state.url)
        .bind(&state.commit_hash)
        .bind(&file_hashes)
        .bind(state.download_ok as i64)
        .bind(state.chunk_ok as i64)
        .bind(state.embed_ok as i64)
        .bind(state.num_files as i64)
        .bind(state.num_chunks as i64)
        .bind(state.last_indexed.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_repositories(&self) -> Result<Vec<RepositoryState>> {
        let rows = sqlx::query("SELECT * FROM repositories ORDER BY repository")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_state).collect()
    }

    async fn delete_repository(&self, repository: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE repository = ?)",
        )
        .bind(repository)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE repository = ?")
            .bind(repository)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM repositories WHERE repository = ?")
            .bind(repository)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_chunks(&self, repository: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE repository = ?)",
        )
        .bind(repository)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM chunks WHERE repository = ?")
            .bind(repository)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn delete_chunks_for_file(&self, repository: &str, file_path: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN \
             (SELECT id FROM chunks WHERE repository = ? AND file_path = ?)",
        )
        .bind(repository)
        .bind(file_path)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM chunks WHERE repository = ? AND file_path = ?")
            .bind(repository)
            .bind(file_path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn store_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, repository, file_path, kind, start_line, end_line, content)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    repository = excluded.repository,
                    file_path = excluded.file_path,
                    kind = excluded.kind,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    content = excluded.content
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.repository)
            .bind(&chunk.file_path)
            .bind(chunk.kind.as_str())
            .bind(chunk.start_line.map(|v| v as i64))
            .bind(chunk.end_line.map(|v| v as i64))
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn pending_chunks(&self, repository: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id
            WHERE c.repository = ? AND e.chunk_id IS NULL
            ORDER BY c.file_path, c.start_line
            "#,
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| row_to_chunk(r, None)).collect())
    }

    async fn put_embeddings(
        &self,
        model: &str,
        dims: usize,
        items: &[(String, Vec<f32>)],
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for (chunk_id, vector) in items {
            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_id, model, dims, embedding, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    created_at = excluded.created_at
                "#,
            )
            .bind(chunk_id)
            .bind(model)
            .bind(dims as i64)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn embedded_chunks(&self, repository: Option<&str>) -> Result<Vec<ChunkRecord>> {
        let rows = match repository {
            Some(repo) => {
                sqlx::query(
                    r#"
                    SELECT c.*, e.embedding AS vector FROM chunks c
                    JOIN embeddings e ON e.chunk_id = c.id
                    WHERE c.repository = ?
                    "#,
                )
                .bind(repo)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT c.*, e.embedding AS vector FROM chunks c
                    JOIN embeddings e ON e.chunk_id = c.id
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                row_to_chunk(row, Some(blob_to_vec(&blob)))
            })
            .collect())
    }

    async fn count_chunks(&self, repository: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE repository = ?")
            .bind(repository)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM embeddings").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM repositories").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RepoId;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    fn chunk(id: &str, repo: &str, path: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            repository: repo.to_string(),
            file_path: path.to_string(),
            kind: ChunkKind::Text,
            start_line: Some(1),
            end_line: Some(5),
            content: format!("content of {id}"),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn test_repository_roundtrip() {
        let (_dir, store) = open_store().await;
        let repo = RepoId::parse("a/b").unwrap();

        assert!(store.get_repository("a/b").await.unwrap().is_none());

        let mut state = RepositoryState::new(&repo, "https://github.com/a/b");
        state.commit_hash = Some("c1".to_string());
        state
            .file_hashes
            .insert("x.py".to_string(), "h1".to_string());
        state.download_ok = true;
        state.num_files = 1;
        store.put_repository(&state).await.unwrap();

        let loaded = store.get_repository("a/b").await.unwrap().unwrap();
        assert_eq!(loaded.commit_hash.as_deref(), Some("c1"));
        assert_eq!(loaded.file_hashes.get("x.py").map(String::as_str), Some("h1"));
        assert!(loaded.download_ok);
        assert!(!loaded.chunk_ok);

        // full-replace upsert
        state.chunk_ok = true;
        state.file_hashes.clear();
        store.put_repository(&state).await.unwrap();
        let loaded = store.get_repository("a/b").await.unwrap().unwrap();
        assert!(loaded.chunk_ok);
        assert!(loaded.file_hashes.is_empty());
    }

    #[tokio::test]
    async fn test_list_repositories_sorted() {
        let (_dir, store) = open_store().await;
        for name in ["z/z", "a/a", "m/m"] {
            let repo = RepoId::parse(name).unwrap();
            store
                .put_repository(&RepositoryState::new(&repo, ""))
                .await
                .unwrap();
        }
        let listed = store.list_repositories().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|s| s.repository.as_str()).collect();
        assert_eq!(names, vec!["a/a", "m/m", "z/z"]);
    }

    #[tokio::test]
    async fn test_store_chunks_is_idempotent() {
        let (_dir, store) = open_store().await;
        let chunks = vec![chunk("c1", "a/b", "x.py"), chunk("c2", "a/b", "x.py")];

        store.store_chunks(&chunks).await.unwrap();
        store.store_chunks(&chunks).await.unwrap();

        assert_eq!(store.count_chunks("a/b").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_chunks_for_file_cascades_embeddings() {
        let (_dir, store) = open_store().await;
        store
            .store_chunks(&[
                chunk("c1", "a/b", "x.py"),
                chunk("c2", "a/b", "y.md"),
            ])
            .await
            .unwrap();
        store
            .put_embeddings("m", 2, &[("c1".to_string(), vec![1.0, 0.0])])
            .await
            .unwrap();

        let removed = store.delete_chunks_for_file("a/b", "x.py").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_chunks("a/b").await.unwrap(), 1);

        // c1's vector went with it; c2 is still pending
        let embedded = store.embedded_chunks(Some("a/b")).await.unwrap();
        assert!(embedded.is_empty());
        let pending = store.pending_chunks("a/b").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c2");
    }

    #[tokio::test]
    async fn test_pending_then_embedded_flow() {
        let (_dir, store) = open_store().await;
        store
            .store_chunks(&[chunk("c1", "a/b", "x.py"), chunk("c2", "a/b", "y.md")])
            .await
            .unwrap();

        assert_eq!(store.pending_chunks("a/b").await.unwrap().len(), 2);

        store
            .put_embeddings(
                "m",
                2,
                &[
                    ("c1".to_string(), vec![1.0, 0.0]),
                    ("c2".to_string(), vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        assert!(store.pending_chunks("a/b").await.unwrap().is_empty());
        let embedded = store.embedded_chunks(Some("a/b")).await.unwrap();
        assert_eq!(embedded.len(), 2);
        assert!(embedded.iter().all(|c| c.embedding.is_some()));
    }

    #[tokio::test]
    async fn test_delete_repository_removes_everything() {
        let (_dir, store) = open_store().await;
        let repo = RepoId::parse("a/b").unwrap();
        store
            .put_repository(&RepositoryState::new(&repo, ""))
            .await
            .unwrap();
        store.store_chunks(&[chunk("c1", "a/b", "x.py")]).await.unwrap();
        store
            .put_embeddings("m", 1, &[("c1".to_string(), vec![1.0])])
            .await
            .unwrap();

        assert!(store.delete_repository("a/b").await.unwrap());
        assert!(store.get_repository("a/b").await.unwrap().is_none());
        assert_eq!(store.count_chunks("a/b").await.unwrap(), 0);
        assert!(store.embedded_chunks(None).await.unwrap().is_empty());

        // second delete reports not found
        assert!(!store.delete_repository("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_chunks_scoped_per_repository() {
        let (_dir, store) = open_store().await;
        store
            .store_chunks(&[chunk("c1", "a/b", "x.py"), chunk("c2", "c/d", "x.py")])
            .await
            .unwrap();

        store.delete_all_chunks("a/b").await.unwrap();
        assert_eq!(store.count_chunks("a/b").await.unwrap(), 0);
        assert_eq!(store.count_chunks("c/d").await.unwrap(), 1);
    }
}
