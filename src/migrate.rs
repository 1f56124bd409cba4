use sqlx::SqlitePool;

use crate::error::Result;

/// Create the schema. Idempotent; run at startup before any store operation.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            repository TEXT PRIMARY KEY,
            url TEXT NOT NULL DEFAULT '',
            commit_hash TEXT,
            file_hashes TEXT NOT NULL DEFAULT '{}',
            download_ok INTEGER NOT NULL DEFAULT 0,
            chunk_ok INTEGER NOT NULL DEFAULT 0,
            embed_ok INTEGER NOT NULL DEFAULT 0,
            num_files INTEGER NOT NULL DEFAULT 0,
            num_chunks INTEGER NOT NULL DEFAULT 0,
            last_indexed INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            file_path TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'text',
            start_line INTEGER,
            end_line INTEGER,
            content TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_repository ON chunks(repository)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_repo_path ON chunks(repository, file_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
