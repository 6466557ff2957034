//! SQLite-backed [`VectorStore`] and [`TagRegistry`].
//!
//! Vectors are stored as little-endian f32 BLOBs next to their chunk text.
//! Search loads the candidate rows for one tag and ranks them by cosine
//! similarity in Rust.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use tagrag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use tagrag_core::models::{ChunkMetadata, EmbeddingRecord, ScoredRecord, Tag};
use tagrag_core::store::{rank, VectorStore};
use tagrag_core::tags::TagRegistry;

/// SQLite implementation of [`VectorStore`] over the `records` table.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of records stored under `tag`.
    pub async fn count(&self, tag: &Tag) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE tag = ?")
            .bind(tag.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let accepted = insert_records(&mut tx, &records).await?;
        tx.commit().await?;
        Ok(accepted)
    }

    async fn replace_document(
        &self,
        tag: &Tag,
        source_filename: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM records WHERE tag = ? AND source_filename = ?")
            .bind(tag.as_str())
            .bind(source_filename)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear records of {}", source_filename))?
            .rows_affected();
        let accepted = insert_records(&mut tx, &records).await?;
        tx.commit().await?;

        tracing::debug!(%tag, file = source_filename, removed, accepted, "replaced document records");
        Ok(accepted)
    }

    async fn search(&self, query: &[f32], tag: &Tag, top_k: usize) -> Result<Vec<ScoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, source_filename, sequence, text, embedding FROM records WHERE tag = ?",
        )
        .bind(tag.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let sequence: i64 = row.try_get("sequence")?;
            scored.push(ScoredRecord {
                id: row.try_get("id")?,
                text: row.try_get("text")?,
                metadata: ChunkMetadata {
                    tag: tag.clone(),
                    source_filename: row.try_get("source_filename")?,
                    sequence: usize::try_from(sequence).context("negative chunk sequence")?,
                },
                score: cosine_similarity(query, &blob_to_vec(&blob)),
            });
        }

        Ok(rank(scored, top_k))
    }
}

async fn insert_records(
    tx: &mut Transaction<'_, Sqlite>,
    records: &[EmbeddingRecord],
) -> Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let mut accepted = 0usize;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO records (id, tag, source_filename, sequence, text, hash,
                                 embedding, dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                hash = excluded.hash,
                embedding = excluded.embedding,
                dims = excluded.dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(record.metadata.tag.as_str())
        .bind(&record.metadata.source_filename)
        .bind(record.metadata.sequence as i64)
        .bind(&record.text)
        .bind(&record.hash)
        .bind(vec_to_blob(&record.vector))
        .bind(record.vector.len() as i64)
        .bind(now)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("Failed to write record {}", record.id))?;
        accepted += result.rows_affected() as usize;
    }

    Ok(accepted)
}

/// SQLite implementation of [`TagRegistry`].
///
/// The `UNIQUE` constraint on `tags.name` makes registration a single
/// atomic statement.
pub struct SqliteTagRegistry {
    pool: SqlitePool,
}

impl SqliteTagRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TagRegistry for SqliteTagRegistry {
    async fn list(&self) -> Result<Vec<Tag>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM tags ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;
        Ok(names.into_iter().map(Tag::new_unchecked).collect())
    }

    async fn register_if_absent(&self, tag: &Tag) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO tags (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(tag.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to register tag {}", tag))?;
        Ok(result.rows_affected() == 1)
    }
}
