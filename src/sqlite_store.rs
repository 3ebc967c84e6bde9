//! SQLite-backed [`Store`] implementation.
//!
//! Chunks, metadata and vectors live in a single `chunks` table (see
//! [`crate::migrate`]). Vector search is brute-force cosine distance over
//! the stored BLOBs, which is fine at wiki scale.
//!
//! Writers are serialized by an async mutex, and [`Store::rebuild`] runs
//! its delete and inserts inside one transaction. Under WAL, concurrent
//! readers keep seeing the previous index until the rebuild commits.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use farmhand_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use farmhand_core::models::{ChunkMetadata, ChunkRecord, SearchHit};
use farmhand_core::store::{check_batch, rank_hits, MetadataFilter, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record a key/value fact about the current index (model, dims, page count).
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn meta(&self) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM index_meta")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<String, _>("value")))
            .collect())
    }

    /// Number of distinct page URLs in the index.
    pub async fn page_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT url) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

async fn insert_chunks(
    tx: &mut Transaction<'_, Sqlite>,
    chunks: &[ChunkRecord],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, url, title, source_type, chunk_index, content, hash,
                                metadata_json, embedding, dims, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                source_type = excluded.source_type,
                chunk_index = excluded.chunk_index,
                content = excluded.content,
                hash = excluded.hash,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding,
                dims = excluded.dims,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.metadata.url)
        .bind(&chunk.metadata.title)
        .bind(chunk.metadata.source_type.as_str())
        .bind(chunk.metadata.chunk_index as i64)
        .bind(&chunk.content)
        .bind(&chunk.hash)
        .bind(&metadata_json)
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(now)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("Failed to store chunk {}", chunk.id))?;
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn add(&self, chunks: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<usize> {
        check_batch(chunks, vectors)?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        insert_chunks(&mut tx, chunks, vectors).await?;
        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn query(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let source_type = filter.and_then(|f| f.source_type).map(|st| st.as_str());

        let rows = sqlx::query(
            "SELECT id, content, metadata_json, embedding FROM chunks \
             WHERE (?1 IS NULL OR source_type = ?1)",
        )
        .bind(source_type)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata_json: String = row.get("metadata_json");
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
                .with_context(|| "Corrupt chunk metadata in index")?;
            if let Some(f) = filter {
                if !f.matches(&metadata) {
                    continue;
                }
            }
            let blob: Vec<u8> = row.get("embedding");
            hits.push(SearchHit {
                id: row.get("id"),
                content: row.get("content"),
                metadata,
                distance: cosine_distance(query_vec, &blob_to_vec(&blob)),
            });
        }

        Ok(rank_hits(hits, top_k))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        Ok(())
    }

    async fn rebuild(&self, chunks: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<usize> {
        check_batch(chunks, vectors)?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        insert_chunks(&mut tx, chunks, vectors).await?;
        tx.commit().await?;
        Ok(chunks.len())
    }
}
