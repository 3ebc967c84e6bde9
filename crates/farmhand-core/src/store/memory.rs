//! In-memory [`Store`] implementation for tests and small indexes.
//!
//! Chunks and vectors live in a `Vec` behind `std::sync::RwLock`.
//! Queries take the read lock and run brute-force cosine distance;
//! every write, including a full rebuild, happens under one write lock.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{ChunkRecord, SearchHit};

use super::{check_batch, rank_hits, MetadataFilter, Store};

struct StoredChunk {
    chunk: ChunkRecord,
    vector: Vec<f32>,
}

/// In-memory vector collection.
pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert_all(stored: &mut Vec<StoredChunk>, chunks: &[ChunkRecord], vectors: &[Vec<f32>]) {
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        stored.retain(|sc| sc.chunk.id != chunk.id);
        stored.push(StoredChunk {
            chunk: chunk.clone(),
            vector: vector.clone(),
        });
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn add(&self, chunks: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<usize> {
        check_batch(chunks, vectors)?;
        let mut stored = self.chunks.write().map_err(|_| poisoned())?;
        upsert_all(&mut stored, chunks, vectors);
        Ok(chunks.len())
    }

    async fn query(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let stored = self.chunks.read().map_err(|_| poisoned())?;
        let hits = stored
            .iter()
            .filter(|sc| filter.map_or(true, |f| f.matches(&sc.chunk.metadata)))
            .map(|sc| SearchHit {
                id: sc.chunk.id.clone(),
                content: sc.chunk.content.clone(),
                metadata: sc.chunk.metadata.clone(),
                distance: cosine_distance(query_vec, &sc.vector),
            })
            .collect();
        Ok(rank_hits(hits, top_k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().map_err(|_| poisoned())?.len())
    }

    async fn reset(&self) -> Result<()> {
        self.chunks.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    async fn rebuild(&self, chunks: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<usize> {
        check_batch(chunks, vectors)?;
        let mut stored = self.chunks.write().map_err(|_| poisoned())?;
        stored.clear();
        upsert_all(&mut stored, chunks, vectors);
        Ok(stored.len())
    }
}
