//! Storage abstraction for the retrieval index.
//!
//! The [`Store`] trait is the vector collection behind the retriever:
//! chunks go in with their embedding vectors, nearest neighbours come out
//! as [`SearchHit`]s. Backends: [`memory::InMemoryStore`] here and the
//! SQLite store in the `farmhand` app crate.
//!
//! Implementations must be `Send + Sync`. Queries may run concurrently;
//! writers are serialized, and [`Store::rebuild`] must replace the whole
//! collection without readers ever observing a half-built index.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ChunkMetadata, ChunkRecord, SearchHit, SourceType};

/// Exact-match filter over chunk metadata. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default)]
    pub source_type: Option<SourceType>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl MetadataFilter {
    pub fn source_type(source_type: SourceType) -> Self {
        Self {
            source_type: Some(source_type),
            ..Default::default()
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(st) = self.source_type {
            if metadata.source_type != st {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if &metadata.url != url {
                return false;
            }
        }
        if let Some(title) = &self.title {
            if &metadata.title != title {
                return false;
            }
        }
        true
    }
}

/// Abstract vector collection.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](Store::add) | Insert or replace chunks by id |
/// | [`query`](Store::query) | Nearest chunks by cosine distance |
/// | [`count`](Store::count) | Number of stored chunks |
/// | [`reset`](Store::reset) | Drop every chunk |
/// | [`rebuild`](Store::rebuild) | Atomically replace the collection |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert chunks with their vectors. `vectors[i]` belongs to `chunks[i]`.
    ///
    /// A chunk whose id already exists replaces the stored one.
    /// Returns the number of chunks written.
    async fn add(&self, chunks: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<usize>;

    /// Return up to `top_k` chunks ordered by ascending cosine distance.
    async fn query(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>>;

    async fn count(&self) -> Result<usize>;

    async fn reset(&self) -> Result<()>;

    /// Replace the entire collection with `chunks`.
    async fn rebuild(&self, chunks: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<usize>;
}

/// Check that a batch is well formed before it reaches a backend.
pub fn check_batch(chunks: &[ChunkRecord], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        anyhow::bail!(
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}

/// Sort hits by distance (then id, for stable ties) and keep `top_k`.
pub fn rank_hits(mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k);
    hits
}
