//! Retrieval over the chunk index.
//!
//! [`Retriever`] pairs a [`Store`] with an [`EmbeddingProvider`]. It is the
//! single entry point for the agent tools, the HTTP API and the CLI:
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`search`](Retriever::search) | top-k hits; failures degrade to no hits |
//! | [`add`](Retriever::add) | embed and store documents in batches |
//! | [`rebuild`](Retriever::rebuild) | replace the whole collection |
//! | [`context_for_query`](Retriever::context_for_query) | hits rendered as prompt context |
//! | [`plan_crop_farming`](Retriever::plan_crop_farming) | retrieval + crop planner |

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, warn};

use farmhand_core::models::{ChunkMetadata, ChunkRecord, SearchHit, SourceType};
use farmhand_core::planner::{self, FarmPlan, PlanError, PLANNING_TOP_K};
use farmhand_core::store::{MetadataFilter, Store};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, embed_query, EmbeddingProvider};
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Message shown when retrieval produced nothing usable.
pub const NO_RESULTS: &str = "No relevant information found in the knowledge base.";

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Open the SQLite index named in `config`, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = SqliteStore::new(pool);
        let embedder = embedding::create_provider(&config.embedding)?;
        Ok(Self::new(
            Arc::new(store),
            embedder,
            config.retrieval.batch_size,
        ))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Top-`top_k` hits for `query`, or an empty list if the index or the
    /// embedder is unavailable.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<SearchHit> {
        match self.try_search(query, top_k, filter).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "retrieval failed; returning no results");
                Vec::new()
            }
        }
    }

    /// Like [`search`](Self::search) but surfaces the error.
    pub async fn try_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let hits = self.store.query(&query_vec, top_k, filter).await?;
        debug!(query, hits = hits.len(), "retrieval");
        Ok(hits)
    }

    /// Embed and store `documents` with their metadata under `ids`.
    ///
    /// All three slices must have the same length.
    pub async fn add(
        &self,
        documents: &[String],
        metadatas: &[ChunkMetadata],
        ids: &[String],
    ) -> Result<usize> {
        if documents.len() != metadatas.len() || documents.len() != ids.len() {
            bail!(
                "documents, metadatas and ids differ in length ({}, {}, {})",
                documents.len(),
                metadatas.len(),
                ids.len()
            );
        }
        let chunks: Vec<ChunkRecord> = documents
            .iter()
            .zip(metadatas)
            .zip(ids)
            .map(|((content, metadata), id)| ChunkRecord {
                id: id.clone(),
                hash: farmhand_core::chunk::content_hash(content),
                content: content.clone(),
                metadata: metadata.clone(),
            })
            .collect();
        self.add_chunks(&chunks, |_, _| {}).await
    }

    /// Embed and store chunks in batches of `batch_size`.
    ///
    /// `on_batch(done, total)` runs after each batch is written.
    pub async fn add_chunks(
        &self,
        chunks: &[ChunkRecord],
        mut on_batch: impl FnMut(usize, usize),
    ) -> Result<usize> {
        let mut written = 0;
        for batch in chunks.chunks(self.batch_size) {
            let vectors = self.embed_batch(batch).await?;
            written += self.store.add(batch, &vectors).await?;
            on_batch(written, chunks.len());
        }
        Ok(written)
    }

    /// Embed every chunk, then atomically replace the collection.
    pub async fn rebuild(
        &self,
        chunks: &[ChunkRecord],
        mut on_batch: impl FnMut(usize, usize),
    ) -> Result<usize> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
            on_batch(vectors.len(), chunks.len());
        }
        self.store.rebuild(chunks, &vectors).await
    }

    async fn embed_batch(&self, batch: &[ChunkRecord]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }

    /// Hits rendered by [`format_context`].
    pub async fn context_for_query(&self, query: &str, top_k: usize) -> String {
        format_context(&self.search(query, top_k, None).await)
    }

    /// Retrieve the crop's pages and compute a planting plan.
    pub async fn plan_crop_farming(
        &self,
        crop: &str,
        target_yield: u32,
        season: &str,
    ) -> Result<FarmPlan, PlanError> {
        if target_yield == 0 {
            return Err(PlanError::InvalidTarget);
        }
        let hits = self
            .search(&planner::planning_query(crop), PLANNING_TOP_K, None)
            .await;
        planner::plan_from_hits(crop, target_yield, season, &hits)
    }
}

/// Render hits as prompt context, or [`NO_RESULTS`] when there are none.
///
/// ```text
/// From 'Wheat':
/// Wheat is a vegetable crop...
///
/// ---
///
/// From 'Crops - Table 1':
/// Table with columns: ...
/// ```
pub fn format_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }
    hits.iter()
        .map(|h| format!("From '{}':\n{}", h.metadata.title, h.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// `farmhand search`: print ranked hits.
pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    source_type: Option<SourceType>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let retriever = Retriever::open(config).await?;
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    let filter = source_type.map(MetadataFilter::source_type);
    let hits = retriever.try_search(query, top_k, filter.as_ref()).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            1.0 - hit.distance,
            hit.metadata.title,
            hit.metadata.source_type
        );
        println!("    url: {}", hit.metadata.url);
        println!("    {}", snippet(&hit.content, 200));
        println!();
    }
    Ok(())
}

/// `farmhand plan`: print the plan, or the planner's explanation.
pub async fn run_plan(config: &Config, crop: &str, target_yield: u32, season: &str) -> Result<()> {
    let retriever = Retriever::open(config).await?;
    match retriever.plan_crop_farming(crop, target_yield, season).await {
        Ok(plan) => println!("{}", plan.render()),
        Err(e) => println!("{}", e),
    }
    Ok(())
}

/// First `max_chars` characters of `text` on one line, with an ellipsis
/// when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
