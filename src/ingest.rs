//! Index pipeline orchestration.
//!
//! Coordinates the flow from crawled pages to a searchable index:
//! pages file → chunking → embedding (batches) → store. `--rebuild`
//! replaces the collection in one transaction; otherwise chunks are
//! upserted by their deterministic ids, so re-indexing the same pages is
//! idempotent.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;

use farmhand_core::chunk::chunk_page;
use farmhand_core::models::{ChunkRecord, PageRecord, SourceType};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::migrate;
use crate::pages;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::search::Retriever;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub pages: usize,
    pub text_chunks: usize,
    pub table_chunks: usize,
    pub written: usize,
}

/// Chunk every page with the configured limits.
pub fn chunk_pages(config: &Config, pages: &[PageRecord]) -> Vec<ChunkRecord> {
    let params = config.chunking.params();
    pages.iter().flat_map(|p| chunk_page(p, &params)).collect()
}

/// `farmhand index`: chunk, embed and store the crawled pages.
pub async fn run_index(
    config: &Config,
    rebuild: bool,
    pages_path: Option<&Path>,
    progress: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let path = pages_path.unwrap_or(&config.crawl.output);
    let pages = pages::load_pages(path)?;
    let chunks = chunk_pages(config, &pages);

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let embedder = embedding::create_provider(&config.embedding)?;
    let model_name = embedder.model_name().to_string();
    let dims = embedder.dims();
    let retriever = Retriever::new(store.clone(), embedder, config.retrieval.batch_size);

    info!(
        pages = pages.len(),
        chunks = chunks.len(),
        rebuild,
        model = %model_name,
        "indexing"
    );

    let report = |n: usize, total: usize| {
        progress.report(ProgressEvent::Indexed {
            n: n as u64,
            total: total as u64,
        })
    };
    let written = if rebuild {
        retriever.rebuild(&chunks, report).await?
    } else {
        retriever.add_chunks(&chunks, report).await?
    };

    store.set_meta("embedding_model", &model_name).await?;
    store.set_meta("embedding_dims", &dims.to_string()).await?;
    store
        .set_meta("indexed_at", &chrono::Utc::now().to_rfc3339())
        .await?;
    store
        .set_meta("pages_file", &path.display().to_string())
        .await?;

    let summary = IndexSummary {
        pages: pages.len(),
        text_chunks: chunks
            .iter()
            .filter(|c| c.metadata.source_type == SourceType::Text)
            .count(),
        table_chunks: chunks
            .iter()
            .filter(|c| c.metadata.source_type == SourceType::Table)
            .count(),
        written,
    };

    println!("index {}", path.display());
    println!("  pages: {}", summary.pages);
    println!("  text chunks: {}", summary.text_chunks);
    println!("  table chunks: {}", summary.table_chunks);
    println!("  chunks written: {}", summary.written);
    if rebuild {
        println!("  mode: rebuild");
    }
    println!("ok");

    pool.close().await;
    Ok(summary)
}
