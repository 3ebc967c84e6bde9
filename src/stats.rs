//! Index statistics.
//!
//! A quick summary of what is indexed: page and chunk counts, the
//! text/table split, and the facts recorded by the last `farmhand index`
//! run. Used by `farmhand status` and `GET /api/status`.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub pages: usize,
    pub chunks: usize,
    pub text_chunks: usize,
    pub table_chunks: usize,
    /// `index_meta` rows: embedding model, dims, indexed_at, pages_file.
    pub meta: BTreeMap<String, String>,
}

/// Read counts and metadata from an open store.
pub async fn collect_stats(store: &SqliteStore) -> Result<IndexStats> {
    let rows = sqlx::query(
        "SELECT source_type, COUNT(*) AS n FROM chunks GROUP BY source_type",
    )
    .fetch_all(store.pool())
    .await?;

    let mut stats = IndexStats {
        pages: store.page_count().await?,
        meta: store.meta().await?,
        ..Default::default()
    };
    for row in &rows {
        let n = row.get::<i64, _>("n") as usize;
        match row.get::<String, _>("source_type").as_str() {
            "table" => stats.table_chunks += n,
            _ => stats.text_chunks += n,
        }
        stats.chunks += n;
    }
    Ok(stats)
}

/// `farmhand status`: print index statistics.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool.clone());
    let stats = collect_stats(&store).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("status {}", config.db.path.display());
    println!("  size: {}", format_bytes(db_size));
    println!("  pages: {}", stats.pages);
    println!(
        "  chunks: {} ({} text, {} table)",
        stats.chunks, stats.text_chunks, stats.table_chunks
    );
    for (key, value) in &stats.meta {
        let shown = if key == "indexed_at" {
            format_indexed_at(value)
        } else {
            value.clone()
        };
        println!("  {}: {}", key, shown);
    }
    let mode = config.agent.default_mode;
    println!("  default mode: {} ({})", mode, mode.info().name);
    if stats.chunks == 0 {
        println!("  index is empty; run `farmhand crawl` then `farmhand index`");
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// RFC 3339 timestamp shown relative to now ("3 hours ago").
fn format_indexed_at(value: &str) -> String {
    let Ok(ts) = chrono::DateTime::parse_from_rfc3339(value) else {
        return value.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - ts.timestamp();
    if delta < 0 {
        return value.to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
