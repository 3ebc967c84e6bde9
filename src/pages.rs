//! Crawled page persistence.
//!
//! `farmhand crawl` writes a pretty-printed JSON array of [`PageRecord`]s;
//! `farmhand index` reads it back. Field names follow the scraper output
//! format (`url`, `title`, `content`, `tables`, `image_url`, `scraped_at`).

use std::path::Path;

use anyhow::{Context, Result};

use farmhand_core::models::PageRecord;

pub fn save_pages(path: &Path, pages: &[PageRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(pages)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_pages(path: &Path) -> Result<Vec<PageRecord>> {
    let content = std::fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read pages file {} (run `farmhand crawl` first)",
            path.display()
        )
    })?;
    serde_json::from_str(&content).with_context(|| format!("Malformed pages file {}", path.display()))
}
