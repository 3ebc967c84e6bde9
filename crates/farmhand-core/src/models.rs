//! Core data models shared by the crawler, chunker, store, and planner.
//!
//! [`PageRecord`] and [`TableRecord`] double as the on-disk page format
//! written by `farmhand crawl`:
//!
//! ```json
//! {
//!   "url": "https://stardewvalleywiki.com/Wheat",
//!   "title": "Wheat",
//!   "content": "Wheat is a vegetable crop...",
//!   "tables": [{ "headers": ["Name", "Price"], "rows": [["Wheat", "25g"]] }],
//!   "image_url": "https://stardewvalleywiki.com/mediawiki/images/Wheat.png",
//!   "infobox": { "Growth": "4 days", "Season": "Summer, Fall" },
//!   "scraped_at": 1717171717.25
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One successfully extracted wiki page.
///
/// Created once per canonical URL and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical absolute URL (scheme, host and path only).
    pub url: String,
    pub title: String,
    /// Cleaned article text, newline-separated by block.
    #[serde(rename = "content")]
    pub body_text: String,
    /// Rebuilt through [`TableRecord::from_parts`] on read, so files
    /// holding ragged rows load with those rows dropped.
    #[serde(default, deserialize_with = "deserialize_tables")]
    pub tables: Vec<TableRecord>,
    /// First image inside the page's infobox, as an absolute URL.
    #[serde(rename = "image_url", default)]
    pub main_image_url: Option<String>,
    /// Key/value rows of the page's infobox, in key order.
    #[serde(default)]
    pub infobox: BTreeMap<String, String>,
    /// Fetch time as fractional Unix seconds.
    pub scraped_at: f64,
}

/// A content table pulled from a page.
///
/// Every row has exactly `headers.len()` cells; extraction drops rows
/// that do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableRecord {
    /// Build a table, discarding rows whose width differs from the header.
    ///
    /// Returns `None` when the table ends up without headers or rows.
    pub fn from_parts(
        title: Option<String>,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Option<Self> {
        if headers.is_empty() {
            return None;
        }
        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .filter(|row| row.len() == headers.len())
            .collect();
        if rows.is_empty() {
            return None;
        }
        Some(Self {
            title,
            headers,
            rows,
        })
    }
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

fn deserialize_tables<'de, D>(deserializer: D) -> Result<Vec<TableRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<RawTable>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|t| TableRecord::from_parts(t.title, t.headers, t.rows))
        .collect())
}

/// Where a chunk's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    Table,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::Table => "table",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(SourceType::Text),
            "table" => Ok(SourceType::Table),
            other => anyhow::bail!("Unknown source type: '{}'. Use text or table.", other),
        }
    }
}

/// Provenance carried alongside every indexed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub url: String,
    pub title: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Ordinal of this chunk within its kind on the page.
    pub chunk_index: usize,
    /// Full table payload; only set on table chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableRecord>,
    /// Page infobox; only set on text chunks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub infobox: BTreeMap<String, String>,
}

/// A retrieval unit produced by the chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable id derived from url, kind and ordinal.
    pub id: String,
    pub content: String,
    /// SHA-256 of `content`.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A ranked retrieval result.
///
/// `distance` is cosine distance (`1 - similarity`), so smaller is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_drops_ragged_rows() {
        let table = TableRecord::from_parts(
            None,
            vec!["Name".into(), "Price".into()],
            vec![
                vec!["Wheat".into(), "25g".into()],
                vec!["Broken".into()],
                vec!["Corn".into(), "50g".into(), "extra".into()],
            ],
        )
        .unwrap();
        assert_eq!(table.rows.len(), 1);
        assert!(table.rows.iter().all(|r| r.len() == table.headers.len()));
    }

    #[test]
    fn test_table_without_rows_is_dropped() {
        let table = TableRecord::from_parts(
            None,
            vec!["Name".into()],
            vec![vec!["a".into(), "b".into()]],
        );
        assert!(table.is_none());
        assert!(TableRecord::from_parts(None, vec![], vec![vec![]]).is_none());
    }

    #[test]
    fn test_page_record_json_field_names() {
        let page = PageRecord {
            url: "https://stardewvalleywiki.com/Wheat".into(),
            title: "Wheat".into(),
            body_text: "Wheat grows in summer.".into(),
            tables: vec![],
            main_image_url: Some("https://stardewvalleywiki.com/Wheat.png".into()),
            infobox: BTreeMap::new(),
            scraped_at: 1.5,
        };
        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["content"], "Wheat grows in summer.");
        assert_eq!(value["image_url"], "https://stardewvalleywiki.com/Wheat.png");
        assert_eq!(value["scraped_at"], 1.5);
    }

    #[test]
    fn test_page_record_reads_without_infobox() {
        let json = r#"{"url":"u","title":"t","content":"c","tables":[],"image_url":null,"scraped_at":2.0}"#;
        let page: PageRecord = serde_json::from_str(json).unwrap();
        assert!(page.infobox.is_empty());
        assert!(page.main_image_url.is_none());
    }

    #[test]
    fn test_page_record_read_drops_ragged_table_rows() {
        let json = r#"{
            "url": "u", "title": "t", "content": "c", "scraped_at": 2.0,
            "tables": [
                {"headers": ["Image", "Item"],
                 "rows": [["https://x/a.png"], ["https://x/b.png", "Parsnip"]]},
                {"headers": ["Only"], "rows": [["a", "b"]]}
            ]
        }"#;
        let page: PageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(page.tables.len(), 1);
        assert_eq!(
            page.tables[0].rows,
            vec![vec!["https://x/b.png".to_string(), "Parsnip".to_string()]]
        );
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!("table".parse::<SourceType>().unwrap(), SourceType::Table);
        assert!("image".parse::<SourceType>().is_err());
    }
}
