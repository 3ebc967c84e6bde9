//! Recursive text chunker and table linearizer.
//!
//! Turns a [`PageRecord`] into [`ChunkRecord`]s: overlapping, bounded
//! segments of the body text plus exactly one self-contained chunk per
//! table.
//!
//! # Text algorithm
//!
//! 1. If the text fits in `max_chars`, it is a single piece.
//! 2. Otherwise split on the coarsest separator present, in order:
//!    paragraph (`\n\n`), line (`\n`), sentence (`. `, `! `, `? `),
//!    word (` `), and finally individual characters.
//! 3. Pieces still above `max_chars` are split again with the next
//!    separator.
//! 4. Pieces are greedily merged back up to `max_chars`. Each new chunk
//!    starts with up to `overlap_chars` of the previous chunk's tail,
//!    snapped forward to a word boundary.
//! 5. Chunks shorter than `min_chars` (after trimming) are dropped.
//!
//! # Table format
//!
//! ```text
//! Table with columns: Name, Season, Price
//! Name: Wheat | Season: Summer | Price: 10g
//! Name: Corn | Season: Summer | Price: 150g
//! ```
//!
//! Only the first `table_row_limit` rows are rendered; empty cells are
//! skipped. The full table travels in the chunk metadata.
//!
//! # Identity
//!
//! Chunk ids are UUIDv5 values over `url`, kind and ordinal, so chunking
//! the same page twice yields identical ids.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{ChunkMetadata, ChunkRecord, PageRecord, SourceType, TableRecord};

/// Separators tried in order, coarsest first. The empty string means
/// "split into characters".
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " ", ""];

/// Chunking limits, decoupled from application config.
#[derive(Debug, Clone)]
pub struct ChunkParams {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
    pub table_row_limit: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_chars: 100,
            min_chars: 50,
            table_row_limit: 10,
        }
    }
}

/// Chunk a page into text chunks followed by table chunks.
pub fn chunk_page(page: &PageRecord, params: &ChunkParams) -> Vec<ChunkRecord> {
    let mut chunks = Vec::new();

    for (i, text) in split_text(&page.body_text, params).into_iter().enumerate() {
        let metadata = ChunkMetadata {
            url: page.url.clone(),
            title: page.title.clone(),
            source_type: SourceType::Text,
            image_url: page.main_image_url.clone(),
            chunk_index: i,
            table: None,
            infobox: page.infobox.clone(),
        };
        chunks.push(make_chunk(text, metadata));
    }

    for (j, table) in page.tables.iter().enumerate() {
        let content = linearize_table(table, params.table_row_limit);
        let metadata = ChunkMetadata {
            url: page.url.clone(),
            title: format!("{} - Table {}", page.title, j + 1),
            source_type: SourceType::Table,
            image_url: page.main_image_url.clone(),
            chunk_index: j,
            table: Some(table.clone()),
            infobox: Default::default(),
        };
        chunks.push(make_chunk(content, metadata));
    }

    chunks
}

/// Split body text into bounded, overlapping segments.
///
/// Every returned segment is trimmed, at most `max_chars` characters
/// long, and at least `min_chars` characters long.
pub fn split_text(text: &str, params: &ChunkParams) -> Vec<String> {
    let max = params.max_chars.max(1);
    if text.trim().is_empty() {
        return Vec::new();
    }

    let pieces = split_recursive(text, SEPARATORS, max);
    merge_pieces(&pieces, max, params.overlap_chars.min(max / 2))
        .into_iter()
        .filter(|c| char_len(c) >= params.min_chars)
        .collect()
}

/// Render a table as one self-contained block of text.
pub fn linearize_table(table: &TableRecord, row_limit: usize) -> String {
    let mut parts = vec![format!("Table with columns: {}", table.headers.join(", "))];

    for row in table.rows.iter().take(row_limit) {
        let cells: Vec<String> = table
            .headers
            .iter()
            .zip(row.iter())
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(header, value)| format!("{}: {}", header, value))
            .collect();
        if !cells.is_empty() {
            parts.push(cells.join(" | "));
        }
    }

    parts.join("\n")
}

/// Deterministic chunk id for a page URL, kind and ordinal.
pub fn chunk_id(url: &str, kind: SourceType, index: usize) -> String {
    let name = format!("{}:{}:{}", url, kind, index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

fn split_recursive(text: &str, separators: &[&str], max: usize) -> Vec<String> {
    if char_len(text) <= max {
        return vec![text.to_string()];
    }

    let Some((pos, sep)) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
    else {
        return vec![text.to_string()];
    };

    if sep.is_empty() {
        return split_chars(text, max);
    }

    let mut out = Vec::new();
    for part in text.split_inclusive(*sep) {
        if char_len(part) <= max {
            out.push(part.to_string());
        } else {
            out.extend(split_recursive(part, &separators[pos + 1..], max));
        }
    }
    out
}

fn split_chars(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max).map(|c| c.iter().collect()).collect()
}

fn merge_pieces(pieces: &[String], max: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut has_fresh = false;

    for piece in pieces {
        let piece_len = char_len(piece);
        if has_fresh && current_len + piece_len > max {
            push_trimmed(&mut chunks, &current);
            current = overlap_tail(&current, overlap);
            current_len = char_len(&current);
            if current_len + piece_len > max {
                current.clear();
                current_len = 0;
            }
            has_fresh = false;
        }
        current.push_str(piece);
        current_len += piece_len;
        has_fresh = true;
    }

    if has_fresh {
        push_trimmed(&mut chunks, &current);
    }
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Last `overlap` characters of `text`, starting at a word boundary.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = char_len(text);
    if total <= overlap {
        return text.to_string();
    }
    let start = text
        .char_indices()
        .nth(total - overlap)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start().to_string(),
        None => tail.to_string(),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Hex SHA-256 of chunk content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(content: String, metadata: ChunkMetadata) -> ChunkRecord {
    ChunkRecord {
        id: chunk_id(&metadata.url, metadata.source_type, metadata.chunk_index),
        hash: content_hash(&content),
        content,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn params(max: usize, overlap: usize, min: usize) -> ChunkParams {
        ChunkParams {
            max_chars: max,
            overlap_chars: overlap,
            min_chars: min,
            table_row_limit: 10,
        }
    }

    fn page(body: &str, tables: Vec<TableRecord>) -> PageRecord {
        let mut infobox = BTreeMap::new();
        infobox.insert("Growth".to_string(), "4 days".to_string());
        PageRecord {
            url: "https://stardewvalleywiki.com/Wheat".into(),
            title: "Wheat".into(),
            body_text: body.into(),
            tables,
            main_image_url: Some("https://stardewvalleywiki.com/Wheat.png".into()),
            infobox,
            scraped_at: 0.0,
        }
    }

    fn sample_table() -> TableRecord {
        TableRecord {
            title: None,
            headers: vec!["Name".into(), "Season".into(), "Price".into()],
            rows: vec![
                vec!["Wheat".into(), "Summer".into(), "10g".into()],
                vec!["Corn".into(), "".into(), "150g".into()],
            ],
        }
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = "Wheat is a vegetable crop that grows from Wheat Seeds after 4 days.";
        let chunks = split_text(text, &params(1000, 100, 10));
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("", &ChunkParams::default()).is_empty());
        assert!(split_text("  \n\n ", &ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_min_length_filter() {
        let chunks = split_text("Too short.", &params(1000, 0, 50));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunks_respect_max_chars() {
        let text = (0..60)
            .map(|i| format!("Sentence number {} talks about parsnips and cauliflower.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, &params(200, 40, 10));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 200, "chunk too long: {}", c.len());
        }
    }

    #[test]
    fn test_paragraph_split_preferred() {
        let a = "a".repeat(80);
        let b = "b".repeat(80);
        let text = format!("{}\n\n{}", a, b);
        let chunks = split_text(&text, &params(100, 0, 1));
        assert_eq!(chunks, vec![a, b]);
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        let text = "alpha beta gamma delta. epsilon zeta eta theta. iota kappa lambda mu.";
        let chunks = split_text(text, &params(40, 12, 1));
        assert!(chunks.len() >= 2);
        let first_words: Vec<&str> = chunks[0].split_whitespace().collect();
        let last_word = first_words.last().unwrap();
        assert!(chunks[1].contains(last_word));
    }

    #[test]
    fn test_unbroken_text_split_by_chars() {
        let text = "x".repeat(250);
        let chunks = split_text(&text, &params(100, 0, 1));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "┌──────┐ ".repeat(40);
        let chunks = split_text(&text, &params(30, 5, 1));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.chars().count() <= 30);
        }
    }

    #[test]
    fn test_linearize_table_skips_empty_cells() {
        let text = linearize_table(&sample_table(), 10);
        assert_eq!(
            text,
            "Table with columns: Name, Season, Price\n\
             Name: Wheat | Season: Summer | Price: 10g\n\
             Name: Corn | Price: 150g"
        );
    }

    #[test]
    fn test_linearize_table_row_limit() {
        let table = TableRecord {
            title: None,
            headers: vec!["N".into()],
            rows: (0..25).map(|i| vec![i.to_string()]).collect(),
        };
        let text = linearize_table(&table, 10);
        assert_eq!(text.lines().count(), 11);
    }

    #[test]
    fn test_chunk_page_text_then_tables() {
        let body = "Wheat is a vegetable crop. ".repeat(5);
        let chunks = chunk_page(&page(&body, vec![sample_table()]), &ChunkParams::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.source_type, SourceType::Text);
        assert_eq!(chunks[0].metadata.infobox["Growth"], "4 days");
        assert_eq!(chunks[1].metadata.source_type, SourceType::Table);
        assert_eq!(chunks[1].metadata.title, "Wheat - Table 1");
        assert!(chunks[1].metadata.infobox.is_empty());
    }

    #[test]
    fn test_table_payload_round_trips() {
        let table = sample_table();
        let chunks = chunk_page(&page("", vec![table.clone()]), &ChunkParams::default());
        let json = serde_json::to_string(&chunks[0].metadata).unwrap();
        let back: ChunkMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.table, Some(table));
    }

    #[test]
    fn test_chunking_is_idempotent() {
        let body = "Wheat grows in summer and fall. ".repeat(80);
        let p = page(&body, vec![sample_table()]);
        let a = chunk_page(&p, &params(300, 50, 20));
        let b = chunk_page(&p, &params(300, 50, 20));
        assert_eq!(a, b);

        let ids: HashSet<&str> = a.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), a.len(), "ids must be unique within a page");
    }

    #[test]
    fn test_chunk_id_depends_on_kind() {
        let url = "https://stardewvalleywiki.com/Wheat";
        assert_ne!(
            chunk_id(url, SourceType::Text, 0),
            chunk_id(url, SourceType::Table, 0)
        );
        assert_eq!(
            chunk_id(url, SourceType::Text, 3),
            chunk_id(url, SourceType::Text, 3)
        );
    }
}
