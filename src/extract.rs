//! Wiki page extraction.
//!
//! Parses a fetched MediaWiki article into a [`PageRecord`]: title,
//! block-structured body text, infobox fields, main image, and content
//! tables. The same parse also yields the article links the crawler
//! follows next.
//!
//! # Content region
//!
//! Text, tables and links come from `div#mw-content-text`, or from
//! `div.mw-parser-output` when the former is missing. A page with
//! neither is rejected with [`ExtractError::MissingContent`].
//!
//! # Skipped subtrees
//!
//! | Selector | Why it is noise |
//! |----------|-----------------|
//! | `nav`, `aside`, `footer` | site chrome |
//! | `script`, `style`, `noscript`, `svg`, `template` | not prose |
//! | `span.mw-editsection` | "[edit]" links |
//! | `.navbox`, `#toc`, `.toc` | navigation boxes and tables of contents |
//!
//! Images never contribute text. The only images kept are the first one
//! in the infobox (the page's main image) and images that are the sole
//! content of a table cell.

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use farmhand_core::models::{PageRecord, TableRecord};

/// Namespaces and URL fragments that never lead to an article.
const SKIP_LINK_PATTERNS: &[&str] = &[
    "category:",
    "file:",
    "template:",
    "help:",
    "special:",
    "talk:",
    "user:",
    "#",
    "?",
    "&action=",
    "index.php",
];

/// Extensions of linked assets that are not HTML articles.
const ASSET_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".css", ".js", ".pdf", ".zip",
    ".xml", ".json", ".ogg", ".mp3", ".mp4", ".webm",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no content region (div#mw-content-text or .mw-parser-output) in {url}")]
    MissingContent { url: String },
    #[error("content region of {url} has no text")]
    EmptyBody { url: String },
}

/// A parsed page plus the canonical article links found in its content.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub page: PageRecord,
    pub links: Vec<Url>,
}

struct Selectors {
    heading: Selector,
    heading_id: Selector,
    title_tag: Selector,
    content: Selector,
    parser_output: Selector,
    table: Selector,
    row: Selector,
    caption: Selector,
    infobox: Selector,
    img: Selector,
    anchor: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            heading: Selector::parse("h1.firstHeading").expect("heading selector"),
            heading_id: Selector::parse("h1#firstHeading").expect("heading id selector"),
            title_tag: Selector::parse("title").expect("title selector"),
            content: Selector::parse("div#mw-content-text").expect("content selector"),
            parser_output: Selector::parse("div.mw-parser-output").expect("parser output selector"),
            table: Selector::parse("table").expect("table selector"),
            row: Selector::parse("tr").expect("row selector"),
            caption: Selector::parse("caption").expect("caption selector"),
            infobox: Selector::parse("table.infobox, table#infoboxtable").expect("infobox selector"),
            img: Selector::parse("img").expect("img selector"),
            anchor: Selector::parse("a[href]").expect("anchor selector"),
        }
    }
}

/// Reusable extractor holding pre-parsed selectors.
pub struct PageExtractor {
    selectors: Selectors,
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PageExtractor {
    pub fn new() -> Self {
        Self {
            selectors: Selectors::new(),
        }
    }

    /// Extract a page record from raw HTML.
    pub fn extract(&self, html: &str, page_url: &Url) -> Result<PageRecord, ExtractError> {
        self.parse(html, page_url).map(|p| p.page)
    }

    /// Extract the page record and its outgoing article links in one parse.
    pub fn parse(&self, html: &str, page_url: &Url) -> Result<ExtractedPage, ExtractError> {
        let document = Html::parse_document(html);
        let url = canonicalize(page_url);

        let root = self
            .content_root(&document)
            .ok_or_else(|| ExtractError::MissingContent {
                url: url.to_string(),
            })?;

        let mut collector = TextCollector::default();
        collector.walk(root);
        let body_text = collector.finish();
        if body_text.is_empty() {
            return Err(ExtractError::EmptyBody {
                url: url.to_string(),
            });
        }

        let infobox_el = root.select(&self.selectors.infobox).next();
        let main_image_url = infobox_el
            .and_then(|ib| ib.select(&self.selectors.img).next())
            .and_then(|img| image_url(img, &url));
        let infobox = infobox_el
            .map(|ib| self.infobox_fields(ib))
            .unwrap_or_default();

        let tables = root
            .select(&self.selectors.table)
            .filter(|t| is_content_table(*t))
            .filter_map(|t| self.table_record(t, &url))
            .collect();

        let links = self.links_in(root, &url);

        Ok(ExtractedPage {
            page: PageRecord {
                url: url.to_string(),
                title: self.title(&document),
                body_text,
                tables,
                main_image_url,
                infobox,
                scraped_at: now_secs(),
            },
            links,
        })
    }

    /// Canonical article links in the page content, in document order.
    pub fn discover_links(&self, html: &str, page_url: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        let base = canonicalize(page_url);
        match self.content_root(&document) {
            Some(root) => self.links_in(root, &base),
            None => self.links_in(document.root_element(), &base),
        }
    }

    fn content_root<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        document
            .select(&self.selectors.content)
            .next()
            .or_else(|| document.select(&self.selectors.parser_output).next())
    }

    fn title(&self, document: &Html) -> String {
        document
            .select(&self.selectors.heading)
            .next()
            .or_else(|| document.select(&self.selectors.heading_id).next())
            .or_else(|| document.select(&self.selectors.title_tag).next())
            .map(|el| element_text(el))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    fn infobox_fields(&self, infobox: ElementRef<'_>) -> std::collections::BTreeMap<String, String> {
        let mut fields = std::collections::BTreeMap::new();
        for row in own_rows(infobox, &self.selectors.row) {
            let cells = row_cells(row);
            if cells.len() < 2 {
                continue;
            }
            let key = element_text(cells[0]);
            let value = element_text(cells[1]);
            if !key.is_empty() && !value.is_empty() {
                fields.entry(key).or_insert(value);
            }
        }
        fields
    }

    fn table_record(&self, table: ElementRef<'_>, base: &Url) -> Option<TableRecord> {
        let mut rows = own_rows(table, &self.selectors.row)
            .into_iter()
            .map(|row| {
                row_cells(row)
                    .into_iter()
                    .map(|cell| cell_value(cell, &self.selectors.img, base))
                    .collect::<Vec<String>>()
            })
            .filter(|cells| !cells.is_empty());

        let headers = rows.next()?;
        let body: Vec<Vec<String>> = rows.collect();
        let title = table
            .select(&self.selectors.caption)
            .next()
            .map(element_text)
            .filter(|c| !c.is_empty());

        TableRecord::from_parts(title, headers, body)
    }

    fn links_in(&self, root: ElementRef<'_>, base: &Url) -> Vec<Url> {
        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();
        for anchor in root.select(&self.selectors.anchor) {
            if in_skipped_subtree(anchor) {
                continue;
            }
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if !is_article_href(href) {
                continue;
            }
            if let Ok(joined) = base.join(href) {
                let canonical = canonicalize(&joined);
                if seen.insert(canonical.to_string()) {
                    links.push(canonical);
                }
            }
        }
        links
    }
}

/// Canonical form of a page URL: scheme, host, port and path only.
pub fn canonicalize(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical.set_query(None);
    canonical
}

/// Whether an `href` is a same-site, root-relative link to an article.
pub fn is_article_href(href: &str) -> bool {
    if !href.starts_with('/') || href.starts_with("//") || href.len() <= 1 {
        return false;
    }
    let lower = href.to_lowercase();
    if SKIP_LINK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    !ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn is_skipped(el: ElementRef<'_>) -> bool {
    let value = el.value();
    match value.name() {
        "nav" | "aside" | "footer" | "script" | "style" | "noscript" | "svg" | "template" => {
            true
        }
        "span" => value.classes().any(|c| c == "mw-editsection"),
        _ => {
            value.classes().any(|c| c == "navbox" || c == "toc")
                || value.id().is_some_and(|id| id == "toc")
        }
    }
}

fn in_skipped_subtree(el: ElementRef<'_>) -> bool {
    is_skipped(el) || el.ancestors().filter_map(ElementRef::wrap).any(is_skipped)
}

/// Only `wikitable`, `infobox` and `sortable` tables carry content; unclassed
/// tables are page layout.
fn is_content_table(table: ElementRef<'_>) -> bool {
    let value = table.value();
    let content = value
        .classes()
        .any(|c| matches!(c, "wikitable" | "infobox" | "sortable"))
        || value.id().is_some_and(|id| id == "infoboxtable");
    content && !in_skipped_subtree(table)
}

/// Rows that belong to `table` itself, not to tables nested inside it.
fn own_rows<'a>(table: ElementRef<'a>, row: &Selector) -> Vec<ElementRef<'a>> {
    table
        .select(row)
        .filter(|tr| {
            tr.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "table")
                .map(|t| t.id())
                == Some(table.id())
        })
        .collect()
}

fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .collect()
}

fn cell_value(cell: ElementRef<'_>, img: &Selector, base: &Url) -> String {
    let text = element_text(cell);
    if !text.is_empty() {
        return text;
    }
    cell.select(img)
        .next()
        .and_then(|i| image_url(i, base))
        .unwrap_or_default()
}

fn image_url(img: ElementRef<'_>, base: &Url) -> Option<String> {
    let src = img.value().attr("src")?.trim();
    if src.is_empty() {
        return None;
    }
    base.join(src).ok().map(|u| u.to_string())
}

/// Whitespace-collapsed text of an element, ignoring skipped subtrees.
fn element_text(el: ElementRef<'_>) -> String {
    let mut collector = TextCollector::default();
    collector.walk_inline(el);
    collapse_whitespace(&collector.line)
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

fn now_secs() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

/// Accumulates block-structured text: one line per block element, a
/// blank line around paragraphs, headings, lists and tables.
#[derive(Default)]
struct TextCollector {
    lines: Vec<String>,
    line: String,
}

enum Break {
    None,
    Line,
    Paragraph,
}

fn block_break(tag: &str) -> Break {
    match tag {
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "table" | "ul" | "ol" | "dl"
        | "blockquote" | "pre" => Break::Paragraph,
        "div" | "li" | "tr" | "dt" | "dd" | "caption" | "br" | "section" | "center"
        | "figure" | "figcaption" => Break::Line,
        _ => Break::None,
    }
}

impl TextCollector {
    fn walk(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                if is_skipped(child_el) {
                    continue;
                }
                let tag = child_el.value().name();
                let brk = block_break(tag);
                self.open(&brk, tag);
                self.walk(child_el);
                self.close(&brk);
            } else if let Node::Text(text) = child.value() {
                self.push_text(text);
            }
        }
    }

    /// Like `walk`, but treats every element as inline.
    fn walk_inline(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                if is_skipped(child_el) {
                    continue;
                }
                if child_el.value().name() == "br" {
                    self.push_text(" ");
                }
                self.walk_inline(child_el);
            } else if let Node::Text(text) = child.value() {
                self.push_text(text);
            }
        }
    }

    fn open(&mut self, brk: &Break, tag: &str) {
        match brk {
            Break::Paragraph => self.end_paragraph(),
            Break::Line => self.end_line(),
            Break::None => {
                if matches!(tag, "td" | "th") && !self.line.trim().is_empty() {
                    let end = self.line.trim_end().len();
                    self.line.truncate(end);
                    self.line.push_str(" | ");
                }
            }
        }
    }

    fn close(&mut self, brk: &Break) {
        match brk {
            Break::Paragraph => self.end_paragraph(),
            Break::Line => self.end_line(),
            Break::None => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                if !self.line.is_empty() && !self.line.ends_with(' ') {
                    self.line.push(' ');
                }
            } else {
                self.line.push(ch);
            }
        }
    }

    fn end_line(&mut self) {
        let trimmed = self.line.trim();
        if !trimmed.is_empty() {
            self.lines.push(trimmed.to_string());
        }
        self.line.clear();
    }

    fn end_paragraph(&mut self) {
        self.end_line();
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    fn finish(mut self) -> String {
        self.end_line();
        while self.lines.last().is_some_and(|l| l.is_empty()) {
            self.lines.pop();
        }
        self.lines.join("\n")
    }
}
