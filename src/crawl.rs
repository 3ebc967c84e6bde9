//! Breadth-first wiki crawler.
//!
//! ```text
//! seeds ──▶ Frontier (FIFO) ──▶ Fetcher ──▶ PageExtractor ──▶ pages
//!              ▲                                  │
//!              └────────── article links ─────────┘
//! ```
//!
//! Fetches are strictly sequential with a politeness delay between them.
//! Every canonical URL is fetched at most once. A page that fails to
//! fetch or extract is logged and dropped: it does not count toward
//! `max_pages` and is never re-queued.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use farmhand_core::models::PageRecord;

use crate::config::{Config, CrawlConfig};
use crate::extract::{canonicalize, PageExtractor};
use crate::pages;
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Source of raw page HTML.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// [`Fetcher`] over HTTP with a per-request timeout and a fixed user agent.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(transport)
    }
}

/// FIFO queue of canonical URLs that remembers everything ever enqueued.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<Url>,
    seen: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue the canonical form of `url`. Returns false if it was seen before.
    pub fn push(&mut self, url: &Url) -> bool {
        let canonical = canonicalize(url);
        if !self.seen.insert(canonical.to_string()) {
            return false;
        }
        self.queue.push_back(canonical);
        true
    }

    pub fn pop(&mut self) -> Option<Url> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_pages: usize,
    pub delay: Duration,
    /// Lowercased substrings; a discovered link is enqueued only if its
    /// path contains one. Empty means every article link is followed.
    pub relevance_keywords: Vec<String>,
}

impl CrawlOptions {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            delay: Duration::from_millis(config.delay_ms),
            relevance_keywords: config
                .relevance_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    fn is_relevant(&self, url: &Url) -> bool {
        if self.relevance_keywords.is_empty() {
            return true;
        }
        let path = url.path().to_lowercase();
        self.relevance_keywords.iter().any(|k| path.contains(k))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: usize,
    pub fetch_failures: usize,
    pub extract_failures: usize,
    /// URLs still queued when the crawl stopped.
    pub remaining: usize,
}

/// Crawl breadth-first from `seeds` until `max_pages` pages are extracted
/// or the frontier runs dry.
pub async fn crawl(
    fetcher: &dyn Fetcher,
    seeds: &[Url],
    options: &CrawlOptions,
    progress: &dyn ProgressReporter,
) -> (Vec<PageRecord>, CrawlSummary) {
    let extractor = PageExtractor::new();
    let mut frontier = Frontier::new();
    for seed in seeds {
        frontier.push(seed);
    }

    let mut pages: Vec<PageRecord> = Vec::new();
    let mut summary = CrawlSummary::default();
    let mut first = true;

    while pages.len() < options.max_pages {
        let Some(url) = frontier.pop() else {
            break;
        };
        if !first && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
        first = false;

        let html = match fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %url, error = %e, "fetch failed; dropping page");
                summary.fetch_failures += 1;
                progress.report(ProgressEvent::Dropped {
                    url: url.to_string(),
                });
                continue;
            }
        };

        match extractor.parse(&html, &url) {
            Ok(extracted) => {
                let mut queued = 0usize;
                for link in &extracted.links {
                    if options.is_relevant(link) && frontier.push(link) {
                        queued += 1;
                    }
                }
                debug!(url = %url, links = extracted.links.len(), queued, "page extracted");
                pages.push(extracted.page);
                progress.report(ProgressEvent::Crawled {
                    url: url.to_string(),
                    n: pages.len() as u64,
                    max: options.max_pages as u64,
                });
            }
            Err(e) => {
                warn!(url = %url, error = %e, "extraction failed; dropping page");
                summary.extract_failures += 1;
                progress.report(ProgressEvent::Dropped {
                    url: url.to_string(),
                });
            }
        }
    }

    summary.pages = pages.len();
    summary.remaining = frontier.len();
    let attempted = summary.pages + summary.fetch_failures + summary.extract_failures;
    let success_rate = if attempted == 0 {
        0.0
    } else {
        summary.pages as f64 * 100.0 / attempted as f64
    };
    info!(
        pages = summary.pages,
        fetch_failures = summary.fetch_failures,
        extract_failures = summary.extract_failures,
        success_rate = format!("{:.1}%", success_rate),
        total_chars = pages.iter().map(|p| p.body_text.chars().count()).sum::<usize>(),
        total_tables = pages.iter().map(|p| p.tables.len()).sum::<usize>(),
        remaining = summary.remaining,
        "crawl finished"
    );
    (pages, summary)
}

/// Resolve the configured seed paths against the base URL.
pub fn seed_urls(config: &CrawlConfig) -> Result<Vec<Url>> {
    let base = Url::parse(&config.base_url)
        .with_context(|| format!("Invalid crawl.base_url: {}", config.base_url))?;
    config
        .seed_paths
        .iter()
        .map(|p| {
            base.join(p)
                .with_context(|| format!("Invalid seed path: {}", p))
        })
        .collect()
}

/// `farmhand crawl`: crawl the wiki and write the pages file.
pub async fn run_crawl(
    config: &Config,
    max_pages: Option<usize>,
    output: Option<&std::path::Path>,
    force: bool,
    progress: &dyn ProgressReporter,
) -> Result<CrawlSummary> {
    let mut options = CrawlOptions::from_config(&config.crawl);
    if let Some(n) = max_pages {
        options.max_pages = n;
    }
    let output = output.unwrap_or(&config.crawl.output);
    if output.exists() && !force {
        println!("crawl {}", config.crawl.base_url);
        println!(
            "  skipped: {} already exists (use --force to re-crawl)",
            output.display()
        );
        return Ok(CrawlSummary::default());
    }
    let seeds = seed_urls(&config.crawl)?;
    let fetcher = HttpFetcher::new(&config.crawl)?;

    info!(
        seeds = seeds.len(),
        max_pages = options.max_pages,
        delay_ms = options.delay.as_millis() as u64,
        "starting crawl"
    );
    let (pages, summary) = crawl(&fetcher, &seeds, &options, progress).await;
    pages::save_pages(output, &pages)?;

    println!("crawl {}", config.crawl.base_url);
    println!("  pages extracted: {}", summary.pages);
    println!("  fetch failures: {}", summary.fetch_failures);
    println!("  extract failures: {}", summary.extract_failures);
    println!("  still queued: {}", summary.remaining);
    println!("  written: {}", output.display());
    println!("ok");
    Ok(summary)
}
