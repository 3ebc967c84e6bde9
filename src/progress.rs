//! Crawl and index progress reporting.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for scripts.
//! `farmhand crawl` reports one event per fetched page; `farmhand index`
//! reports one event per embedded batch.

use std::io::{IsTerminal, Write};

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A page was fetched and extracted; `n` of at most `max` pages.
    Crawled { url: String, n: u64, max: u64 },
    /// A page fetch or extraction failed and was dropped.
    Dropped { url: String },
    /// `n` of `total` chunks have been embedded and written.
    Indexed { n: u64, total: u64 },
}

/// Receives progress events from the crawl and index pipelines.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "crawl  12 / 200 pages  https://...".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Crawled { url, n, max } => format!(
                "crawl  {} / {} pages  {}\n",
                format_number(*n),
                format_number(*max),
                url
            ),
            ProgressEvent::Dropped { url } => format!("crawl  dropped  {}\n", url),
            ProgressEvent::Indexed { n, total } => format!(
                "index  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Crawled { url, n, max } => serde_json::json!({
                "event": "progress",
                "phase": "crawl",
                "url": url,
                "n": n,
                "max": max
            }),
            ProgressEvent::Dropped { url } => serde_json::json!({
                "event": "dropped",
                "phase": "crawl",
                "url": url
            }),
            ProgressEvent::Indexed { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "index",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
