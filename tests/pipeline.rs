//! End-to-end library tests: crawl through an in-process fetcher, index
//! into a scratch SQLite database, then search, plan and chat against it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use url::Url;

use farmhand::agent::{Agent, Mode, Session};
use farmhand::config::Config;
use farmhand::crawl::{crawl, CrawlOptions, FetchError, Fetcher};
use farmhand::db;
use farmhand::ingest::chunk_pages;
use farmhand::llm::{ChatModel, CompletionRequest, ModelTurn, Role, ToolCall};
use farmhand::migrate;
use farmhand::pages::{load_pages, save_pages};
use farmhand::progress::NoProgress;
use farmhand::search::{Retriever, NO_RESULTS};
use farmhand::sqlite_store::SqliteStore;
use farmhand::tools::ToolRegistry;
use farmhand_core::embedding::HashingEmbedder;
use farmhand_core::models::{PageRecord, SourceType, TableRecord};
use farmhand_core::planner::PlanError;
use farmhand_core::store::MetadataFilter;

// ─── Fake wiki ──────────────────────────────────────────────────────

const BASE: &str = "https://stardewvalleywiki.com";

fn wiki_page(title: &str, body: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{}">{}</a> "#, l, l.trim_start_matches('/')))
        .collect();
    format!(
        r#"<html><head><title>{title} - Stardew Valley Wiki</title></head><body>
<h1 class="firstHeading">{title}</h1>
<div id="mw-content-text"><div class="mw-parser-output">
<p>{body}</p>
<p>{anchors}</p>
</div></div></body></html>"#
    )
}

/// Serves canned HTML by path and records every fetch in order.
struct FakeWiki {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
    fetched_at: Mutex<Vec<Instant>>,
}

impl FakeWiki {
    fn new(pages: &[(&str, String)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(path, html)| (path.to_string(), html.clone()))
                .collect(),
            fetched: Mutex::new(Vec::new()),
            fetched_at: Mutex::new(Vec::new()),
        }
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeWiki {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        self.fetched.lock().unwrap().push(url.path().to_string());
        self.fetched_at.lock().unwrap().push(Instant::now());
        self.pages
            .get(url.path())
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

fn link_graph() -> FakeWiki {
    FakeWiki::new(&[
        (
            "/A",
            wiki_page("A", "Page A about farming.", &["/B", "/C", "/Missing", "/File:A.png"]),
        ),
        ("/B", wiki_page("B", "Page B about crops.", &["/D", "/A", "/C#Section"])),
        ("/C", wiki_page("C", "Page C about seeds.", &["/D", "/E", "/Broken"])),
        ("/D", wiki_page("D", "Page D about fishing.", &["/A"])),
        ("/E", wiki_page("E", "Page E about mining.", &[])),
        ("/Broken", "<html><body><p>no content region</p></body></html>".to_string()),
    ])
}

fn options(max_pages: usize) -> CrawlOptions {
    CrawlOptions {
        max_pages,
        delay: Duration::ZERO,
        relevance_keywords: Vec::new(),
    }
}

fn seeds(paths: &[&str]) -> Vec<Url> {
    let base = Url::parse(BASE).unwrap();
    paths.iter().map(|p| base.join(p).unwrap()).collect()
}

// ─── Crawl ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_crawl_is_breadth_first_and_fetches_each_url_once() {
    let wiki = link_graph();
    let (pages, summary) = crawl(&wiki, &seeds(&["/A"]), &options(100), &NoProgress).await;

    assert_eq!(
        wiki.fetched(),
        vec!["/A", "/B", "/C", "/Missing", "/D", "/E", "/Broken"]
    );
    let titles: Vec<&str> = pages.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["A", "B", "C", "D", "E"]);
    assert_eq!(summary.pages, 5);
    assert_eq!(summary.fetch_failures, 1);
    assert_eq!(summary.extract_failures, 1);
    assert_eq!(summary.remaining, 0);
}

#[tokio::test]
async fn test_crawl_failures_do_not_count_toward_budget() {
    let wiki = link_graph();
    let (pages, summary) = crawl(&wiki, &seeds(&["/A"]), &options(4), &NoProgress).await;

    // "/Missing" fails between C and D and does not use up a slot.
    assert_eq!(wiki.fetched(), vec!["/A", "/B", "/C", "/Missing", "/D"]);
    assert_eq!(pages.len(), 4);
    assert_eq!(pages[3].url, format!("{}/D", BASE));
    assert_eq!(summary.remaining, 2, "E and Broken are still queued");
}

#[tokio::test]
async fn test_crawl_dedupes_seeds_and_respects_relevance_filter() {
    let wiki = link_graph();
    let mut opts = options(100);
    opts.relevance_keywords = vec!["c".to_string()];
    let (pages, _) = crawl(&wiki, &seeds(&["/A", "/A?x=1", "/A#top"]), &opts, &NoProgress).await;

    // Only "/C" among A's links contains the keyword; C's own links do not.
    assert_eq!(wiki.fetched(), vec!["/A", "/C"]);
    assert_eq!(pages.len(), 2);
}

#[tokio::test]
async fn test_crawl_waits_between_fetches_but_not_before_first() {
    let wiki = FakeWiki::new(&[
        ("/A", wiki_page("A", "Page A about farming.", &["/B"])),
        ("/B", wiki_page("B", "Page B about crops.", &["/Missing"])),
    ]);
    let delay = Duration::from_millis(200);
    let opts = CrawlOptions {
        delay,
        ..options(10)
    };

    let started = Instant::now();
    let (pages, _) = crawl(&wiki, &seeds(&["/A"]), &opts, &NoProgress).await;
    let elapsed = started.elapsed();

    assert_eq!(pages.len(), 2);
    let times = wiki.fetched_at.lock().unwrap().clone();
    assert_eq!(times.len(), 3);
    assert!(times[0] - started < delay, "first fetch must not wait");
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= delay);
    }
    assert!(elapsed >= delay * 2);
}

#[tokio::test]
async fn test_crawl_with_only_failing_seeds_returns_nothing() {
    let wiki = link_graph();
    let (pages, summary) =
        crawl(&wiki, &seeds(&["/Missing", "/Broken"]), &options(10), &NoProgress).await;
    assert!(pages.is_empty());
    assert_eq!(summary.fetch_failures + summary.extract_failures, 2);
}

// ─── Index, search, plan ────────────────────────────────────────────

fn page(title: &str, body: &str, infobox: &[(&str, &str)], tables: Vec<TableRecord>) -> PageRecord {
    PageRecord {
        url: format!("{}/{}", BASE, title),
        title: title.to_string(),
        body_text: body.to_string(),
        tables,
        main_image_url: Some(format!("{}/mediawiki/images/{}.png", BASE, title)),
        infobox: infobox
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        scraped_at: 1_700_000_000.0,
    }
}

fn fixture_pages() -> Vec<PageRecord> {
    vec![
        page(
            "Wheat",
            "Wheat is a vegetable crop that grows from Wheat Seeds in summer and fall. \
             Each plant yields 1 wheat per harvest and can be milled into flour.",
            &[
                ("Growth", "4 days"),
                ("Season", "Summer, Fall"),
                ("Seed Price", "10g"),
            ],
            Vec::new(),
        ),
        page(
            "Fishing",
            "Fishing is one of the five skills. Equip a fishing rod, cast into water, \
             and reel the fish in when the bar fills.",
            &[],
            Vec::new(),
        ),
        page(
            "Spring_Crops_Bundle",
            "The Spring Crops Bundle is a bundle in the Pantry of the Community Center.",
            &[],
            vec![TableRecord::from_parts(
                Some("Spring Crops Bundle".to_string()),
                vec!["Item".to_string(), "Quantity".to_string()],
                vec![
                    vec!["Parsnip".to_string(), "1".to_string()],
                    vec!["Green Bean".to_string(), "1".to_string()],
                    vec!["Cauliflower".to_string(), "1".to_string()],
                    vec!["Potato".to_string(), "1".to_string()],
                ],
            )
            .unwrap()],
        ),
    ]
}

async fn indexed(tmp: &TempDir) -> (Retriever, Arc<SqliteStore>) {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("farmhand.sqlite");
    config.chunking.min_chars = 1;

    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    let retriever = Retriever::new(store.clone(), Arc::new(HashingEmbedder::new(256)), 2);

    let chunks = chunk_pages(&config, &fixture_pages());
    retriever.rebuild(&chunks, |_, _| {}).await.unwrap();
    (retriever, store)
}

#[tokio::test]
async fn test_pages_file_survives_crawl_to_index_handoff() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data").join("wiki_content.json");
    save_pages(&path, &fixture_pages()).unwrap();

    let loaded = load_pages(&path).unwrap();
    assert_eq!(loaded, fixture_pages());

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(raw[0]["content"].as_str().unwrap().starts_with("Wheat is"));
    assert!(raw[0]["image_url"].is_string());
}

#[tokio::test]
async fn test_sqlite_index_search_and_filters() {
    let tmp = TempDir::new().unwrap();
    let (retriever, store) = indexed(&tmp).await;
    assert_eq!(store.page_count().await.unwrap(), 3);

    let hits = retriever.search("cast a fishing rod into water", 3, None).await;
    assert_eq!(hits[0].metadata.title, "Fishing");
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

    let tables = retriever
        .search(
            "spring crops bundle items",
            5,
            Some(&MetadataFilter::source_type(SourceType::Table)),
        )
        .await;
    assert!(!tables.is_empty());
    assert!(tables
        .iter()
        .all(|h| h.metadata.source_type == SourceType::Table));
    let table = tables[0].metadata.table.as_ref().unwrap();
    assert_eq!(table.rows.len(), 4);
    assert!(table.rows.iter().all(|r| r.len() == table.headers.len()));
}

#[tokio::test]
async fn test_reindexing_is_idempotent_and_rebuild_replaces() {
    let tmp = TempDir::new().unwrap();
    let (retriever, store) = indexed(&tmp).await;
    let before = retriever.store().count().await.unwrap();

    let mut config = Config::minimal();
    config.chunking.min_chars = 1;
    let chunks = chunk_pages(&config, &fixture_pages());
    retriever.add_chunks(&chunks, |_, _| {}).await.unwrap();
    assert_eq!(retriever.store().count().await.unwrap(), before);

    let only_fishing: Vec<_> = chunks
        .into_iter()
        .filter(|c| c.metadata.title == "Fishing")
        .collect();
    retriever.rebuild(&only_fishing, |_, _| {}).await.unwrap();
    assert_eq!(store.page_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_plan_from_sqlite_index() {
    let tmp = TempDir::new().unwrap();
    let (retriever, _) = indexed(&tmp).await;

    let plan = retriever
        .plan_crop_farming("Wheat", 100, "summer")
        .await
        .unwrap();
    assert_eq!(plan.plants, 100);
    assert_eq!(plan.tiles, 100);
    assert_eq!(plan.seed_cost_min, 1000);
    assert!(plan.render().contains("100"));

    let err = retriever
        .plan_crop_farming("Wheat", 100, "spring")
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::SeasonMismatch { .. }));
    assert!(err.to_string().contains("does not grow in spring"));

    let err = retriever
        .plan_crop_farming("Wheat", 0, "summer")
        .await
        .unwrap_err();
    assert_eq!(err, PlanError::InvalidTarget);
}

#[tokio::test]
async fn test_empty_index_degrades_to_no_results() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("empty.sqlite");
    let retriever = Retriever::open(&config).await.unwrap();
    assert!(retriever.search("wheat", 3, None).await.is_empty());
    assert_eq!(retriever.context_for_query("wheat", 3).await, NO_RESULTS);
}

// ─── Agent ──────────────────────────────────────────────────────────

/// Replays a fixed list of turns and keeps every request it was sent.
struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new(turns: Vec<ModelTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ModelTurn> {
        self.requests.lock().unwrap().push(request.clone());
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

fn call(name: &str, args: serde_json::Value) -> ModelTurn {
    ModelTurn::ToolCalls(vec![ToolCall {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments: args,
    }])
}

fn agent(model: Arc<ScriptedModel>, retriever: Retriever, max_iterations: usize) -> Agent {
    let mut config = Config::minimal().agent;
    config.max_iterations = max_iterations;
    Agent::new(
        model,
        Arc::new(ToolRegistry::with_builtins()),
        retriever,
        config,
    )
}

#[tokio::test]
async fn test_agent_runs_tool_and_merges_source() {
    let tmp = TempDir::new().unwrap();
    let (retriever, _) = indexed(&tmp).await;
    let model = ScriptedModel::new(vec![
        call("search_stardew_knowledge", json!({"query": "how to fish"})),
        ModelTurn::Text(r#"{"text": "Try casting near the river."}"#.to_string()),
    ]);
    let agent = agent(model.clone(), retriever, 3);

    let session = Session::new(Mode::Hints);
    let (response, next) = agent.chat(&session, "How do I fish?", None).await;

    assert_eq!(response.text, "Try casting near the river.");
    assert_eq!(response.mode, Mode::Hints);
    assert_eq!(response.source_url.as_deref(), Some("https://stardewvalleywiki.com/Fishing"));
    assert_eq!(next.history.len(), 1);
    assert!(session.history.is_empty());

    let requests = model.requests.lock().unwrap();
    let first = &requests[0];
    assert_eq!(first.messages[0].role, Role::System);
    assert!(first.messages.last().unwrap().content.starts_with("[HINTS MODE] "));
    assert_eq!(first.tools.len(), 4);
    let tool_msg = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_msg.content.starts_with("Hint: "));
}

#[tokio::test]
async fn test_agent_checklist_from_table() {
    let tmp = TempDir::new().unwrap();
    let (retriever, _) = indexed(&tmp).await;
    let model = ScriptedModel::new(vec![
        call("build_checklist", json!({"topic": "spring crops bundle items"})),
        ModelTurn::Text("Here is what you need.".to_string()),
    ]);
    let agent = agent(model, retriever, 3);

    let (response, _) = agent
        .chat(&Session::new(Mode::Walkthrough), "What goes in the spring crops bundle?", None)
        .await;
    assert_eq!(response.text, "Here is what you need.");
    let checklist = response.checklist.unwrap();
    assert_eq!(checklist, vec!["Parsnip", "Green Bean", "Cauliflower", "Potato"]);
}

#[tokio::test]
async fn test_agent_forces_answer_after_max_iterations() {
    let tmp = TempDir::new().unwrap();
    let (retriever, _) = indexed(&tmp).await;
    let model = ScriptedModel::new(vec![
        call("search_stardew_knowledge", json!({"query": "wheat"})),
        ModelTurn::Text("Wheat grows in summer.".to_string()),
    ]);
    let agent = agent(model.clone(), retriever, 1);

    let (response, _) = agent.chat(&Session::default(), "wheat?", None).await;
    assert_eq!(response.text, "Wheat grows in summer.");

    let requests = model.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].tools.is_empty(), "final turn is made without tools");
}

#[tokio::test]
async fn test_agent_model_failure_is_an_answer() {
    let tmp = TempDir::new().unwrap();
    let (retriever, _) = indexed(&tmp).await;
    let agent = agent(ScriptedModel::new(Vec::new()), retriever, 3);

    let session = Session::new(Mode::Walkthrough);
    let (response, next) = agent.chat(&session, "anything", Some("Year 1")).await;
    assert!(response.text.starts_with("I encountered an error"));
    assert_eq!(next.mode, Mode::Walkthrough);
    assert_eq!(next.history.len(), 1);
}

#[tokio::test]
async fn test_agent_unknown_tool_is_reported_to_model() {
    let tmp = TempDir::new().unwrap();
    let (retriever, _) = indexed(&tmp).await;
    let model = ScriptedModel::new(vec![
        call("summon_junimo", json!({})),
        ModelTurn::Text("ok".to_string()),
    ]);
    let agent = agent(model.clone(), retriever, 3);

    agent.chat(&Session::default(), "hi", None).await;
    let requests = model.requests.lock().unwrap();
    let tool_msg = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_msg.content, "Unknown tool: summon_junimo");
}
