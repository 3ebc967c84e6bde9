//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. `load_config` validates ranges after parsing.
//!
//! ```toml
//! [db]
//! path = "./data/farmhand.sqlite"
//!
//! [crawl]
//! base_url = "https://stardewvalleywiki.com"
//! max_pages = 200
//! delay_ms = 1000
//!
//! [embedding]
//! provider = "hashing"   # disabled | hashing | openai
//! dims = 384
//!
//! [agent]
//! default_mode = "hints"
//! provider = "openai"    # openai | offline
//!
//! [server]
//! bind = "127.0.0.1:8002"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use farmhand_core::chunk::ChunkParams;

use crate::agent::Mode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_pages_path")]
    pub output: PathBuf,
    #[serde(default = "default_seed_paths")]
    pub seed_paths: Vec<String>,
    /// When non-empty, discovered links must contain one of these
    /// substrings (case-insensitive) to be enqueued. Set to `[]` to follow
    /// every article link.
    #[serde(default = "default_relevance_keywords")]
    pub relevance_keywords: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_pages: default_max_pages(),
            delay_ms: default_delay_ms(),
            timeout_secs: default_crawl_timeout(),
            user_agent: default_user_agent(),
            output: default_pages_path(),
            seed_paths: default_seed_paths(),
            relevance_keywords: default_relevance_keywords(),
        }
    }
}

fn default_base_url() -> String {
    "https://stardewvalleywiki.com".to_string()
}
fn default_max_pages() -> usize {
    200
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_crawl_timeout() -> u64 {
    10
}
fn default_user_agent() -> String {
    format!(
        "farmhand/{} (Stardew Valley help bot; polite crawler)",
        env!("CARGO_PKG_VERSION")
    )
}
fn default_pages_path() -> PathBuf {
    PathBuf::from("./data/wiki_content.json")
}

fn default_relevance_keywords() -> Vec<String> {
    [
        "crop", "animal", "fish", "mineral", "gem", "artifact", "villager", "marriage",
        "heart", "event", "festival", "quest", "bundle", "skill", "mine", "desert",
        "island", "cave", "forest", "beach", "mountain", "building", "machine", "tool",
        "weapon", "ring", "boot", "hat", "food", "recipe", "cooking", "craft", "artisan",
        "seed", "fruit", "vegetable", "flower", "tree", "season", "weather", "calendar",
        "community", "center", "joja", "achievement", "perfection", "golden", "prismatic",
        "ancient", "rare", "legendary", "statue", "obelisk",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_seed_paths() -> Vec<String> {
    [
        "/Stardew_Valley_Wiki",
        "/Crops",
        "/Seeds",
        "/Fertilizer",
        "/Animals",
        "/Fishing",
        "/Mining",
        "/Foraging",
        "/Cooking",
        "/Crafting",
        "/Skills",
        "/Friendship",
        "/Marriage",
        "/Villagers",
        "/Community_Center",
        "/Bundles",
        "/Festivals",
        "/Calendar",
        "/Seasons",
        "/Weather",
        "/Greenhouse",
        "/Artisan_Goods",
        "/Parsnip",
        "/Cauliflower",
        "/Potato",
        "/Kale",
        "/Garlic",
        "/Melon",
        "/Tomato",
        "/Hot_Pepper",
        "/Blueberry",
        "/Radish",
        "/Wheat",
        "/Hops",
        "/Corn",
        "/Eggplant",
        "/Pumpkin",
        "/Cranberries",
        "/Grape",
        "/Ancient_Fruit",
        "/Starfruit",
        "/Sweet_Gem_Berry",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_table_row_limit")]
    pub table_row_limit: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            min_chars: default_min_chars(),
            table_row_limit: default_table_row_limit(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            max_chars: self.max_chars,
            overlap_chars: self.overlap_chars,
            min_chars: self.min_chars,
            table_row_limit: self.table_row_limit,
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}
fn default_min_chars() -> usize {
    50
}
fn default_table_row_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default)]
    pub default_mode: Mode,
    /// `openai` or `offline` (retrieval only, no model calls).
    #[serde(default = "default_agent_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::default(),
            provider: default_agent_provider(),
            model: default_chat_model(),
            max_response_length: default_max_response_length(),
            max_iterations: default_max_iterations(),
            history_window: default_history_window(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_agent_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_max_response_length() -> usize {
    500
}
fn default_max_iterations() -> usize {
    3
}
fn default_history_window() -> usize {
    5
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8002".to_string()
}

impl Config {
    /// Defaults with the database under `./data`, for commands that can
    /// run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/farmhand.sqlite"),
            },
            crawl: CrawlConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Crawl
    if config.crawl.max_pages == 0 {
        bail!("crawl.max_pages must be > 0");
    }
    url::Url::parse(&config.crawl.base_url)
        .with_context(|| format!("crawl.base_url is not a valid URL: {}", config.crawl.base_url))?;

    // Chunking
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.batch_size == 0 {
        bail!("retrieval.batch_size must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    // Agent
    match config.agent.provider.as_str() {
        "openai" | "offline" => {}
        other => bail!(
            "Unknown agent provider: '{}'. Must be openai or offline.",
            other
        ),
    }
    if config.agent.max_iterations == 0 {
        bail!("agent.max_iterations must be >= 1");
    }

    Ok(())
}
