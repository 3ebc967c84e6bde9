//! Agent tools.
//!
//! Tools are what the chat model can call during a turn. Each returns a
//! typed [`ToolOutput`]; the agent feeds its text back to the model and
//! merges its structured parts (table, checklist, image, source link) into
//! the final response.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │  search_stardew_knowledge  get_specific_info │
//! │  plan_crop_farming         build_checklist   │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!          ToolContext { retriever, mode }
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use farmhand_core::models::{SearchHit, SourceType, TableRecord};
use farmhand_core::planner::FarmPlan;

use crate::agent::Mode;
use crate::llm::ToolSpec;
use crate::search::{format_context, Retriever};

const SEARCH_TOP_K: usize = 3;
const SPECIFIC_INFO_TOP_K: usize = 2;
const CHECKLIST_MAX_ITEMS: usize = 20;

// ═══════════════════════════════════════════════════════════════════════
// Tool output
// ═══════════════════════════════════════════════════════════════════════

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutput {
    Search {
        text: String,
        source_url: Option<String>,
        image_url: Option<String>,
    },
    Table {
        text: String,
        table: TableRecord,
        source_url: Option<String>,
        image_url: Option<String>,
    },
    Checklist {
        title: String,
        items: Vec<String>,
        source_url: Option<String>,
    },
    Plan {
        text: String,
        plan: FarmPlan,
    },
    Message {
        text: String,
    },
}

impl ToolOutput {
    pub fn message(text: impl Into<String>) -> Self {
        ToolOutput::Message { text: text.into() }
    }

    /// Text handed back to the model.
    pub fn text(&self) -> String {
        match self {
            ToolOutput::Search { text, .. }
            | ToolOutput::Table { text, .. }
            | ToolOutput::Plan { text, .. }
            | ToolOutput::Message { text } => text.clone(),
            ToolOutput::Checklist { title, items, .. } => {
                let mut out = format!("Checklist: {}", title);
                for item in items {
                    out.push_str("\n- ");
                    out.push_str(item);
                }
                out
            }
        }
    }

    /// Check the structured parts before they reach a response.
    pub fn validate(&self) -> Result<()> {
        match self {
            ToolOutput::Search {
                source_url,
                image_url,
                ..
            } => {
                check_url(source_url.as_deref())?;
                check_url(image_url.as_deref())?;
            }
            ToolOutput::Table {
                table,
                source_url,
                image_url,
                ..
            } => {
                check_table(table)?;
                check_url(source_url.as_deref())?;
                check_url(image_url.as_deref())?;
            }
            ToolOutput::Checklist {
                items, source_url, ..
            } => {
                if items.is_empty() || items.iter().any(|i| i.trim().is_empty()) {
                    bail!("checklist must have non-empty items");
                }
                check_url(source_url.as_deref())?;
            }
            ToolOutput::Plan { plan, .. } => {
                if plan.plants == 0 {
                    bail!("plan has no plants");
                }
            }
            ToolOutput::Message { .. } => {}
        }
        Ok(())
    }
}

/// Table shape check shared with model-supplied tables.
pub fn check_table(table: &TableRecord) -> Result<()> {
    if table.headers.is_empty() || table.rows.is_empty() {
        bail!("table must have headers and rows");
    }
    if let Some(row) = table.rows.iter().find(|r| r.len() != table.headers.len()) {
        bail!(
            "table row has {} cells, expected {}",
            row.len(),
            table.headers.len()
        );
    }
    Ok(())
}

/// URL check shared with model-supplied links: absolute http(s) only.
pub fn check_url(url: Option<&str>) -> Result<()> {
    if let Some(u) = url {
        let parsed = url::Url::parse(u).map_err(|e| anyhow::anyhow!("invalid url {}: {}", u, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("url must be http(s): {}", u);
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Tool trait and context
// ═══════════════════════════════════════════════════════════════════════

/// What a tool can reach while it runs.
pub struct ToolContext {
    retriever: Retriever,
    mode: Mode,
}

impl ToolContext {
    pub fn new(retriever: Retriever, mode: Mode) -> Self {
        Self { retriever, mode }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier the model calls the tool by.
    fn name(&self) -> &str;

    /// One line the model uses to decide whether to call the tool.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the arguments.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

fn str_param<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| params.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn table_hit(hits: &[SearchHit]) -> Option<(&SearchHit, &TableRecord)> {
    hits.iter().find_map(|h| match (&h.metadata.source_type, &h.metadata.table) {
        (SourceType::Table, Some(table)) => Some((h, table)),
        _ => None,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

/// General knowledge-base search, formatted for the session mode.
pub struct SearchKnowledgeTool;

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_stardew_knowledge"
    }

    fn description(&self) -> &str {
        "Search the Stardew Valley knowledge base for information about gameplay, items, characters, or strategies."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look up" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(query) = str_param(&params, &["query", "input"]) else {
            bail!("query must not be empty");
        };

        let hits = ctx.retriever().search(query, SEARCH_TOP_K, None).await;
        let Some(first) = hits.first() else {
            return Ok(ToolOutput::message(
                "No specific information found in the knowledge base.",
            ));
        };

        let text = match ctx.mode() {
            Mode::Hints => format!("Hint: {}...", truncate_chars(&first.content, 200)),
            Mode::Walkthrough => hits
                .iter()
                .map(|h| format!("From {}: {}", h.metadata.title, truncate_chars(&h.content, 300)))
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        let source_url = Some(first.metadata.url.clone());
        let image_url = first.metadata.image_url.clone();

        if first.metadata.source_type == SourceType::Table {
            if let Some(table) = &first.metadata.table {
                return Ok(ToolOutput::Table {
                    text,
                    table: table.clone(),
                    source_url,
                    image_url,
                });
            }
        }
        Ok(ToolOutput::Search {
            text,
            source_url,
            image_url,
        })
    }
}

/// Focused lookup on one topic.
pub struct SpecificInfoTool;

#[async_trait]
impl Tool for SpecificInfoTool {
    fn name(&self) -> &str {
        "get_specific_info"
    }

    fn description(&self) -> &str {
        "Get detailed information about a specific topic in Stardew Valley (crops, animals, characters, locations, etc.)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string", "description": "Crop, villager, item or location" }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(topic) = str_param(&params, &["topic", "input"]) else {
            bail!("topic must not be empty");
        };

        let query = format!("detailed information about {} in Stardew Valley", topic);
        let hits = ctx.retriever().search(&query, SPECIFIC_INFO_TOP_K, None).await;
        let Some(first) = hits.first() else {
            return Ok(ToolOutput::message(format!(
                "No detailed information found about {}.",
                topic
            )));
        };

        let text = match ctx.mode() {
            Mode::Hints => format!(
                "Quick tip about {}: {}...",
                topic,
                truncate_chars(&first.content, 150)
            ),
            Mode::Walkthrough => format_context(&hits),
        };
        Ok(ToolOutput::Search {
            text,
            source_url: Some(first.metadata.url.clone()),
            image_url: first.metadata.image_url.clone(),
        })
    }
}

/// Crop planting calculator over retrieved wiki data.
pub struct CropPlanTool;

#[async_trait]
impl Tool for CropPlanTool {
    fn name(&self) -> &str {
        "plan_crop_farming"
    }

    fn description(&self) -> &str {
        "Plan how many plants, tiles and seeds are needed to harvest a target amount of a crop in a season."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "crop_name": { "type": "string", "description": "Crop to plant, e.g. Wheat" },
                "target_yield": { "type": "integer", "minimum": 1, "description": "Units to harvest" },
                "season": { "type": "string", "enum": ["spring", "summer", "fall", "winter"] }
            },
            "required": ["crop_name", "target_yield", "season"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(crop) = str_param(&params, &["crop_name", "crop"]) else {
            bail!("crop_name must not be empty");
        };
        let Some(season) = str_param(&params, &["season"]) else {
            bail!("season must not be empty");
        };
        let target = params
            .get("target_yield")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);

        match ctx.retriever().plan_crop_farming(crop, target, season).await {
            Ok(plan) => Ok(ToolOutput::Plan {
                text: plan.render(),
                plan,
            }),
            // Planner failures are answers for the player, not tool errors.
            Err(e) => Ok(ToolOutput::message(e.to_string())),
        }
    }
}

/// Turn a table or a list on the wiki into a checklist.
pub struct ChecklistTool;

#[async_trait]
impl Tool for ChecklistTool {
    fn name(&self) -> &str {
        "build_checklist"
    }

    fn description(&self) -> &str {
        "Build a checklist (bundle items, crops to plant, gifts to give) from the knowledge base."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string", "description": "What the checklist is for" }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(topic) = str_param(&params, &["topic", "input"]) else {
            bail!("topic must not be empty");
        };

        let hits = ctx.retriever().search(topic, SEARCH_TOP_K, None).await;

        if let Some((hit, table)) = table_hit(&hits) {
            let items = table_items(table);
            if !items.is_empty() {
                return Ok(ToolOutput::Checklist {
                    title: table.title.clone().unwrap_or_else(|| hit.metadata.title.clone()),
                    items,
                    source_url: Some(hit.metadata.url.clone()),
                });
            }
        }

        if let Some(hit) = hits.iter().find(|h| h.metadata.source_type == SourceType::Text) {
            let items = list_items(&hit.content);
            if !items.is_empty() {
                return Ok(ToolOutput::Checklist {
                    title: hit.metadata.title.clone(),
                    items,
                    source_url: Some(hit.metadata.url.clone()),
                });
            }
        }

        Ok(ToolOutput::message(format!(
            "Could not build a checklist for {}.",
            topic
        )))
    }
}

/// Values of the first column that holds names rather than image links.
fn table_items(table: &TableRecord) -> Vec<String> {
    let is_link = |v: &str| v.starts_with("http://") || v.starts_with("https://");
    let Some(col) = (0..table.headers.len()).find(|&c| {
        table
            .rows
            .iter()
            .filter_map(|r| r.get(c))
            .any(|v| !v.trim().is_empty() && !is_link(v))
    }) else {
        return Vec::new();
    };

    let mut items: Vec<String> = Vec::new();
    for row in &table.rows {
        let Some(value) = row.get(col).map(|v| v.trim()) else {
            continue;
        };
        if value.is_empty() || is_link(value) || items.iter().any(|i| i == value) {
            continue;
        }
        items.push(value.to_string());
        if items.len() == CHECKLIST_MAX_ITEMS {
            break;
        }
    }
    items
}

/// Bulleted or numbered lines, markers removed.
fn list_items(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let stripped = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.strip_prefix("• "))
                .or_else(|| {
                    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
                    if digits > 0 {
                        line[digits..]
                            .strip_prefix(". ")
                            .or_else(|| line[digits..].strip_prefix(") "))
                    } else {
                        None
                    }
                })?;
            let item = stripped.trim();
            (!item.is_empty()).then(|| item.to_string())
        })
        .take(CHECKLIST_MAX_ITEMS)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of the tools offered to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with the four built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchKnowledgeTool));
        registry.register(Box::new(SpecificInfoTool));
        registry.register(Box::new(CropPlanTool));
        registry.register(Box::new(ChecklistTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Function-calling specs for every registered tool.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
