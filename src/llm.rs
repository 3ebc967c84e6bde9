//! Chat model abstraction.
//!
//! The agent talks to a language model through [`ChatModel`]: one
//! [`complete`](ChatModel::complete) call per turn, answered either with
//! text or with tool calls.
//!
//! | Provider | Struct | Notes |
//! |----------|--------|-------|
//! | `openai` | [`OpenAIChatModel`] | `POST /v1/chat/completions`; needs `OPENAI_API_KEY` |
//! | `offline` | [`RetrievalOnlyModel`] | no network: one search, then echoes the result |

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, "")
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Function-calling description of a tool, as offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: usize,
}

/// What the model did with its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelTurn>;
}

/// Build the chat model selected by `agent.provider`.
pub fn create_chat_model(config: &AgentConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIChatModel::new(config)?)),
        "offline" => Ok(Box::new(RetrievalOnlyModel)),
        other => bail!("Unknown agent provider: {}", other),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// OpenAI
// ═══════════════════════════════════════════════════════════════════════

pub struct OpenAIChatModel {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            client,
        })
    }
}

fn message_to_openai(message: &ChatMessage) -> Value {
    match message.role {
        Role::Assistant if !message.tool_calls.is_empty() => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": message.tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": {
                    "name": c.name,
                    "arguments": c.arguments.to_string(),
                }
            })).collect::<Vec<_>>(),
        }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        role => json!({ "role": role, "content": message.content }),
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

/// Tool arguments arrive as a JSON string. Anything that is not a JSON
/// object is passed through as `{"input": ...}`.
fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => json!({ "input": raw }),
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ModelTurn> {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(message_to_openai).collect::<Vec<_>>(),
            "max_tokens": request.max_tokens,
            "temperature": 0.7,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| json!({ "type": "function", "function": t }))
                .collect();
        }

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI chat request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("OpenAI API error ({}): {}", status, text);
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .context("Malformed OpenAI chat response")?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            bail!("OpenAI returned no choices");
        };

        if !choice.message.tool_calls.is_empty() {
            let calls = choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    arguments: parse_arguments(&c.function.arguments),
                    name: c.function.name,
                })
                .collect();
            return Ok(ModelTurn::ToolCalls(calls));
        }
        Ok(ModelTurn::Text(choice.message.content.unwrap_or_default()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Offline
// ═══════════════════════════════════════════════════════════════════════

/// A model that needs no network: it searches the knowledge base with
/// the user's message and answers with the tool's result.
pub struct RetrievalOnlyModel;

#[async_trait]
impl ChatModel for RetrievalOnlyModel {
    fn name(&self) -> &str {
        "offline"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ModelTurn> {
        if let Some(tool_result) = request
            .messages
            .iter()
            .rev()
            .take_while(|m| m.role != Role::User)
            .find(|m| m.role == Role::Tool)
        {
            return Ok(ModelTurn::Text(tool_result.content.clone()));
        }

        let question = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let offers_search = request
            .tools
            .iter()
            .any(|t| t.name == "search_stardew_knowledge");
        if !offers_search {
            return Ok(ModelTurn::Text(crate::search::NO_RESULTS.to_string()));
        }
        Ok(ModelTurn::ToolCalls(vec![ToolCall {
            id: "call_0".to_string(),
            name: "search_stardew_knowledge".to_string(),
            arguments: json!({ "query": strip_mode_tag(&question) }),
        }]))
    }
}

/// Remove a leading `[HINTS MODE] ` style tag from a user message.
fn strip_mode_tag(message: &str) -> &str {
    let trimmed = message.trim_start();
    if trimmed.starts_with('[') {
        if let Some(end) = trimmed.find("] ") {
            return &trimmed[end + 2..];
        }
    }
    trimmed
}
