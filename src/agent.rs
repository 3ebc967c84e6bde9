//! Chat agent: modes, sessions, and the tool-calling loop.
//!
//! A [`Session`] is a plain value: the current [`Mode`] plus a bounded
//! window of past exchanges. [`Agent::chat`] takes a session and a
//! message and returns the response together with the next session.
//! Switching modes is [`Session::with_mode`], which also returns a new
//! value.
//!
//! # Turn loop
//!
//! ```text
//! system prompt + history + "[HINTS MODE] question"
//!        │
//!        ▼
//!   ChatModel ──tool calls──▶ ToolRegistry ──ToolOutput──┐
//!        ▲                                               │
//!        └──────────────── tool text ◀───────────────────┘
//!        │
//!      text (JSON envelope or plain) ──▶ ChatResponse
//! ```
//!
//! The model gets at most `agent.max_iterations` tool rounds. If it is
//! still calling tools after that, one last request is made without
//! tools so it has to answer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use farmhand_core::models::TableRecord;

use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatModel, CompletionRequest, ModelTurn, ToolCall};
use crate::search::Retriever;
use crate::tools::{check_table, check_url, ToolContext, ToolOutput, ToolRegistry};

const FALLBACK_REPLY: &str = "I'm sorry, I couldn't process your request.";
const ERROR_REPLY: &str =
    "I encountered an error while processing your request. Please try again.";
const TOOL_ERROR_REPLY: &str = "Sorry, I couldn't retrieve information at the moment.";

// ═══════════════════════════════════════════════════════════════════════
// Modes
// ═══════════════════════════════════════════════════════════════════════

/// Response style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Short nudges without spoilers.
    #[default]
    Hints,
    /// Complete step-by-step answers.
    Walkthrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid mode: {0}. Use 'hints' or 'walkthrough'")]
pub struct InvalidMode(pub String);

/// Human-readable description of a mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub style: &'static str,
    pub response_length: &'static str,
    pub spoiler_protection: &'static str,
}

const HINTS_PROMPT: &str = "You are a helpful Stardew Valley assistant that provides HINTS and SUBTLE GUIDANCE.

Your role:
- Give players gentle nudges in the right direction
- Avoid giving away complete solutions unless specifically asked
- Keep responses concise and encouraging
- Let players discover and learn on their own
- Use phrases like \"You might want to try...\", \"Consider...\", \"Have you thought about...\"

Guidelines:
- Keep responses under 200 words
- Focus on one main hint per response
- Ask follow-up questions to guide discovery
- Avoid spoilers about late-game content
- Encourage experimentation and exploration

When players ask questions, use your tools to find relevant information, then present it as a helpful hint rather than a complete answer.";

const WALKTHROUGH_PROMPT: &str = "You are a comprehensive Stardew Valley guide that provides DETAILED WALKTHROUGHS and COMPLETE SOLUTIONS.

Your role:
- Provide step-by-step instructions
- Give complete and detailed explanations
- Include all relevant information and context
- Be thorough and systematic in your responses
- Help players achieve their goals efficiently

Guidelines:
- Provide comprehensive answers with specific steps
- Include relevant numbers, timings, and requirements
- Give complete item lists and resource requirements
- Explain the reasoning behind strategies
- Cover multiple approaches when applicable

When players ask questions, use your tools to gather comprehensive information and provide detailed, actionable guidance.";

const ENVELOPE_INSTRUCTIONS: &str = "Reply with a single JSON object: {\"text\": string, \"image_url\": string|null, \"table\": {\"headers\": [string], \"rows\": [[string]]}|null, \"checklist\": [string]|null, \"source_url\": string|null}.";

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Hints, Mode::Walkthrough];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Hints => "hints",
            Mode::Walkthrough => "walkthrough",
        }
    }

    pub fn info(&self) -> ModeInfo {
        match self {
            Mode::Hints => ModeInfo {
                name: "Hints Mode",
                description: "Provides subtle guidance and hints without spoilers",
                style: "Encouraging nudges that let you discover solutions",
                response_length: "Concise (under 200 words)",
                spoiler_protection: "High - avoids revealing solutions directly",
            },
            Mode::Walkthrough => ModeInfo {
                name: "Full Walkthrough Mode",
                description: "Provides detailed step-by-step instructions",
                style: "Comprehensive guides with complete solutions",
                response_length: "Detailed (comprehensive explanations)",
                spoiler_protection: "Low - provides complete information",
            },
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Mode::Hints => HINTS_PROMPT,
            Mode::Walkthrough => WALKTHROUGH_PROMPT,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hints" => Ok(Mode::Hints),
            "walkthrough" => Ok(Mode::Walkthrough),
            _ => Err(InvalidMode(s.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
    pub timestamp: f64,
}

/// Conversation state carried between requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub mode: Mode,
    #[serde(default)]
    pub history: Vec<Exchange>,
}

impl Session {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            history: Vec::new(),
        }
    }

    /// The same conversation in another mode.
    pub fn with_mode(&self, mode: Mode) -> Self {
        Self {
            mode,
            history: self.history.clone(),
        }
    }

    /// This session plus one exchange, keeping the last `window` exchanges.
    pub fn with_exchange(&self, user: &str, assistant: &str, window: usize) -> Self {
        let mut history = self.history.clone();
        history.push(Exchange {
            user: user.to_string(),
            assistant: assistant.to_string(),
            timestamp: now_secs(),
        });
        let excess = history.len().saturating_sub(window);
        history.drain(..excess);
        Self {
            mode: self.mode,
            history,
        }
    }

    /// The same mode with no history.
    pub fn cleared(&self) -> Self {
        Self::new(self.mode)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Response envelope
// ═══════════════════════════════════════════════════════════════════════

/// The structured answer the model is asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub table: Option<TableRecord>,
    #[serde(default)]
    pub checklist: Option<Vec<String>>,
    #[serde(default)]
    pub source_url: Option<String>,
}

impl Envelope {
    /// Parse a model reply. A JSON object (optionally inside a ```json
    /// fence) is read as an envelope; anything else becomes its text.
    pub fn parse(reply: &str) -> Self {
        let trimmed = reply.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(trimmed);
        match serde_json::from_str::<Envelope>(body) {
            Ok(envelope) => envelope.sanitized(),
            Err(_) => Envelope {
                text: reply.to_string(),
                ..Default::default()
            },
        }
    }

    /// Drop structured fields that fail validation.
    fn sanitized(mut self) -> Self {
        if let Some(table) = &self.table {
            if let Err(e) = check_table(table) {
                warn!(error = %e, "dropping malformed table from model reply");
                self.table = None;
            }
        }
        if check_url(self.image_url.as_deref()).is_err() {
            self.image_url = None;
        }
        if check_url(self.source_url.as_deref()).is_err() {
            self.source_url = None;
        }
        if let Some(items) = &mut self.checklist {
            items.retain(|i| !i.trim().is_empty());
            if items.is_empty() {
                self.checklist = None;
            }
        }
        self
    }

    /// Fill fields the model left empty from tool outputs.
    fn merge(mut self, extras: Envelope) -> Self {
        if self.image_url.is_none() {
            self.image_url = extras.image_url;
        }
        if self.table.is_none() {
            self.table = extras.table;
        }
        if self.checklist.is_none() {
            self.checklist = extras.checklist;
        }
        if self.source_url.is_none() {
            self.source_url = extras.source_url;
        }
        self
    }

    /// Record the structured parts of a validated tool output. Later
    /// outputs replace earlier ones field by field.
    fn absorb(&mut self, output: &ToolOutput) {
        match output {
            ToolOutput::Search {
                source_url,
                image_url,
                ..
            } => {
                replace_if_some(&mut self.source_url, source_url);
                replace_if_some(&mut self.image_url, image_url);
            }
            ToolOutput::Table {
                table,
                source_url,
                image_url,
                ..
            } => {
                self.table = Some(table.clone());
                replace_if_some(&mut self.source_url, source_url);
                replace_if_some(&mut self.image_url, image_url);
            }
            ToolOutput::Checklist {
                items, source_url, ..
            } => {
                self.checklist = Some(items.clone());
                replace_if_some(&mut self.source_url, source_url);
            }
            ToolOutput::Plan { .. } | ToolOutput::Message { .. } => {}
        }
    }
}

fn replace_if_some(slot: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

/// Body of a chat reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TableRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub mode: Mode,
    pub timestamp: f64,
}

impl ChatResponse {
    fn from_envelope(envelope: Envelope, mode: Mode) -> Self {
        Self {
            text: envelope.text,
            image_url: envelope.image_url,
            table: envelope.table,
            checklist: envelope.checklist,
            source_url: envelope.source_url,
            mode,
            timestamp: now_secs(),
        }
    }
}

fn now_secs() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

// ═══════════════════════════════════════════════════════════════════════
// Agent
// ═══════════════════════════════════════════════════════════════════════

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    retriever: Retriever,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        retriever: Retriever,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            tools,
            retriever,
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `message` in `session`. Returns the response and the
    /// session with this exchange appended.
    ///
    /// `context` is optional player-supplied background (current season,
    /// farm type, ...) prepended to the question.
    pub async fn chat(
        &self,
        session: &Session,
        message: &str,
        context: Option<&str>,
    ) -> (ChatResponse, Session) {
        let envelope = match self.run_turns(session, message, context).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "chat turn failed");
                Envelope {
                    text: ERROR_REPLY.to_string(),
                    ..Default::default()
                }
            }
        };
        let next = session.with_exchange(message, &envelope.text, self.config.history_window);
        (ChatResponse::from_envelope(envelope, session.mode), next)
    }

    fn initial_messages(
        &self,
        session: &Session,
        message: &str,
        context: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\n{}",
            session.mode.system_prompt(),
            ENVELOPE_INSTRUCTIONS
        ))];
        let skip = session
            .history
            .len()
            .saturating_sub(self.config.history_window);
        for exchange in &session.history[skip..] {
            messages.push(ChatMessage::user(exchange.user.clone()));
            messages.push(ChatMessage::assistant(exchange.assistant.clone()));
        }

        let tag = format!("[{} MODE] ", session.mode.as_str().to_uppercase());
        let question = match context.map(str::trim).filter(|c| !c.is_empty()) {
            Some(ctx) => format!("{}Context: {}\n\n{}", tag, ctx, message),
            None => format!("{}{}", tag, message),
        };
        messages.push(ChatMessage::user(question));
        messages
    }

    async fn run_turns(
        &self,
        session: &Session,
        message: &str,
        context: Option<&str>,
    ) -> anyhow::Result<Envelope> {
        let tool_ctx = ToolContext::new(self.retriever.clone(), session.mode);
        let mut request = CompletionRequest {
            messages: self.initial_messages(session, message, context),
            tools: self.tools.specs(),
            max_tokens: self.config.max_response_length,
        };
        let mut extras = Envelope::default();
        let mut last_tool_text: Option<String> = None;

        for iteration in 0..self.config.max_iterations {
            match self.model.complete(&request).await? {
                ModelTurn::Text(reply) => {
                    debug!(iteration, "model answered");
                    return Ok(Envelope::parse(&reply).merge(extras));
                }
                ModelTurn::ToolCalls(calls) => {
                    request
                        .messages
                        .push(ChatMessage::assistant_tool_calls(calls.clone()));
                    for call in &calls {
                        let output = self.run_tool(call, &tool_ctx).await;
                        extras.absorb(&output);
                        let text = output.text();
                        request.messages.push(ChatMessage::tool(&call.id, &text));
                        last_tool_text = Some(text);
                    }
                }
            }
        }

        request.tools.clear();
        match self.model.complete(&request).await? {
            ModelTurn::Text(reply) => Ok(Envelope::parse(&reply).merge(extras)),
            ModelTurn::ToolCalls(_) => Ok(Envelope {
                text: last_tool_text.unwrap_or_else(|| FALLBACK_REPLY.to_string()),
                ..Default::default()
            }
            .merge(extras)),
        }
    }

    async fn run_tool(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.tools.find(&call.name) else {
            warn!(tool = %call.name, "model called an unknown tool");
            return ToolOutput::message(format!("Unknown tool: {}", call.name));
        };
        info!(tool = %call.name, "running tool");
        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(output) => match output.validate() {
                Ok(()) => output,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool output failed validation");
                    ToolOutput::message(output.text())
                }
            },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                ToolOutput::message(TOOL_ERROR_REPLY)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("Walkthrough".parse::<Mode>().unwrap(), Mode::Walkthrough);
        assert_eq!(" hints ".parse::<Mode>().unwrap(), Mode::Hints);
        let err = "expert".parse::<Mode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid mode: expert. Use 'hints' or 'walkthrough'"
        );
        assert_eq!(Mode::Walkthrough.to_string(), "walkthrough");
    }

    #[test]
    fn test_mode_info() {
        assert_eq!(Mode::Hints.info().name, "Hints Mode");
        assert_eq!(Mode::Walkthrough.info().name, "Full Walkthrough Mode");
        assert!(Mode::Hints.system_prompt().contains("HINTS"));
    }

    #[test]
    fn test_with_mode_is_pure() {
        let session = Session::new(Mode::Hints).with_exchange("q", "a", 5);
        let switched = session.with_mode(Mode::Walkthrough);
        assert_eq!(session.mode, Mode::Hints);
        assert_eq!(switched.mode, Mode::Walkthrough);
        assert_eq!(switched.history, session.history);
    }

    #[test]
    fn test_history_window() {
        let mut session = Session::default();
        for i in 0..7 {
            session = session.with_exchange(&format!("q{}", i), "a", 5);
        }
        assert_eq!(session.history.len(), 5);
        assert_eq!(session.history[0].user, "q2");
        assert!(session.cleared().history.is_empty());
    }

    #[test]
    fn test_envelope_parse_json_and_plain() {
        let env = Envelope::parse(
            r#"{"text": "Plant wheat.", "source_url": "https://stardewvalleywiki.com/Wheat", "checklist": ["a", " "]}"#,
        );
        assert_eq!(env.text, "Plant wheat.");
        assert_eq!(env.checklist, Some(vec!["a".to_string()]));
        assert!(env.source_url.is_some());

        let fenced = Envelope::parse("```json\n{\"text\": \"hi\"}\n```");
        assert_eq!(fenced.text, "hi");

        let plain = Envelope::parse("Just talk.");
        assert_eq!(plain.text, "Just talk.");
        assert!(plain.table.is_none());
    }

    #[test]
    fn test_envelope_drops_invalid_parts() {
        let env = Envelope::parse(
            r#"{"text": "t", "image_url": "not a url", "table": {"headers": ["A", "B"], "rows": [["1"]]}}"#,
        );
        assert!(env.image_url.is_none());
        assert!(env.table.is_none());
    }

    #[test]
    fn test_merge_prefers_model_fields() {
        let model = Envelope {
            text: "t".into(),
            source_url: Some("https://a.example/x".into()),
            ..Default::default()
        };
        let mut extras = Envelope::default();
        extras.absorb(&ToolOutput::Search {
            text: "s".into(),
            source_url: Some("https://b.example/y".into()),
            image_url: Some("https://b.example/img.png".into()),
        });
        let merged = model.merge(extras);
        assert_eq!(merged.source_url.as_deref(), Some("https://a.example/x"));
        assert_eq!(merged.image_url.as_deref(), Some("https://b.example/img.png"));
    }

    #[test]
    fn test_chat_response_serializes_mode_lowercase() {
        let resp = ChatResponse::from_envelope(
            Envelope {
                text: "hi".into(),
                ..Default::default()
            },
            Mode::Walkthrough,
        );
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["mode"], "walkthrough");
        assert!(v.get("table").is_none());
    }
}
