//! HTTP chat API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Ask a question: `{message, mode?, context?}` |
//! | `POST` | `/api/mode` | Switch response mode: `{mode}` |
//! | `GET`  | `/api/status` | Current mode, readiness and index counts |
//! | `GET`  | `/api/modes` | Both modes with their descriptions |
//! | `GET`  | `/api/history` | Exchanges in the current session |
//! | `POST` | `/api/clear` | Drop the session history |
//! | `POST` | `/api/plan` | Crop plan: `{crop, target_yield, season}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `agent_unavailable` (503),
//! `internal` (500).
//!
//! # Session
//!
//! The server keeps one [`Session`] behind a lock. Handlers read a copy,
//! compute the next session with the pure transitions on [`Session`], and
//! store the result. Two chats racing on the same session both get
//! answered; the later write wins.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser chat UI
//! can be served from anywhere.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use farmhand_core::planner::{FarmPlan, PlanError};

use crate::agent::{Agent, ChatResponse, Exchange, Mode, ModeInfo, Session};
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::llm::create_chat_model;
use crate::migrate;
use crate::search::Retriever;
use crate::sqlite_store::SqliteStore;
use crate::stats::collect_stats;
use crate::tools::ToolRegistry;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    retriever: Retriever,
    /// `None` when the chat model could not be created (e.g. no API key).
    agent: Option<Arc<Agent>>,
    session: Arc<RwLock<Session>>,
}

impl AppState {
    /// Open the index and build the agent described by `config`.
    ///
    /// A chat model that fails to initialise is logged and leaves the
    /// server running without `/api/chat`.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let embedder = embedding::create_provider(&config.embedding)?;
        let retriever = Retriever::new(store.clone(), embedder, config.retrieval.batch_size);

        let agent = match create_chat_model(&config.agent) {
            Ok(model) => Some(Arc::new(Agent::new(
                Arc::from(model),
                Arc::new(ToolRegistry::with_builtins()),
                retriever.clone(),
                config.agent.clone(),
            ))),
            Err(e) => {
                warn!(error = %e, "chat model unavailable; /api/chat disabled");
                None
            }
        };

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            retriever,
            agent,
            session: Arc::new(RwLock::new(Session::new(config.agent.default_mode))),
        })
    }
}

/// All routes with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/status", get(handle_status))
        .route("/api/modes", get(handle_modes))
        .route("/api/history", get(handle_history))
        .route("/api/clear", post(handle_clear))
        .route("/api/plan", post(handle_plan))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// `farmhand serve`: bind to `[server].bind` and serve until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::open(config).await?;
    let bind_addr = config.server.bind.clone();
    let agent_ready = state.agent.is_some();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, agent_ready, "server listening");
    println!("farmhand listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Error response
// ═══════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn agent_unavailable() -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "agent_unavailable".to_string(),
        message: "Chat agent not initialized. Check the agent provider and OPENAI_API_KEY."
            .to_string(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

fn parse_mode(raw: &str) -> Result<Mode, AppError> {
    raw.parse::<Mode>().map_err(|e| bad_request(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════
// POST /api/chat
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    context: Option<String>,
}

/// A `mode` in the request switches the session before answering.
async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let mode = req.mode.as_deref().map(parse_mode).transpose()?;
    let agent = state.agent.as_ref().ok_or_else(agent_unavailable)?;

    let session = {
        let current = state.session.read().await;
        match mode {
            Some(m) => current.with_mode(m),
            None => current.clone(),
        }
    };

    let (response, next) = agent
        .chat(&session, req.message.trim(), req.context.as_deref())
        .await;
    *state.session.write().await = next;

    Ok(Json(response))
}

// ═══════════════════════════════════════════════════════════════════════
// Modes
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

#[derive(Serialize)]
struct ModeResponse {
    success: bool,
    mode: Mode,
    mode_info: ModeInfo,
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<ModeResponse>, AppError> {
    let mode = parse_mode(&req.mode)?;
    let mut session = state.session.write().await;
    *session = session.with_mode(mode);
    info!(mode = %mode, "mode switched");

    Ok(Json(ModeResponse {
        success: true,
        mode,
        mode_info: mode.info(),
    }))
}

#[derive(Serialize)]
struct ModeEntry {
    mode: Mode,
    #[serde(flatten)]
    info: ModeInfo,
}

#[derive(Serialize)]
struct ModesResponse {
    current: Mode,
    modes: Vec<ModeEntry>,
}

async fn handle_modes(State(state): State<AppState>) -> Json<ModesResponse> {
    Json(ModesResponse {
        current: state.session.read().await.mode,
        modes: Mode::ALL
            .iter()
            .map(|m| ModeEntry {
                mode: *m,
                info: m.info(),
            })
            .collect(),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Status, history
// ═══════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct StatusResponse {
    mode: Mode,
    mode_info: ModeInfo,
    is_ready: bool,
    model: Option<String>,
    pages: usize,
    chunks: usize,
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let mode = state.session.read().await.mode;
    let stats = collect_stats(&state.store).await.map_err(internal)?;
    Ok(Json(StatusResponse {
        mode,
        mode_info: mode.info(),
        is_ready: state.agent.is_some(),
        model: state.agent.as_ref().map(|a| a.model_name().to_string()),
        pages: stats.pages,
        chunks: stats.chunks,
    }))
}

#[derive(Serialize)]
struct HistoryResponse {
    mode: Mode,
    history: Vec<Exchange>,
}

async fn handle_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let session = state.session.read().await;
    Json(HistoryResponse {
        mode: session.mode,
        history: session.history.clone(),
    })
}

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
}

async fn handle_clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let mut session = state.session.write().await;
    *session = session.cleared();
    Json(ClearResponse { success: true })
}

// ═══════════════════════════════════════════════════════════════════════
// POST /api/plan
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct PlanRequest {
    crop: String,
    target_yield: u32,
    season: String,
}

#[derive(Serialize)]
struct PlanResponse {
    success: bool,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<FarmPlan>,
}

/// Planner failures are ordinary answers (`success: false`); only a
/// malformed request is an HTTP error.
async fn handle_plan(
    State(state): State<AppState>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<PlanResponse>, AppError> {
    if req.crop.trim().is_empty() || req.season.trim().is_empty() {
        return Err(bad_request("crop and season must not be empty"));
    }
    match state
        .retriever
        .plan_crop_farming(req.crop.trim(), req.target_yield, req.season.trim())
        .await
    {
        Ok(plan) => Ok(Json(PlanResponse {
            success: true,
            text: plan.render(),
            plan: Some(plan),
        })),
        Err(PlanError::InvalidTarget) => Err(bad_request(PlanError::InvalidTarget.to_string())),
        Err(e) => Ok(Json(PlanResponse {
            success: false,
            text: e.to_string(),
            plan: None,
        })),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// GET /health
// ═══════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    agent_ready: bool,
    version: String,
    db: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        agent_ready: state.agent.is_some(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db: state.config.db.path.display().to_string(),
    })
}
