use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::chat::{ChatError, ChatService};
use crate::config::{AppConfig, Secrets};
use crate::llm::{LlmGenerator, LogObserver, ResponseGenerator, RunTracer};
use crate::page::PageRenderer;
use crate::session::{Session, SessionStore, Turn};

/// Upper bound on request bodies; one chat message per request.
const BODY_LIMIT_BYTES: usize = 64 * 1024;

/// Build the LLM-backed generator with its observers.
#[must_use]
pub fn build_generator(config: &AppConfig, secrets: &Secrets) -> LlmGenerator {
    let settings = config.llm_settings(secrets);
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        temperature = settings.temperature,
        protocol = ?settings.protocol,
        "LLM configuration loaded"
    );

    let mut generator = LlmGenerator::new(settings).with_observer(Arc::new(LogObserver));
    if config.tracing.enabled {
        info!(
            name: "run_tracing.enabled",
            endpoint = %config.tracing.endpoint,
            project = %config.tracing.project,
            "Run tracing enabled"
        );
        generator = generator.with_observer(Arc::new(RunTracer::new(
            &config.tracing.endpoint,
            &secrets.tracing_api_key,
            &config.tracing.project,
        )));
    }
    generator
}

/// Assemble the shared handler state around a generator.
pub fn build_state(
    config: &AppConfig,
    generator: Arc<dyn ResponseGenerator>,
) -> anyhow::Result<AppState> {
    let chat = ChatService::new(generator).with_history(config.llm.include_history);
    let pages = PageRenderer::new(config.ui.clone())?;

    Ok(AppState {
        sessions: SessionStore::new(),
        chat: Arc::new(chat),
        pages: Arc::new(pages),
    })
}

/// Build the router for the chat page and JSON API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/chat", post(chat_form_handler))
        .route("/health", get(health_handler))
        .route("/api/chat", post(api_chat))
        .route("/api/sessions", post(api_create_session))
        .route(
            "/api/sessions/{id}",
            get(api_get_session).delete(api_end_session),
        )
        .route("/api/sessions/{id}/turns", get(api_get_turns))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, secrets: Secrets) -> anyhow::Result<()> {
    let generator = build_generator(&config, &secrets);
    let state = build_state(&config, Arc::new(generator))?;

    let idle_timeout = Duration::from_secs(config.session.idle_timeout_secs);
    let sweep_every = Duration::from_secs(config.session.sweep_interval_secs);
    let _sweeper = state.sessions.spawn_sweeper(sweep_every, idle_timeout);

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameters for the chat page.
#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    session_id: Option<String>,
}

/// Form body posted by the chat page.
#[derive(Debug, Deserialize)]
struct ChatForm {
    session_id: String,
    #[serde(default)]
    message: String,
}

fn page_url(session: &Session) -> String {
    format!("/?session_id={}", session.id())
}

/// GET / - Render the chat page, starting a session when needed.
async fn index_handler(State(state): State<AppState>, Query(query): Query<PageQuery>) -> Response {
    let existing = query
        .session_id
        .as_deref()
        .and_then(|id| state.sessions.get(id));

    let Some(session) = existing else {
        let session = state.sessions.start();
        tracing::debug!(session_id = %session.id(), "Started session for page visit");
        return Redirect::to(&page_url(&session)).into_response();
    };

    match state.pages.chat_page(session.id(), &session.turns()) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(session_id = %session.id(), error = %e, "Failed to render chat page");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
        }
    }
}

/// POST /chat - Run one round trip from the page form, then show the page.
async fn chat_form_handler(State(state): State<AppState>, Form(form): Form<ChatForm>) -> Response {
    let Some(session) = state.sessions.get(&form.session_id) else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    match state.chat.submit(&session, &form.message).await {
        Ok(_) => {}
        Err(ChatError::EmptyInput) => {
            tracing::debug!(session_id = %session.id(), "Ignored empty message");
        }
        Err(e @ ChatError::Interrupted(_)) => {
            tracing::error!(session_id = %session.id(), error = %e, "Round trip failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process message").into_response();
        }
    }

    Redirect::to(&page_url(&session)).into_response()
}

async fn health_handler() -> &'static str {
    "ok"
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional session ID (starts a new session if not provided).
    #[serde(default)]
    session_id: Option<String>,
}

/// Failure details reported alongside an error reply.
#[derive(Debug, Serialize)]
struct ErrorDto {
    kind: &'static str,
    message: String,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    /// Session ID for this conversation.
    session_id: String,
    /// The assistant turn appended for this message.
    reply: Turn,
    /// Set when the reply is a rendered generation failure.
    error: Option<ErrorDto>,
}

/// Session info for API responses.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    turn_count: usize,
    created_at: String,
    last_activity: String,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            turn_count: session.len(),
            created_at: session.created_at().to_rfc3339(),
            last_activity: session.last_activity().to_rfc3339(),
        }
    }
}

/// POST /api/chat - Send one message and return the reply.
async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    tracing::info!(
        message_length = req.message.len(),
        session_id = ?req.session_id,
        "Received chat request"
    );

    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, ChatError::EmptyInput.to_string()));
    }

    let session = match req.session_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => state
            .sessions
            .get(id)
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Session not found: {id}")))?,
        None => state.sessions.start(),
    };

    let exchange = state
        .chat
        .submit(&session, &req.message)
        .await
        .map_err(|e| match e {
            ChatError::EmptyInput => (StatusCode::BAD_REQUEST, e.to_string()),
            ChatError::Interrupted(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;

    Ok(Json(ChatResponse {
        session_id: session.id().to_string(),
        reply: exchange.reply,
        error: exchange.failure.map(|f| ErrorDto {
            kind: f.kind(),
            message: f.to_string(),
        }),
    }))
}

/// POST /api/sessions - Start a new session.
async fn api_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionInfo>) {
    let session = state.sessions.start();
    (StatusCode::CREATED, Json(SessionInfo::from(&session)))
}

/// GET /api/sessions/:id - Get session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    state
        .sessions
        .get(&id)
        .map(|session| Json(SessionInfo::from(&session)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// DELETE /api/sessions/:id - End a session.
async fn api_end_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.sessions.end(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// GET /api/sessions/:id/turns - Get the ordered turns of a session.
async fn api_get_turns(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Turn>>, StatusCode> {
    state
        .sessions
        .get(&id)
        .map(|session| Json(session.turns()))
        .ok_or(StatusCode::NOT_FOUND)
}
