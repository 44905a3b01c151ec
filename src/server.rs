//! HTTP retrieval server.
//!
//! Serves per-subject retrieval over a shared [`CacheManager`]. Subjects are
//! discovered at startup; each subject's index is loaded (or rebuilt) on the
//! first request that needs it and stays resident afterwards.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Discovered subjects and their states |
//! | `POST` | `/subjects/{subject}/search` | Ranked chunks for a free-text query |
//! | `POST` | `/subjects/{subject}/context` | Lesson context passages for a topic and level |
//! | `POST` | `/subjects/{subject}/rebuild` | Force a rebuild of one subject |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "unknown subject: Geography" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `not_found` (404), `empty_subject` (409), `ingest_failed` (422),
//! `source_unreadable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use lesson_harness_core::CacheError;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::search::{lesson_query, retrieve, RetrieveError, RetrievedChunk};
use crate::status::SubjectStatus;

#[derive(Clone)]
struct AppState {
    manager: CacheManager,
    /// Default `k` when a request omits it.
    top_k: usize,
}

/// Build the router over an existing manager.
pub fn router(manager: CacheManager, config: &Config) -> Router {
    let state = AppState {
        manager,
        top_k: config.retrieval.top_k,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/subjects/{subject}/search", post(handle_search))
        .route("/subjects/{subject}/context", post(handle_context))
        .route("/subjects/{subject}/rebuild", post(handle_rebuild))
        .layer(cors)
        .with_state(state)
}

/// Starts the server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config, manager: CacheManager) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let subjects = manager.registry().subjects();
    let app = router(manager, config);

    tracing::info!(
        bind = %bind_addr,
        subjects = subjects.len(),
        "lesson server listening"
    );
    println!("Lesson server listening on http://{}", bind_addr);
    for subject in &subjects {
        println!("  {}", subject);
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

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
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        let (status, code) = match &err {
            CacheError::UnknownSubject { .. } => (StatusCode::NOT_FOUND, "not_found"),
            CacheError::EmptySubject { .. } => (StatusCode::CONFLICT, "empty_subject"),
            CacheError::SourceUnreadable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "source_unreadable")
            }
            CacheError::PartialIngestFailure { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "ingest_failed")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<RetrieveError> for AppError {
    fn from(err: RetrieveError) -> Self {
        let message = err.to_string();
        match err {
            RetrieveError::Cache(e) => e.into(),
            RetrieveError::EmptyQuery => Self::new(StatusCode::BAD_REQUEST, "bad_request", message),
            RetrieveError::EmbeddingsDisabled => {
                Self::new(StatusCode::BAD_REQUEST, "embeddings_disabled", message)
            }
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message),
        }
    }
}

fn resolve_k(requested: Option<usize>, default: usize) -> Result<usize, AppError> {
    match requested {
        Some(0) => Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "k must be at least 1",
        )),
        Some(k) => Ok(k),
        None => Ok(default),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    available_subjects: Vec<String>,
    /// Subjects with a resident, ready index.
    initialized_subjects: Vec<String>,
    subjects: Vec<SubjectStatus>,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    if let Err(e) = state.manager.discover_subjects().await {
        tracing::warn!(error = %e, "subject discovery failed");
    }
    let subjects = state.manager.statuses();
    Json(StatusResponse {
        available_subjects: subjects.iter().map(|s| s.subject.clone()).collect(),
        initialized_subjects: subjects
            .iter()
            .filter(|s| s.is_ready())
            .map(|s| s.subject.clone())
            .collect(),
        subjects,
    })
}

// ============ POST /subjects/{subject}/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    subject: String,
    hits: Vec<RetrievedChunk>,
}

async fn handle_search(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let k = resolve_k(req.k, state.top_k)?;
    let hits = retrieve(&state.manager, &subject, &req.query, k).await?;
    Ok(Json(SearchResponse { subject, hits }))
}

// ============ POST /subjects/{subject}/context ============

#[derive(Deserialize)]
struct ContextRequest {
    topic: String,
    level: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct ContextResponse {
    subject: String,
    query: String,
    passages: Vec<RetrievedChunk>,
}

async fn handle_context(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    if req.topic.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "topic must not be empty",
        ));
    }
    let k = resolve_k(req.k, state.top_k)?;
    let query = lesson_query(&subject, &req.topic, &req.level);
    let passages = retrieve(&state.manager, &subject, &query, k).await?;
    Ok(Json(ContextResponse {
        subject,
        query,
        passages,
    }))
}

// ============ POST /subjects/{subject}/rebuild ============

#[derive(Serialize)]
struct RebuildResponse {
    subject: String,
    chunks: usize,
    fingerprint: String,
    elapsed_ms: u64,
}

async fn handle_rebuild(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<RebuildResponse>, AppError> {
    let started = Instant::now();
    let index = state.manager.force_rebuild(&subject).await?;
    Ok(Json(RebuildResponse {
        subject,
        chunks: index.chunk_count(),
        fingerprint: index.fingerprint().to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    }))
}

