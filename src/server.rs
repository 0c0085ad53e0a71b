//! HTTP transport.
//!
//! A thin JSON/streaming layer over the core pipeline. Routing carries no
//! logic of its own: handlers validate nothing beyond extraction, call the
//! injected components, and translate domain errors into the JSON error
//! contract.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/ask` | Ask a question; streams the answer body |
//! | `POST`   | `/documents/file?filename=` | Ingest an uploaded document |
//! | `POST`   | `/documents/text` | Ingest raw text |
//! | `GET`    | `/documents/status` | Vector count for the collection |
//! | `GET`    | `/history/discussions?limit=` | Newest-first transcripts |
//! | `DELETE` | `/history/discussions/{id}` | Delete one transcript |
//! | `GET`    | `/history/sources` | Newest-first source records |
//! | `DELETE` | `/history/sources/{id}` | Delete one source |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! `POST /ask` responds with `text/plain` fragments in generation order;
//! the deduplicated contributing filenames ride in the `X-Used-Filenames`
//! header (joined with `||`) and the discussion handle in
//! `X-Discussion-Id`, both available before the first fragment.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_input", "message": "question must not be empty" } }
//! ```

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app::App;
use crate::config::Config;
use crate::error::Error;
use crate::models::ChatMessage;

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = Arc::new(App::build(config.clone()).await?);
    let bind_addr = config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let router = Router::new()
        .route("/ask", post(handle_ask))
        .route("/documents/file", post(handle_ingest_file))
        .route("/documents/text", post(handle_ingest_text))
        .route("/documents/status", get(handle_status))
        .route("/history/discussions", get(handle_list_discussions))
        .route("/history/discussions/{id}", delete(handle_delete_discussion))
        .route("/history/sources", get(handle_list_sources))
        .route("/history/sources/{id}", delete(handle_delete_source))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(app);

    tracing::info!(%bind_addr, "listening");
    println!("grimoire listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

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

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::InvalidInput(_) | Error::UnsupportedFormat(_) | Error::EmptyContent(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::IndexUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::GenerationFailure(_) | Error::PersistenceFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
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

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    discussion_id: Option<String>,
    /// Rolling history supplied by the client; roles other than
    /// user/assistant are dropped during prompt assembly.
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

async fn handle_ask(
    State(app): State<Arc<App>>,
    Json(req): Json<AskRequest>,
) -> Result<Response, AppError> {
    let answer = app
        .orchestrator
        .ask(&req.question, req.discussion_id, req.messages)
        .await?;

    let filenames_header = answer
        .filenames
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join("||");
    let discussion_id = answer.discussion_id.clone();

    let stream = futures::stream::unfold(answer.tokens, |mut rx| async move {
        rx.recv()
            .await
            .map(|fragment| (Ok::<_, std::convert::Infallible>(Bytes::from(fragment)), rx))
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header("X-Used-Filenames", filenames_header)
        .header("X-Discussion-Id", discussion_id)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: e.to_string(),
        })?;

    Ok(response)
}

// ============ Ingestion ============

#[derive(Deserialize)]
struct IngestFileQuery {
    filename: String,
}

async fn handle_ingest_file(
    State(app): State<Arc<App>>,
    Query(query): Query<IngestFileQuery>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let receipt = app.pipeline.ingest_document(&body, &query.filename).await?;
    Ok(Json(serde_json::json!({ "result": receipt })))
}

#[derive(Deserialize)]
struct IngestTextRequest {
    text: String,
}

async fn handle_ingest_text(
    State(app): State<Arc<App>>,
    Json(req): Json<IngestTextRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let receipt = app.pipeline.ingest_text(&req.text).await?;
    Ok(Json(serde_json::json!({ "result": receipt })))
}

#[derive(Serialize)]
struct StatusResponse {
    documents_count: usize,
    collection_name: String,
}

async fn handle_status(State(app): State<Arc<App>>) -> Result<Json<StatusResponse>, AppError> {
    let count = app.index.count().await?;
    Ok(Json(StatusResponse {
        documents_count: count,
        collection_name: app.config.index.collection.clone(),
    }))
}

// ============ History ============

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    10
}

async fn handle_list_discussions(
    State(app): State<Arc<App>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let discussions = app.store.list_discussions(query.limit)?;
    let count = discussions.len();
    Ok(Json(serde_json::json!({
        "discussions": discussions,
        "count": count,
    })))
}

async fn handle_delete_discussion(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if app.store.delete_discussion(&id)? {
        Ok(Json(serde_json::json!({ "deleted": id })))
    } else {
        Err(not_found(format!("no discussion with id: {}", id)))
    }
}

async fn handle_list_sources(
    State(app): State<Arc<App>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sources = app.store.list_sources()?;
    let count = sources.len();
    Ok(Json(serde_json::json!({
        "sources": sources,
        "count": count,
    })))
}

async fn handle_delete_source(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if app.pipeline.delete_source(&id).await? {
        Ok(Json(serde_json::json!({ "deleted": id })))
    } else {
        Err(not_found(format!("no source with id: {}", id)))
    }
}
