//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/cards` | Run the pipeline on one card image |
//! | `GET`  | `/cards` | List stored cards, newest first (`?limit=`) |
//! | `GET`  | `/cards/{id}` | One stored card |
//! | `DELETE` | `/cards/{id}` | Remove a card from both indexes |
//! | `POST` | `/search` | Hybrid search by text and/or image |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "search needs query text, a query image, or both" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! A pipeline run that ends in failure answers 422 with the failure kind
//! (`ingest_failed`, `extraction_rejected`, `extraction_incomplete`,
//! `embedding_failed`, `persistence_failed`) as the code.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use slabvault_core::models::CardMetadata;
use slabvault_core::pipeline::steps::data_url_content_type;
use slabvault_core::pipeline::{CardInput, ImagePayload, Outcome};
use slabvault_core::search::{SearchResult, SearchWeights};
use slabvault_core::store::SearchFilters;

use crate::config::Config;
use crate::service::{CardService, QueryImage, SearchQuery, ServiceError};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<CardService>,
}

/// Build the service from config and serve on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(CardService::from_config(config).await?);
    run_server_with_service(&config.server.bind, service).await
}

/// Serve an already-built service. Runs until the process is terminated.
pub async fn run_server_with_service(bind: &str, service: Arc<CardService>) -> anyhow::Result<()> {
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("slabvault listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(service: Arc<CardService>) -> Router {
    // Base64 inflates by 4/3; leave headroom for the JSON envelope.
    let body_limit = service.pipeline_options().max_image_bytes / 3 * 4 + 64 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/cards", post(handle_process).get(handle_list))
        .route("/cards/{id}", get(handle_get).delete(handle_delete))
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidQuery(msg) => bad_request(msg),
            other => internal(other.to_string()),
        }
    }
}

// ============ Handlers ============

#[derive(Deserialize)]
struct ProcessRequest {
    /// Base64 image, optionally as a `data:` URL.
    image: String,
    /// Required unless `image` is a `data:` URL.
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    enrich: Option<bool>,
}

async fn handle_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Response, AppError> {
    let content_type = req
        .content_type
        .or_else(|| data_url_content_type(&req.image))
        .ok_or_else(|| bad_request("content_type is required unless image is a data: URL"))?;

    let mut input = CardInput::from_base64(req.image, content_type)
        .with_enrichment(req.enrich.unwrap_or(state.service.enrich_by_default()));
    if let Some(hint) = req.hint {
        input = input.with_hint(hint);
    }

    match state.service.process_card(input).await {
        Outcome::Success(card) => Ok((StatusCode::CREATED, Json(card)).into_response()),
        Outcome::Failure(failure) => Err(AppError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: failure.kind.as_str().to_string(),
            message: failure.reason,
        }),
    }
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cards = state.service.list(params.limit).await?;
    Ok(Json(serde_json::json!({ "cards": cards })))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CardMetadata>, AppError> {
    match state.service.get(&id).await? {
        Some(card) => Ok(Json(card)),
        None => Err(not_found(format!("card not found: {}", id))),
    }
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.service.delete(&id).await? {
        Ok(Json(serde_json::json!({ "id": id, "deleted": true })))
    } else {
        Err(not_found(format!("card not found: {}", id)))
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    text: Option<String>,
    /// Base64 query image, optionally as a `data:` URL.
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    weights: Option<SearchWeights>,
    #[serde(default)]
    filters: Option<SearchFilters>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let image = match req.image {
        Some(data) => {
            let content_type = req
                .content_type
                .or_else(|| data_url_content_type(&data))
                .ok_or_else(|| {
                    bad_request("content_type is required unless image is a data: URL")
                })?;
            Some(QueryImage {
                payload: ImagePayload::Base64(data),
                content_type,
            })
        }
        None => None,
    };

    let results = state
        .service
        .search(SearchQuery {
            text: req.text,
            image,
            top_k: req.top_k,
            weights: req.weights,
            filters: req.filters,
        })
        .await?;
    Ok(Json(SearchResponse { results }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
