//! HTTP surface over the ranking engine and the ingestion pipeline.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::embedding::ImageRef;
use crate::ingest::IngestionPipeline;
use crate::payload_storage::filters::Filter;
use crate::ranking::{RankingEngine, SearchPage, SearchParams};
use crate::utils::config::SearchConfig;
use crate::utils::errors::SearchError;
use crate::utils::metadata::Metadata;
use crate::utils::types::EntityId;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RankingEngine>,
    pub pipeline: Arc<IngestionPipeline>,
    pub defaults: SearchConfig,
    /// Cancelled on shutdown; every request works under a child token.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/search", post(search_text))
        .route("/search/image", post(search_image))
        .route("/images", post(ingest_image))
        .route("/images/{id}", delete(delete_image))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct TextSearchRequest {
    pub query: String,
    #[serde(flatten)]
    pub paging: PagingRequest,
}

#[derive(Debug, Deserialize)]
pub struct ImageSearchRequest {
    pub image_url: String,
    #[serde(flatten)]
    pub paging: PagingRequest,
}

#[derive(Debug, Default, Deserialize)]
pub struct PagingRequest {
    pub min_similarity: Option<f64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub filter: Option<Filter>,
}

impl PagingRequest {
    fn into_params(self, defaults: &SearchConfig) -> SearchParams {
        SearchParams {
            min_similarity: self
                .min_similarity
                .unwrap_or(defaults.default_min_similarity),
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(defaults.default_page_size),
            filter: self.filter,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub image_url: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IngestResponse {
    pub id: EntityId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Maps the error taxonomy onto HTTP statuses.
pub fn status_for(err: &SearchError) -> StatusCode {
    match err {
        SearchError::Validation(_) => StatusCode::BAD_REQUEST,
        SearchError::DimensionMismatch { .. } | SearchError::InvalidQuery(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SearchError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        SearchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SearchError::EmbeddingFailure(inner) => status_for(inner),
        SearchError::NotFound { .. } | SearchError::UnknownEntity(_) => StatusCode::NOT_FOUND,
        SearchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub struct ApiError(SearchError);

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, %status, "request failed");
        }
        let body = ErrorBody {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn search_text(
    State(state): State<AppState>,
    Json(request): Json<TextSearchRequest>,
) -> Result<Json<SearchPage>, ApiError> {
    let params = request.paging.into_params(&state.defaults);
    let cancel = state.shutdown.child_token();
    let page = state
        .engine
        .search_by_text(&request.query, &params, &cancel)
        .await?;
    Ok(Json(page))
}

async fn search_image(
    State(state): State<AppState>,
    Json(request): Json<ImageSearchRequest>,
) -> Result<Json<SearchPage>, ApiError> {
    let params = request.paging.into_params(&state.defaults);
    let cancel = state.shutdown.child_token();
    let image = ImageRef::url(request.image_url);
    let page = state
        .engine
        .search_by_image(&image, &params, &cancel)
        .await?;
    Ok(Json(page))
}

async fn ingest_image(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let cancel = state.shutdown.child_token();
    let image = ImageRef::url(request.image_url);
    let id = state
        .pipeline
        .ingest(&image, request.metadata, &cancel)
        .await?;
    Ok((StatusCode::CREATED, Json(IngestResponse { id })))
}

async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    state.pipeline.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
