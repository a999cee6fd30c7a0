//! HTTP request handlers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use sculpin_core::{VectorId, VectorRecord};
use sculpin_index::CancelFlag;
use sculpin_query::{
    BatchReport, CollectionStats, CreateCollection, ErrorKind, Hit, QueryResult, RebuildReport,
    SearchRequest,
};
use serde::{Deserialize, Serialize};

type ApiResult<T> = Result<T, ApiError>;

fn path_error(e: PathRejection) -> ApiError {
    ApiError::new(ErrorKind::InvalidQuery, e.body_text())
}

/// Run CPU-heavy work off the async runtime.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> QueryResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?
        .map_err(ApiError::from)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check handler.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create a new collection.
pub async fn create_collection(
    State(state): State<AppState>,
    body: Result<Json<CreateCollection>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CollectionStats>)> {
    let Json(req) = body?;
    let engine = state.engine.clone();
    let stats = blocking(move || engine.create_collection(req)).await?;
    Ok((StatusCode::CREATED, Json(stats)))
}

/// List all collections.
pub async fn list_collections(State(state): State<AppState>) -> Json<Vec<CollectionStats>> {
    Json(state.engine.list_collections())
}

/// Drop a collection.
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let engine = state.engine.clone();
    blocking(move || engine.drop_collection(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get collection statistics.
pub async fn get_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CollectionStats>> {
    Ok(Json(state.engine.stats(&name)?))
}

/// Count response.
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Number of live vectors in a collection.
pub async fn count(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CountResponse>> {
    Ok(Json(CountResponse {
        count: state.engine.count(&name)?,
    }))
}

/// Insert body: `{"points": [...], "overwrite": bool}`, a bare array of
/// records, or one record.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InsertPointsRequest {
    Batch {
        points: Vec<serde_json::Value>,
        #[serde(default)]
        overwrite: bool,
    },
    Many(Vec<serde_json::Value>),
    One(serde_json::Value),
}

impl InsertPointsRequest {
    fn into_parts(self) -> (Vec<serde_json::Value>, bool) {
        match self {
            InsertPointsRequest::Batch { points, overwrite } => (points, overwrite),
            InsertPointsRequest::Many(points) => (points, false),
            InsertPointsRequest::One(point) => (vec![point], false),
        }
    }
}

/// Insert points. Malformed items are reported per item; the rest are
/// committed.
pub async fn insert_points(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<InsertPointsRequest>, JsonRejection>,
) -> ApiResult<Json<BatchReport>> {
    let Json(req) = body?;
    let (points, overwrite) = req.into_parts();
    let engine = state.engine.clone();
    let report = blocking(move || engine.insert(&name, points, overwrite)).await?;
    Ok(Json(report))
}

/// Fetch one point.
pub async fn get_point(
    State(state): State<AppState>,
    path: Result<Path<(String, u64)>, PathRejection>,
) -> ApiResult<Json<VectorRecord>> {
    let Path((name, id)) = path.map_err(path_error)?;
    Ok(Json(state.engine.get(&name, VectorId(id))?))
}

/// Delete one point.
pub async fn delete_point(
    State(state): State<AppState>,
    path: Result<Path<(String, u64)>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path((name, id)) = path.map_err(path_error)?;
    let engine = state.engine.clone();
    blocking(move || engine.delete(&name, VectorId(id))).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Search response.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<Hit>,
}

/// Search for similar vectors.
pub async fn search(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    let Json(req) = body?;
    let results = state.engine.search(&name, &req)?;
    Ok(Json(SearchResponse { results }))
}

/// Cancels a rebuild whose request went away.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Retrain the partitioner and rebuild the index.
pub async fn rebuild(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RebuildReport>> {
    let guard = CancelOnDrop(CancelFlag::new());
    let cancel = guard.0.clone();
    let engine = state.engine.clone();
    let report = blocking(move || engine.rebuild(&name, &cancel)).await?;
    drop(guard);
    Ok(Json(report))
}
