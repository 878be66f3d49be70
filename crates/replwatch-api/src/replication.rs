//! Replication topology and stream handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use replwatch_discovery::CreateStreamRequest;
use replwatch_state::ReplicationStream;

use crate::ApiState;
use crate::response::{ApiFailure, ApiResponse, error_response};

const DEFAULT_SAMPLE_LIMIT: usize = 100;
const MAX_SAMPLE_LIMIT: usize = 1000;

/// GET /api/v1/replication/topology
pub async fn get_topology(State(state): State<ApiState>) -> impl IntoResponse {
    match state.ctx.discovery.topology() {
        Ok(topology) => ApiResponse::ok(topology).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// POST /api/v1/replication/discover
pub async fn run_discovery(State(state): State<ApiState>) -> impl IntoResponse {
    match state.ctx.discovery.discover().await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// GET /api/v1/replication/streams
pub async fn list_streams(State(state): State<ApiState>) -> impl IntoResponse {
    match state.ctx.store.list::<ReplicationStream>() {
        Ok(mut streams) => {
            streams.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            ApiResponse::ok(streams).into_response()
        }
        Err(e) => e.into_failure(),
    }
}

/// POST /api/v1/replication/streams
pub async fn create_stream(
    State(state): State<ApiState>,
    Json(req): Json<CreateStreamRequest>,
) -> impl IntoResponse {
    match state.ctx.discovery.create_stream(req).await {
        Ok(stream) => (StatusCode::CREATED, ApiResponse::ok(stream)).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// DELETE /api/v1/replication/streams/{id}
pub async fn delete_stream(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.ctx.discovery.delete_stream(id).await {
        Ok(removal) => ApiResponse::ok(removal).into_response(),
        Err(e) => e.into_failure(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateStreamRequest {
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
}

/// POST /api/v1/replication/streams/validate
pub async fn validate_stream(
    State(state): State<ApiState>,
    Json(req): Json<ValidateStreamRequest>,
) -> impl IntoResponse {
    match state
        .ctx
        .discovery
        .validate_stream(req.source_id, req.target_id, req.tables)
        .await
    {
        Ok(validation) => ApiResponse::ok(validation).into_response(),
        Err(e) => e.into_failure(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SampleQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/replication/streams/{id}/metrics
pub async fn stream_metrics(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SampleQuery>,
) -> impl IntoResponse {
    match state.ctx.store.get::<ReplicationStream>(&id.to_string()) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response("stream not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => return e.into_failure(),
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SAMPLE_LIMIT)
        .clamp(1, MAX_SAMPLE_LIMIT);
    match state.ctx.sampler.history(id, limit) {
        Ok(samples) => ApiResponse::ok(samples).into_response(),
        Err(e) => e.into_failure(),
    }
}
