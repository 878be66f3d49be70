//! Database endpoint handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::info;
use uuid::Uuid;

use replwatch_state::{DatabaseEndpoint, EndpointSpec, StateResult};

use crate::ApiState;
use crate::response::{ApiFailure, ApiResponse, error_response};

fn database_not_found() -> axum::response::Response {
    error_response("database not found", StatusCode::NOT_FOUND).into_response()
}

/// Another endpoint (other than `except`) already uses `name`.
fn name_taken(state: &ApiState, name: &str, except: Option<Uuid>) -> StateResult<bool> {
    let endpoints: Vec<DatabaseEndpoint> = state.ctx.store.list()?;
    Ok(endpoints
        .iter()
        .any(|e| e.name == name.trim() && Some(e.id) != except))
}

/// GET /api/v1/databases
pub async fn list_databases(State(state): State<ApiState>) -> impl IntoResponse {
    match state.ctx.store.list::<DatabaseEndpoint>() {
        Ok(mut endpoints) => {
            endpoints.sort_by(|a, b| a.name.cmp(&b.name));
            ApiResponse::ok(endpoints).into_response()
        }
        Err(e) => e.into_failure(),
    }
}

/// GET /api/v1/databases/{id}
pub async fn get_database(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.ctx.store.get::<DatabaseEndpoint>(&id.to_string()) {
        Ok(Some(endpoint)) => ApiResponse::ok(endpoint).into_response(),
        Ok(None) => database_not_found(),
        Err(e) => e.into_failure(),
    }
}

/// POST /api/v1/databases
pub async fn create_database(
    State(state): State<ApiState>,
    Json(spec): Json<EndpointSpec>,
) -> impl IntoResponse {
    let endpoint = match DatabaseEndpoint::create(spec) {
        Ok(endpoint) => endpoint,
        Err(e) => return e.into_failure(),
    };
    match name_taken(&state, &endpoint.name, None) {
        Ok(true) => {
            return error_response(
                &format!("database name '{}' is already in use", endpoint.name),
                StatusCode::CONFLICT,
            )
            .into_response();
        }
        Ok(false) => {}
        Err(e) => return e.into_failure(),
    }
    match state.ctx.store.put(&endpoint) {
        Ok(()) => {
            info!(endpoint_id = %endpoint.id, name = %endpoint.name, "database registered");
            (StatusCode::CREATED, ApiResponse::ok(endpoint)).into_response()
        }
        Err(e) => e.into_failure(),
    }
}

/// PUT /api/v1/databases/{id}
pub async fn update_database(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(spec): Json<EndpointSpec>,
) -> impl IntoResponse {
    let mut endpoint = match state.ctx.store.get::<DatabaseEndpoint>(&id.to_string()) {
        Ok(Some(endpoint)) => endpoint,
        Ok(None) => return database_not_found(),
        Err(e) => return e.into_failure(),
    };
    if let Err(e) = endpoint.apply(spec) {
        return e.into_failure();
    }
    match name_taken(&state, &endpoint.name, Some(id)) {
        Ok(true) => {
            return error_response(
                &format!("database name '{}' is already in use", endpoint.name),
                StatusCode::CONFLICT,
            )
            .into_response();
        }
        Ok(false) => {}
        Err(e) => return e.into_failure(),
    }
    if let Err(e) = state.ctx.store.put(&endpoint) {
        return e.into_failure();
    }
    // Connection details may have changed; the next acquire rebuilds the pool.
    state.ctx.connections.remove_endpoint(id).await;
    info!(endpoint_id = %id, "database updated");
    ApiResponse::ok(endpoint).into_response()
}

/// DELETE /api/v1/databases/{id}
pub async fn delete_database(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.ctx.discovery.remove_endpoint(id).await {
        Ok(streams_removed) => ApiResponse::ok(serde_json::json!({
            "deleted": id,
            "streams_removed": streams_removed,
        }))
        .into_response(),
        Err(e) => e.into_failure(),
    }
}

/// GET /api/v1/databases/{id}/health
pub async fn database_health(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let endpoint = match state.ctx.store.get::<DatabaseEndpoint>(&id.to_string()) {
        Ok(Some(endpoint)) => endpoint,
        Ok(None) => return database_not_found(),
        Err(e) => return e.into_failure(),
    };
    let report = state.ctx.connections.health_check(&endpoint).await;
    ApiResponse::ok(report).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use replwatch_pg::testing::FakeDatabase;
    use replwatch_state::DatabaseRole;

    use crate::testutil::Harness;

    #[tokio::test]
    async fn list_databases_empty() {
        let h = Harness::new();
        let resp = list_databases(State(h.state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_get_database() {
        let h = Harness::new();
        let spec = Harness::spec("orders", "10.0.0.5", DatabaseRole::Primary);

        let resp = create_database(State(h.state.clone()), Json(spec))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let stored: Vec<DatabaseEndpoint> = h.state.ctx.store.list().unwrap();
        assert_eq!(stored.len(), 1);
        let resp = get_database(State(h.state), Path(stored[0].id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_database_is_rejected() {
        let h = Harness::new();
        let mut spec = Harness::spec("orders", "10.0.0.5", DatabaseRole::Primary);
        spec.host = String::new();
        let resp = create_database(State(h.state.clone()), Json(spec))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(h.state.ctx.store.list::<DatabaseEndpoint>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let h = Harness::new();
        h.database("orders", "10.0.0.5", FakeDatabase::primary());
        let spec = Harness::spec("orders", "10.0.0.6", DatabaseRole::Replica);
        let resp = create_database(State(h.state), Json(spec))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn update_keeps_identity() {
        let h = Harness::new();
        let endpoint = h.database("orders", "10.0.0.5", FakeDatabase::primary());
        let mut spec = Harness::spec("orders", "10.0.0.9", DatabaseRole::Primary);
        spec.environment = "production".into();

        let resp = update_database(State(h.state.clone()), Path(endpoint.id), Json(spec))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let stored: DatabaseEndpoint = h
            .state
            .ctx
            .store
            .require(&endpoint.id.to_string())
            .unwrap();
        assert_eq!(stored.host, "10.0.0.9");
        assert_eq!(stored.created_at, endpoint.created_at);
    }

    #[tokio::test]
    async fn delete_nonexistent_database() {
        let h = Harness::new();
        let resp = delete_database(State(h.state), Path(Uuid::new_v4()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_probe_reports_unreachable() {
        let h = Harness::new();
        let endpoint = h.database("orders", "10.0.0.5", FakeDatabase::primary().unreachable());
        let resp = database_health(State(h.state.clone()), Path(endpoint.id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let health = h.state.ctx.connections.health_snapshot().await;
        assert_ne!(health[&endpoint.id].status, replwatch_pg::HealthState::Healthy);
    }
}
