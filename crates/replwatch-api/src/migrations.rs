//! Migration handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use replwatch_migrate::MigrationRequest;

use crate::ApiState;
use crate::response::{ApiFailure, ApiResponse};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// POST /api/v1/migrations
///
/// A dry run answers with its recorded, validated results right away. Otherwise the
/// execution is leased and persisted, then runs in the background; the
/// response carries the `running` record (202).
pub async fn submit_migration(
    State(state): State<ApiState>,
    Json(req): Json<MigrationRequest>,
) -> impl IntoResponse {
    if req.dry_run {
        return match state.ctx.migrations.execute(req).await {
            Ok(execution) => ApiResponse::ok(execution).into_response(),
            Err(e) => e.into_failure(),
        };
    }
    match state.ctx.migrations.start(req) {
        Ok(execution) => (StatusCode::ACCEPTED, ApiResponse::ok(execution)).into_response(),
        Err(e) => e.into_failure(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateMigrationRequest {
    pub sql_script: String,
    #[serde(default)]
    pub target_databases: Option<Vec<Uuid>>,
}

/// POST /api/v1/migrations/validate
pub async fn validate_migration(
    State(state): State<ApiState>,
    Json(req): Json<ValidateMigrationRequest>,
) -> impl IntoResponse {
    match state
        .ctx
        .migrations
        .validate(&req.sql_script, req.target_databases.as_deref())
    {
        Ok(preflight) => ApiResponse::ok(preflight).into_response(),
        Err(e) => e.into_failure(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /api/v1/migrations/history
pub async fn migration_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    match state
        .ctx
        .migrations
        .history(limit, query.offset.unwrap_or(0))
    {
        Ok(history) => ApiResponse::ok(history).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// GET /api/v1/migrations/{id}
pub async fn get_migration(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.ctx.migrations.get(id) {
        Ok(execution) => ApiResponse::ok(execution).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// POST /api/v1/migrations/{id}/cancel
pub async fn cancel_migration(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.ctx.migrations.cancel(id) {
        Ok(execution) => ApiResponse::ok(execution).into_response(),
        Err(e) => e.into_failure(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use replwatch_pg::testing::FakeDatabase;
    use replwatch_state::{MigrationExecution, MigrationStatus};

    use crate::testutil::Harness;

    fn request(targets: Vec<Uuid>, dry_run: bool) -> MigrationRequest {
        MigrationRequest {
            sql_script: "ALTER TABLE orders ADD COLUMN note text;".into(),
            target_databases: Some(targets),
            dry_run,
            rollback_on_error: true,
            execution_order: "sequential".into(),
            initiated_by: Some("dba".into()),
        }
    }

    async fn wait_terminal(h: &Harness, id: Uuid) -> MigrationExecution {
        for _ in 0..100 {
            let execution = h.state.ctx.migrations.get(id).unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("migration {id} did not finish");
    }

    #[tokio::test]
    async fn dry_run_answers_immediately() {
        let h = Harness::new();
        let db = h.database("db1", "10.0.0.1", FakeDatabase::primary());
        let resp = submit_migration(State(h.state.clone()), Json(request(vec![db.id], true)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(h.cluster.snapshot(db.id).committed_scripts.is_empty());

        let history = h.state.ctx.migrations.history(10, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].options.dry_run);
        let resp = get_migration(State(h.state.clone()), Path(history[0].id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submission_without_targets_covers_every_database() {
        let h = Harness::new();
        let db1 = h.database("db1", "10.0.0.1", FakeDatabase::primary());
        let db2 = h.database("db2", "10.0.0.2", FakeDatabase::primary());
        let req: MigrationRequest = serde_json::from_value(serde_json::json!({
            "sql_script": "ALTER TABLE orders ADD COLUMN note text;",
            "dry_run": false,
            "rollback_on_error": true,
            "execution_order": "sequential"
        }))
        .unwrap();

        let resp = submit_migration(State(h.state.clone()), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let history = h.state.ctx.migrations.history(10, 0).unwrap();
        let finished = wait_terminal(&h, history[0].id).await;
        assert_eq!(finished.status, MigrationStatus::Completed);
        assert_eq!(finished.targets.len(), 2);
        assert_eq!(h.cluster.snapshot(db1.id).committed_scripts.len(), 1);
        assert_eq!(h.cluster.snapshot(db2.id).committed_scripts.len(), 1);

        let resp = validate_migration(
            State(h.state),
            Json(ValidateMigrationRequest {
                sql_script: "SELECT 1;".into(),
                target_databases: None,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submitted_migration_runs_in_background() {
        let h = Harness::new();
        let db = h.database("db1", "10.0.0.1", FakeDatabase::primary());
        let resp = submit_migration(State(h.state.clone()), Json(request(vec![db.id], false)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let history = h.state.ctx.migrations.history(10, 0).unwrap();
        assert_eq!(history.len(), 1);
        let finished = wait_terminal(&h, history[0].id).await;
        assert_eq!(finished.status, MigrationStatus::Completed);
        assert_eq!(h.cluster.snapshot(db.id).committed_scripts.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_submission_conflicts() {
        let h = Harness::new();
        let mut slow = FakeDatabase::primary();
        slow.script_delay = Some(Duration::from_millis(300));
        let db1 = h.database("db1", "10.0.0.1", slow);
        let db2 = h.database("db2", "10.0.0.2", FakeDatabase::primary());

        let resp = submit_migration(
            State(h.state.clone()),
            Json(request(vec![db1.id, db2.id], false)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = submit_migration(State(h.state), Json(request(vec![db2.id], false)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let h = Harness::new();
        let resp = validate_migration(
            State(h.state),
            Json(ValidateMigrationRequest {
                sql_script: "SELECT 1;".into(),
                target_databases: Some(vec![]),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_migration() {
        let h = Harness::new();
        let resp = get_migration(State(h.state.clone()), Path(Uuid::new_v4()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = cancel_migration(State(h.state), Path(Uuid::new_v4()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_defaults_to_empty() {
        let h = Harness::new();
        let resp = migration_history(State(h.state), Query(HistoryQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
