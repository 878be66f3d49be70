//! Alert and threshold handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use replwatch_alerts::ThresholdSpec;
use replwatch_state::AlertStatus;

use crate::ApiState;
use crate::response::{ApiFailure, ApiResponse, error_response};

const DEFAULT_ALERT_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub status: Option<AlertStatus>,
    pub limit: Option<usize>,
}

/// GET /api/v1/alerts
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT);
    match state.ctx.alerts.alerts(query.status, limit) {
        Ok(alerts) => ApiResponse::ok(alerts).into_response(),
        Err(e) => e.into_failure(),
    }
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    #[serde(alias = "acknowledged_by")]
    pub user: String,
}

/// POST /api/v1/alerts/{id}/acknowledge
pub async fn acknowledge_alert(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcknowledgeRequest>,
) -> impl IntoResponse {
    if req.user.trim().is_empty() {
        return error_response("user is required", StatusCode::BAD_REQUEST).into_response();
    }
    match state.ctx.alerts.acknowledge(id, req.user.trim()) {
        Ok(alert) => ApiResponse::ok(alert).into_response(),
        Err(e) => e.into_failure(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(alias = "resolved_by")]
    pub user: String,
    #[serde(default, alias = "resolution_notes")]
    pub notes: Option<String>,
}

/// POST /api/v1/alerts/{id}/resolve
pub async fn resolve_alert(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    if req.user.trim().is_empty() {
        return error_response("user is required", StatusCode::BAD_REQUEST).into_response();
    }
    match state.ctx.alerts.resolve(id, req.user.trim(), req.notes) {
        Ok(alert) => ApiResponse::ok(alert).into_response(),
        Err(e) => e.into_failure(),
    }
}

// ── Thresholds ─────────────────────────────────────────────────

/// GET /api/v1/alerts/thresholds
pub async fn list_thresholds(State(state): State<ApiState>) -> impl IntoResponse {
    match state.ctx.alerts.thresholds() {
        Ok(thresholds) => ApiResponse::ok(thresholds).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// POST /api/v1/alerts/thresholds
pub async fn create_threshold(
    State(state): State<ApiState>,
    Json(spec): Json<ThresholdSpec>,
) -> impl IntoResponse {
    match state.ctx.alerts.create_threshold(spec) {
        Ok(threshold) => (StatusCode::CREATED, ApiResponse::ok(threshold)).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// PUT /api/v1/alerts/thresholds/{id}
pub async fn update_threshold(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(spec): Json<ThresholdSpec>,
) -> impl IntoResponse {
    match state.ctx.alerts.update_threshold(id, spec) {
        Ok(threshold) => ApiResponse::ok(threshold).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// DELETE /api/v1/alerts/thresholds/{id}
pub async fn delete_threshold(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.ctx.alerts.delete_threshold(id) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => e.into_failure(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use replwatch_state::{Alert, AlertTarget, AlertType, MetricName, Severity};
    use serde_json::json;

    use crate::testutil::Harness;

    fn open_alert(h: &Harness) -> Alert {
        let now = Utc::now();
        let alert = Alert {
            id: Uuid::new_v4(),
            threshold_id: None,
            alert_type: AlertType::ReplicationLag,
            severity: Severity::Warning,
            target: AlertTarget::Stream(Uuid::new_v4()),
            title: "Replication lag".into(),
            message: "lag 45s > 30".into(),
            metric: Some(MetricName::ReplicationLagSeconds),
            metric_value: Some(45.0),
            threshold_value: Some(30.0),
            status: AlertStatus::Active,
            triggered_at: now,
            last_seen_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        };
        h.state.ctx.store.put(&alert).unwrap();
        alert
    }

    fn lag_threshold() -> ThresholdSpec {
        serde_json::from_value(json!({
            "name": "lag over 30s",
            "alert_type": "replication_lag",
            "severity": "warning",
            "metric": "replication_lag_seconds",
            "comparison": "gt",
            "value": 30.0
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn list_alerts_empty() {
        let h = Harness::new();
        let resp = list_alerts(State(h.state), Query(AlertQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn acknowledge_then_resolve() {
        let h = Harness::new();
        let alert = open_alert(&h);

        let resp = acknowledge_alert(
            State(h.state.clone()),
            Path(alert.id),
            Json(AcknowledgeRequest { user: "dba".into() }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = resolve_alert(
            State(h.state.clone()),
            Path(alert.id),
            Json(ResolveRequest {
                user: "dba".into(),
                notes: Some("failover finished".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        // Resolved alerts are final.
        let resp = acknowledge_alert(
            State(h.state),
            Path(alert.id),
            Json(AcknowledgeRequest { user: "dba".into() }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn acknowledge_requires_user() {
        let h = Harness::new();
        let alert = open_alert(&h);
        let resp = acknowledge_alert(
            State(h.state),
            Path(alert.id),
            Json(AcknowledgeRequest { user: " ".into() }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn acknowledge_unknown_alert() {
        let h = Harness::new();
        let resp = acknowledge_alert(
            State(h.state),
            Path(Uuid::new_v4()),
            Json(AcknowledgeRequest { user: "dba".into() }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn threshold_crud() {
        let h = Harness::new();
        let resp = create_threshold(State(h.state.clone()), Json(lag_threshold()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let id = h.state.ctx.alerts.thresholds().unwrap()[0].id;
        let mut spec = lag_threshold();
        spec.value = 60.0;
        let resp = update_threshold(State(h.state.clone()), Path(id), Json(spec))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(h.state.ctx.alerts.threshold(id).unwrap().value, 60.0);

        let resp = delete_threshold(State(h.state.clone()), Path(id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = delete_threshold(State(h.state), Path(id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_threshold_is_rejected() {
        let h = Harness::new();
        let mut spec = lag_threshold();
        spec.name = String::new();
        let resp = create_threshold(State(h.state), Json(spec))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
