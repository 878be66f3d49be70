//! System health and Prometheus handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use replwatch_metrics::render_prometheus;
use replwatch_state::{DatabaseEndpoint, ReplicationStream};

use crate::ApiState;
use crate::response::{ApiFailure, ApiResponse};

/// GET /api/v1/health
pub async fn system_health(State(state): State<ApiState>) -> impl IntoResponse {
    match state.ctx.alerts.system_health().await {
        Ok(health) => ApiResponse::ok(health).into_response(),
        Err(e) => e.into_failure(),
    }
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let endpoints: Vec<DatabaseEndpoint> = state.ctx.store.list().unwrap_or_default();
    let streams: Vec<ReplicationStream> = state.ctx.store.list().unwrap_or_default();
    let health = state.ctx.connections.health_snapshot().await;

    let body = render_prometheus(&endpoints, &streams, &health);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use replwatch_pg::testing::FakeDatabase;
    use tower::ServiceExt;

    use crate::build_router;
    use crate::testutil::Harness;

    #[tokio::test]
    async fn health_of_empty_system() {
        let h = Harness::new();
        let resp = system_health(State(h.state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let h = Harness::new();
        let resp = prometheus_metrics(State(h.state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn router_serves_envelope_and_metrics() {
        let h = Harness::new();
        let db = h.database("orders", "10.0.0.5", FakeDatabase::primary());
        h.state.ctx.connections.health_check(&db).await;
        let app = build_router(Arc::clone(&h.state.ctx));

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/databases")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"][0]["name"], "orders");

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/migrations/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("not found"));

        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("replwatch_database_up"));
    }
}
