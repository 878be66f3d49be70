//! Response envelope and error → status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use replwatch_alerts::AlertError;
use replwatch_discovery::DiscoveryError;
use replwatch_metrics::MetricsError;
use replwatch_migrate::MigrationError;
use replwatch_state::StateError;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Errors that know which status they map to.
pub(crate) trait ApiFailure: std::fmt::Display {
    fn status(&self) -> StatusCode;

    fn into_failure(self) -> Response
    where
        Self: Sized,
    {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        error_response(&self.to_string(), status).into_response()
    }
}

impl ApiFailure for StateError {
    fn status(&self) -> StatusCode {
        match self {
            StateError::Invalid(_) => StatusCode::BAD_REQUEST,
            StateError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiFailure for DiscoveryError {
    fn status(&self) -> StatusCode {
        match self {
            DiscoveryError::State(e) => e.status(),
            DiscoveryError::Validation(_) => StatusCode::BAD_REQUEST,
            DiscoveryError::NotFound { .. } => StatusCode::NOT_FOUND,
            DiscoveryError::NotManageable(_) | DiscoveryError::Conflict(_) => StatusCode::CONFLICT,
            DiscoveryError::Connection { .. }
            | DiscoveryError::Query { .. }
            | DiscoveryError::Setup(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl ApiFailure for MetricsError {
    fn status(&self) -> StatusCode {
        match self {
            MetricsError::State(e) => e.status(),
            MetricsError::NotFound { .. } => StatusCode::NOT_FOUND,
            MetricsError::OutOfOrder { .. } => StatusCode::CONFLICT,
            MetricsError::Connection { .. }
            | MetricsError::Query { .. }
            | MetricsError::NotObserved { .. }
            | MetricsError::Timeout { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl ApiFailure for AlertError {
    fn status(&self) -> StatusCode {
        match self {
            AlertError::State(e) => e.status(),
            AlertError::Validation(_) => StatusCode::BAD_REQUEST,
            AlertError::NotFound { .. } => StatusCode::NOT_FOUND,
            AlertError::InvalidTransition { .. } => StatusCode::CONFLICT,
        }
    }
}

impl ApiFailure for MigrationError {
    fn status(&self) -> StatusCode {
        match self {
            MigrationError::State(e) => e.status(),
            MigrationError::Validation(_) => StatusCode::BAD_REQUEST,
            MigrationError::NotFound(_) => StatusCode::NOT_FOUND,
            MigrationError::Conflict { .. } | MigrationError::Finished { .. } => {
                StatusCode::CONFLICT
            }
        }
    }
}
