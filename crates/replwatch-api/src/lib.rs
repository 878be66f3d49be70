//! replwatch-api — REST API for replwatch.
//!
//! All JSON responses use the `{success, data?, error?}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/databases` | List configured databases |
//! | POST | `/api/v1/databases` | Register a database |
//! | GET | `/api/v1/databases/{id}` | Get a database |
//! | PUT | `/api/v1/databases/{id}` | Edit a database |
//! | DELETE | `/api/v1/databases/{id}` | Remove a database and its streams |
//! | GET | `/api/v1/databases/{id}/health` | Probe a database now |
//! | GET | `/api/v1/replication/topology` | Nodes, edges, summary |
//! | POST | `/api/v1/replication/discover` | Run a discovery scan |
//! | GET | `/api/v1/replication/streams` | List streams |
//! | POST | `/api/v1/replication/streams` | Create a logical stream |
//! | POST | `/api/v1/replication/streams/validate` | Check a stream could be created |
//! | DELETE | `/api/v1/replication/streams/{id}` | Drop a logical stream |
//! | GET | `/api/v1/replication/streams/{id}/metrics` | Lag samples |
//! | GET | `/api/v1/health` | System health summary |
//! | GET | `/api/v1/alerts` | List alerts (`status`, `limit`) |
//! | POST | `/api/v1/alerts/{id}/acknowledge` | Acknowledge an alert |
//! | POST | `/api/v1/alerts/{id}/resolve` | Resolve an alert |
//! | GET | `/api/v1/alerts/thresholds` | List thresholds |
//! | POST | `/api/v1/alerts/thresholds` | Create a threshold |
//! | PUT | `/api/v1/alerts/thresholds/{id}` | Replace a threshold |
//! | DELETE | `/api/v1/alerts/thresholds/{id}` | Delete a threshold |
//! | POST | `/api/v1/migrations` | Submit a migration |
//! | POST | `/api/v1/migrations/validate` | Preflight only |
//! | GET | `/api/v1/migrations/history` | Past executions (`limit`, `offset`) |
//! | GET | `/api/v1/migrations/{id}` | One execution |
//! | POST | `/api/v1/migrations/{id}/cancel` | Stop before the next database |
//! | GET | `/metrics` | Prometheus exposition |

pub mod alerts;
pub mod databases;
pub mod migrations;
pub mod replication;
pub mod system;

mod response;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};

use replwatch_scheduler::AppContext;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<AppContext>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let state = ApiState { ctx };

    let api_routes = Router::new()
        .route("/databases", get(databases::list_databases).post(databases::create_database))
        .route(
            "/databases/{id}",
            get(databases::get_database)
                .put(databases::update_database)
                .delete(databases::delete_database),
        )
        .route("/databases/{id}/health", get(databases::database_health))
        .route("/replication/topology", get(replication::get_topology))
        .route("/replication/discover", post(replication::run_discovery))
        .route(
            "/replication/streams",
            get(replication::list_streams).post(replication::create_stream),
        )
        .route("/replication/streams/validate", post(replication::validate_stream))
        .route("/replication/streams/{id}", axum::routing::delete(replication::delete_stream))
        .route("/replication/streams/{id}/metrics", get(replication::stream_metrics))
        .route("/health", get(system::system_health))
        .route("/alerts", get(alerts::list_alerts))
        .route("/alerts/{id}/acknowledge", post(alerts::acknowledge_alert))
        .route("/alerts/{id}/resolve", post(alerts::resolve_alert))
        .route(
            "/alerts/thresholds",
            get(alerts::list_thresholds).post(alerts::create_threshold),
        )
        .route(
            "/alerts/thresholds/{id}",
            put(alerts::update_threshold).delete(alerts::delete_threshold),
        )
        .route("/migrations", post(migrations::submit_migration))
        .route("/migrations/validate", post(migrations::validate_migration))
        .route("/migrations/history", get(migrations::migration_history))
        .route("/migrations/{id}", get(migrations::get_migration))
        .route("/migrations/{id}/cancel", post(migrations::cancel_migration))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(system::prometheus_metrics).with_state(state))
}
