//! Health endpoint exposing the last ingestion tick.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::ingest::IngestionScheduler;

/// GET /health
async fn health(State(scheduler): State<Arc<IngestionScheduler>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-tasks",
        "last_tick": scheduler.last_report(),
    }))
}

/// Build the health route.
pub fn health_routes(scheduler: Arc<IngestionScheduler>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(scheduler)
}
