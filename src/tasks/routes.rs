//! REST endpoints for tasks.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use super::model::{TaskFilter, TaskStatus, Urgency};
use super::service::{ManualTaskRequest, TaskService};
use crate::error::TaskError;

const DEFAULT_PAGE_SIZE: u32 = 10;

/// Shared state for task routes.
#[derive(Clone)]
pub struct TaskRouteState {
    pub service: Arc<TaskService>,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    urgency: Option<Urgency>,
    status: Option<TaskStatus>,
    category: Option<String>,
    #[serde(alias = "q")]
    query: Option<String>,
    /// First day included, UTC.
    #[serde(alias = "dateFrom")]
    date_from: Option<NaiveDate>,
    /// Last day included, UTC.
    #[serde(alias = "dateTo")]
    date_to: Option<NaiveDate>,
    page: Option<u32>,
    size: Option<u32>,
}

#[derive(Deserialize)]
struct ReplyRequest {
    message: String,
}

#[derive(Deserialize)]
struct NotifyRequest {
    status: String,
}

fn bad_id() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "Invalid ID"})),
    )
        .into_response()
}

fn error_response(e: TaskError) -> Response {
    let status = match &e {
        TaskError::NotFound { .. } | TaskError::TenantNotFound { .. } => StatusCode::NOT_FOUND,
        TaskError::NotConnected { .. } => StatusCode::CONFLICT,
        TaskError::Send(_) => StatusCode::BAD_GATEWAY,
        TaskError::Invalid(_) => StatusCode::BAD_REQUEST,
        TaskError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

/// GET /api/tenants/{tenant}/tasks
async fn list_tasks(
    State(state): State<TaskRouteState>,
    Path(tenant): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    let Ok(tenant_id) = Uuid::parse_str(&tenant) else {
        return bad_id();
    };
    let filter = TaskFilter {
        urgency: query.urgency,
        status: query.status,
        category: query.category.filter(|c| !c.trim().is_empty()),
        query: query.query.filter(|q| !q.trim().is_empty()),
        received_from: query
            .date_from
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc()),
        received_before: query
            .date_to
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc()),
    };
    let page = query.page.unwrap_or(0);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);

    match state.service.list_tasks(tenant_id, &filter, page, size).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant}/tasks/stats
async fn task_stats(State(state): State<TaskRouteState>, Path(tenant): Path<String>) -> Response {
    let Ok(tenant_id) = Uuid::parse_str(&tenant) else {
        return bad_id();
    };
    match state.service.task_stats(tenant_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant}/tasks
async fn submit_task(
    State(state): State<TaskRouteState>,
    Path(tenant): Path<String>,
    Json(request): Json<ManualTaskRequest>,
) -> Response {
    let Ok(tenant_id) = Uuid::parse_str(&tenant) else {
        return bad_id();
    };
    match state.service.submit_manual_task(tenant_id, request).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/tasks/{id}
async fn get_task(State(state): State<TaskRouteState>, Path(id): Path<String>) -> Response {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return bad_id();
    };
    match state.service.get_task(task_id).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/tasks/{id}/complete
async fn complete_task(State(state): State<TaskRouteState>, Path(id): Path<String>) -> Response {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return bad_id();
    };
    match state.service.mark_completed(task_id).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/tasks/{id}/reply
async fn reply_task(
    State(state): State<TaskRouteState>,
    Path(id): Path<String>,
    Json(body): Json<ReplyRequest>,
) -> Response {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return bad_id();
    };
    match state.service.send_reply(task_id, &body.message).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/tasks/{id}/notify
async fn notify_task(
    State(state): State<TaskRouteState>,
    Path(id): Path<String>,
    Json(body): Json<NotifyRequest>,
) -> Response {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return bad_id();
    };
    match state.service.send_notification(task_id, &body.status).await {
        Ok(()) => Json(serde_json::json!({"status": "sent"})).into_response(),
        Err(e) => error_response(e),
    }
}

/// Build the task REST routes.
pub fn task_routes(state: TaskRouteState) -> Router {
    Router::new()
        .route(
            "/api/tenants/{tenant}/tasks",
            get(list_tasks).post(submit_task),
        )
        .route("/api/tenants/{tenant}/tasks/stats", get(task_stats))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/complete", post(complete_task))
        .route("/api/tasks/{id}/reply", post(reply_task))
        .route("/api/tasks/{id}/notify", post(notify_task))
        .with_state(state)
}
