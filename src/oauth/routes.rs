//! REST endpoints for connecting and disconnecting a tenant mailbox.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::tokens::TokenManager;

/// Shared state for OAuth routes.
#[derive(Clone)]
pub struct OAuthRouteState {
    pub tokens: Arc<TokenManager>,
    /// The browser is sent back here after consent.
    pub frontend_url: String,
}

#[derive(Deserialize)]
struct AuthorizeQuery {
    tenant: String,
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /api/auth/authorize?tenant=<id>
async fn authorize(
    State(state): State<OAuthRouteState>,
    Query(query): Query<AuthorizeQuery>,
) -> impl IntoResponse {
    let Ok(tenant_id) = Uuid::parse_str(&query.tenant) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid tenant ID"})),
        );
    };

    match state.tokens.authorization_url(tenant_id) {
        Ok(url) => (
            StatusCode::OK,
            Json(serde_json::json!({"authorization_url": url})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

/// GET /api/auth/callback?code=..&state=<tenant id>
///
/// Always redirects to `{frontend}/settings?status=success|error`.
async fn callback(
    State(state): State<OAuthRouteState>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let settings = format!("{}/settings", state.frontend_url.trim_end_matches('/'));

    if let Some(error) = query.error {
        warn!(
            error = %error,
            description = query.error_description.as_deref().unwrap_or(""),
            "Authorization denied"
        );
        return Redirect::to(&format!("{settings}?status=error"));
    }

    let (Some(code), Some(tenant)) = (query.code, query.state) else {
        warn!("Authorization callback without code or state");
        return Redirect::to(&format!("{settings}?status=error"));
    };
    let Ok(tenant_id) = Uuid::parse_str(&tenant) else {
        warn!(state = %tenant, "Authorization callback with invalid state");
        return Redirect::to(&format!("{settings}?status=error"));
    };

    match state.tokens.connect(tenant_id, &code).await {
        Ok(owner) => {
            info!(tenant = %tenant_id, mailbox = %owner.email, "Authorization callback completed");
            Redirect::to(&format!("{settings}?status=success"))
        }
        Err(e) => {
            warn!(tenant = %tenant_id, error = %e, "Authorization callback failed");
            Redirect::to(&format!("{settings}?status=error"))
        }
    }
}

/// POST /api/auth/revoke/{tenant}
async fn revoke(
    State(state): State<OAuthRouteState>,
    Path(tenant): Path<String>,
) -> impl IntoResponse {
    let Ok(tenant_id) = Uuid::parse_str(&tenant) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid tenant ID"})),
        );
    };

    match state.tokens.revoke(tenant_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "revoked"})),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Tenant has no mail connection"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

/// Build the OAuth REST routes.
pub fn oauth_routes(state: OAuthRouteState) -> Router {
    Router::new()
        .route("/api/auth/authorize", get(authorize))
        .route("/api/auth/callback", get(callback))
        .route("/api/auth/revoke/{tenant}", post(revoke))
        .with_state(state)
}
