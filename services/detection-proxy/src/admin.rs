//! Admin API for token pool management
//!
//! The pool shrinks monotonically as tokens run out of credits; these
//! endpoints are the replenishment path. Token values travel only in
//! request bodies and are never echoed back or logged; responses and log
//! lines carry counts and fingerprints.
//!
//! Endpoints:
//! - GET    /admin/tokens: pool summary (count only, never values)
//! - POST   /admin/tokens: add one token to the end of the pool
//! - DELETE /admin/tokens: remove one token by value

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Deserialize;
use tracing::{info, warn};

use common::token_fingerprint;
use token_pool::TokenPool;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<TokenPool>,
}

impl AdminState {
    pub fn new(pool: Arc<TokenPool>) -> Self {
        Self { pool }
    }
}

/// Build the admin router with all token management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/tokens",
            get(pool_summary).post(add_token).delete(remove_token),
        )
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> axum::response::Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// GET /admin/tokens: pool health summary. Token values are never exposed.
async fn pool_summary(State(state): State<AdminState>) -> impl IntoResponse {
    json_response(StatusCode::OK, state.pool.health().await)
}

/// Request body for add/remove endpoints.
#[derive(Deserialize)]
struct TokenRequest {
    token: String,
}

/// POST /admin/tokens: append a token to the pool.
///
/// Returns 201 when added, 409 when the token is already present (the pool
/// holds no duplicates), 400 for an empty token.
async fn add_token(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<TokenRequest>,
) -> impl IntoResponse {
    if body.token.trim().is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "token must not be empty" }),
        );
    }

    let fp = token_fingerprint(&body.token);
    let added = state.pool.store().add(body.token).await;
    let available = state.pool.store().len().await;

    if added {
        info!(token = %fp, tokens_available = available, "token added to pool");
        json_response(
            StatusCode::CREATED,
            serde_json::json!({ "added": true, "tokens_available": available }),
        )
    } else {
        warn!(token = %fp, "token already in pool");
        json_response(
            StatusCode::CONFLICT,
            serde_json::json!({ "added": false, "tokens_available": available }),
        )
    }
}

/// DELETE /admin/tokens: remove a token by value.
async fn remove_token(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<TokenRequest>,
) -> impl IntoResponse {
    let fp = token_fingerprint(&body.token);
    let removed = state.pool.store().remove(&body.token).await;
    let available = state.pool.store().len().await;

    if removed {
        info!(token = %fp, tokens_available = available, "token removed from pool");
        json_response(
            StatusCode::OK,
            serde_json::json!({ "removed": true, "tokens_available": available }),
        )
    } else {
        json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "removed": false, "tokens_available": available }),
        )
    }
}
