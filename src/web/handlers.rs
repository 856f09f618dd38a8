//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, NewTarget};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

fn db_error_response(e: DbError) -> Response {
    match e {
        DbError::NotFound => error_response(StatusCode::NOT_FOUND, "URL not found"),
        DbError::InvalidAddress(msg) => {
            error_response(StatusCode::BAD_REQUEST, format!("Invalid URL data: {}", msg))
        }
        other => {
            tracing::error!("Request failed: {}", other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_get_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_target(&id) {
        Ok(Some(target)) => Json(target).into_response(),
        Ok(None) => db_error_response(DbError::NotFound),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<NewTarget>,
) -> impl IntoResponse {
    match state.store.add_target(req) {
        Ok(target) => {
            // Give new targets a result without waiting for the next pass
            state.scheduler.probe_if_idle(&target.id).await;
            (StatusCode::CREATED, Json(target)).into_response()
        }
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_target(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => db_error_response(DbError::NotFound),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// API: Service control
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.status() {
        Ok(status) => Json(status).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_service_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> impl IntoResponse {
    match action.as_str() {
        "start" => state.scheduler.start().await,
        "stop" => state.scheduler.stop().await,
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid action"),
    }

    Json(json!({ "message": format!("Service {} requested", action) })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct BypassRequest {
    pub enabled: bool,
}

pub async fn handle_set_bypass(
    State(state): State<AppState>,
    Json(req): Json<BypassRequest>,
) -> impl IntoResponse {
    state.scheduler.set_bypass(req.enabled).await;
    Json(json!({ "bypass": req.enabled }))
}
