use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use creatorgate_common::GateError;
use creatorgate_rate_limit::rejection::format_timestamp;
use serde_json::{json, Value};

use crate::state::SharedState;

fn error_response(e: GateError) -> (StatusCode, Json<Value>) {
    let status = match e {
        GateError::UnknownPolicy(_) => StatusCode::NOT_FOUND,
        GateError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "status": "error", "message": e.to_string() })))
}

/// GET /api/counters/{policy}/{key}
///
/// Shows the current window for one identity under one policy.
pub async fn get_counter(
    State(state): State<SharedState>,
    Path((policy, key)): Path<(String, String)>,
) -> impl IntoResponse {
    let entry = match state.limiter.counter(&policy, &key) {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "status": "error", "message": "no counter for key" })),
            )
        }
        Err(e) => return error_response(e),
    };

    let limit = state
        .limiter
        .policies()
        .get(&policy)
        .map(|p| p.max_requests())
        .unwrap_or_default();
    let expired = state.limiter.now() >= entry.window_end();
    let used = if expired { 0 } else { entry.count };

    (
        StatusCode::OK,
        Json(json!({
            "policy": policy,
            "key": key,
            "count": used,
            "limit": limit,
            "remaining": limit.saturating_sub(used),
            "window_start": format_timestamp(entry.window_start),
            "window_end": format_timestamp(entry.window_end()),
            "expired": expired
        })),
    )
}

/// DELETE /api/counters/{policy}/{key}
///
/// Restores the full quota for one identity, e.g. after a support request.
pub async fn reset_counter(
    State(state): State<SharedState>,
    Path((policy, key)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.limiter.reset(&policy, &key) {
        Ok(true) => (StatusCode::OK, Json(json!({ "status": "reset" }))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "message": "no counter for key" })),
        ),
        Err(e) => error_response(e),
    }
}
