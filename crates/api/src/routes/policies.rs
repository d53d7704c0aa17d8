use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use creatorgate_common::{GateError, PolicyConfig};
use creatorgate_rate_limit::{Policy, PolicySummary};
use serde_json::json;

use crate::state::SharedState;

/// GET /api/policies
///
/// Lists every registered policy with its window, quota and rejection payload.
pub async fn list_policies(State(state): State<SharedState>) -> Json<Vec<PolicySummary>> {
    let policies = state
        .limiter
        .policies()
        .policies()
        .iter()
        .map(|p| p.summary())
        .collect();
    Json(policies)
}

/// PUT /api/policies/{name}
///
/// Tunes an existing policy at runtime. Fields left out of the body keep
/// their current value. Counters are preserved.
pub async fn update_policy(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Json(update): Json<PolicyConfig>,
) -> impl IntoResponse {
    let current = match state.limiter.policies().get(&name) {
        Ok(policy) => policy,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
        }
    };

    let mut spec = current.to_spec();
    if let Some(window_secs) = update.window_secs {
        spec.window_secs = window_secs;
    }
    if let Some(max_requests) = update.max_requests {
        spec.max_requests = max_requests;
    }
    if let Some(message) = update.message {
        spec.message = message;
    }
    if let Some(extra) = update.extra {
        spec.extra = extra;
    }

    let policy = match Policy::from_spec(&spec) {
        Ok(policy) => policy,
        Err(e @ GateError::InvalidPolicy { .. }) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "status": "error",
                    "message": format!("validation failed: {}", e)
                })),
            )
        }
        Err(e) => {
            tracing::error!(policy = %name, error = %e, "failed to build policy");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            );
        }
    };

    let summary = policy.summary();
    state.limiter.update_policy(policy);
    tracing::info!(policy = %name, "policy updated via admin API");

    (
        StatusCode::OK,
        Json(json!({
            "status": "updated",
            "policy": summary
        })),
    )
}
