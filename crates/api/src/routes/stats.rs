use axum::extract::State;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::state::SharedState;

/// GET /api/stats
///
/// Per-policy request and rejection counts, plus limiter-wide figures.
pub async fn get_stats(State(state): State<SharedState>) -> Json<Value> {
    let uptime_secs = state.start_time.elapsed().as_secs();

    let mut per_policy = Map::new();
    let mut total_requests = 0u64;
    let mut total_limited = 0u64;

    for policy in state.limiter.policies().policies() {
        let requests = state
            .metrics
            .requests_total
            .with_label_values(&[policy.name()])
            .get();
        let limited = state
            .metrics
            .rate_limited_total
            .with_label_values(&[policy.name()])
            .get();
        total_requests += requests;
        total_limited += limited;

        per_policy.insert(
            policy.name().to_string(),
            json!({
                "requests": requests,
                "rate_limited": limited,
            }),
        );
    }

    Json(json!({
        "total_requests": total_requests,
        "rate_limited_requests": total_limited,
        "tracked_keys": state.limiter.tracked_keys(),
        "backend_failures": state.limiter.backend_failures(),
        "failure_mode": state.limiter.failure_mode(),
        "uptime_secs": uptime_secs,
        "policies": per_policy
    }))
}
