use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::Router;
use creatorgate_api::{build_admin_router, guard_router, AppState, SharedState};
use creatorgate_common::AppConfig;
use creatorgate_rate_limit::{ManualClock, RateLimiterRegistry};
use serde_json::{json, Value};
use tower::ServiceExt;

fn state() -> (SharedState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = RateLimiterRegistry::builder().clock(clock.clone()).build();
    let state = Arc::new(AppState::with_limiter(AppConfig::default(), limiter).unwrap());
    (state, clock)
}

fn gateway(state: SharedState) -> Router {
    guard_router(
        Router::new().route("/api/auth/login", post(|| async { "ok" })),
        state,
    )
}

async fn login(app: &Router) -> StatusCode {
    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .extension(ConnectInfo(SocketAddr::from(([1, 2, 3, 4], 1234))))
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(req).await.unwrap().status()
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_status() {
    let (state, _clock) = state();
    let admin = build_admin_router(state);

    let (status, body) = call(&admin, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn lists_builtin_policies() {
    let (state, _clock) = state();
    let admin = build_admin_router(state);

    let (status, body) = call(&admin, "GET", "/api/policies", None).await;
    assert_eq!(status, StatusCode::OK);

    let policies = body.as_array().unwrap();
    assert_eq!(policies.len(), 4);
    let ai = policies
        .iter()
        .find(|p| p["name"] == "ai-insights")
        .unwrap();
    assert_eq!(ai["window_secs"], 3600);
    assert_eq!(ai["max_requests"], 10);
    assert_eq!(ai["extra"]["upgradeUrl"], "/pricing");
}

#[tokio::test]
async fn policy_update_takes_effect_immediately() {
    let (state, _clock) = state();
    let admin = build_admin_router(state.clone());
    let app = gateway(state);

    let (status, body) = call(
        &admin,
        "PUT",
        "/api/policies/auth",
        Some(json!({ "max_requests": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"]["max_requests"], 2);
    assert_eq!(body["policy"]["window_secs"], 900);

    assert_eq!(login(&app).await, StatusCode::OK);
    assert_eq!(login(&app).await, StatusCode::OK);
    assert_eq!(login(&app).await, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn invalid_policy_update_is_rejected() {
    let (state, _clock) = state();
    let admin = build_admin_router(state.clone());

    let (status, _) = call(
        &admin,
        "PUT",
        "/api/policies/auth",
        Some(json!({ "window_secs": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &admin,
        "PUT",
        "/api/policies/auth",
        Some(json!({ "window_secs": 100_000_000_000_000u64 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &admin,
        "PUT",
        "/api/policies/exports",
        Some(json!({ "max_requests": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unchanged.
    assert_eq!(state.limiter.policies().get("auth").unwrap().window_secs(), 900);
}

#[tokio::test]
async fn counters_can_be_inspected_and_reset() {
    let (state, _clock) = state();
    let admin = build_admin_router(state.clone());
    let app = gateway(state);

    for _ in 0..5 {
        login(&app).await;
    }
    assert_eq!(login(&app).await, StatusCode::TOO_MANY_REQUESTS);

    let (status, body) = call(&admin, "GET", "/api/counters/auth/1.2.3.4", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 5);
    assert_eq!(body["remaining"], 0);

    let (status, _) = call(&admin, "DELETE", "/api/counters/auth/1.2.3.4", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login(&app).await, StatusCode::OK);

    let (status, _) = call(&admin, "DELETE", "/api/counters/auth/5.5.5.5", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&admin, "GET", "/api/counters/exports/1.2.3.4", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_and_metrics_reflect_traffic() {
    let (state, _clock) = state();
    let admin = build_admin_router(state.clone());
    let app = gateway(state);

    for _ in 0..7 {
        login(&app).await;
    }

    let (status, body) = call(&admin, "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 7);
    assert_eq!(body["rate_limited_requests"], 2);
    assert_eq!(body["policies"]["auth"]["rate_limited"], 2);
    assert_eq!(body["tracked_keys"], 1);
    assert_eq!(body["failure_mode"], "open");

    let (status, body) = call(&admin, "GET", "/api/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("creatorgate_rate_limited_total{policy=\"auth\"} 2"));
    assert!(text.contains("creatorgate_tracked_keys 1"));
}
