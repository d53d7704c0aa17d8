use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use creatorgate_rate_limit::{Decision, RateLimitStatus, Rejection};
use serde_json::json;
use tracing::{debug, error};

use crate::client_ip::{rate_limit_key, resolve_client_ip, Principal};
use crate::state::SharedState;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");

/// Admission middleware.
///
/// Classifies the request, derives its key and checks it before any handler
/// code runs. A denial short-circuits with 429; the inner service is never
/// called. Every response, allowed or denied, carries the `RateLimit-*`
/// headers.
pub async fn enforce(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let classification = state.classifier.classify(req.uri().path());
    let policy = classification.policy.to_string();

    let key = {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let client_ip = resolve_client_ip(peer, req.headers(), &state.trusted_proxies);
        rate_limit_key(
            classification.key,
            client_ip,
            req.extensions().get::<Principal>(),
        )
    };

    state
        .metrics
        .requests_total
        .with_label_values(&[policy.as_str()])
        .inc();

    let decision = match state.limiter.check(&policy, &key) {
        Ok(decision) => decision,
        Err(e) => {
            error!(policy = %policy, path = %req.uri().path(), error = %e, "rate limit check failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "rate limiter misconfigured" })),
            )
                .into_response();
        }
    };

    let now = state.limiter.now();
    match decision {
        Decision::Allow(status) => {
            debug!(policy = %policy, key = %key, remaining = status.remaining, "request admitted");
            let mut response = next.run(req).await;
            apply_rate_limit_headers(response.headers_mut(), &status, now);
            response
        }
        Decision::Deny(rejection) => {
            state
                .metrics
                .rate_limited_total
                .with_label_values(&[policy.as_str()])
                .inc();
            rejection_response(&rejection, now)
        }
    }
}

/// Render a rejection as a 429 response.
pub fn rejection_response(rejection: &Rejection, now: DateTime<Utc>) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(rejection.body())).into_response();

    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, &rejection.status, now);

    let retry_secs = (rejection.retry_after - now).num_milliseconds().max(0) as u64;
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(retry_secs.div_ceil(1000)),
    );

    response
}

/// Set `RateLimit-Limit`, `RateLimit-Remaining`, `RateLimit-Reset` (seconds
/// until the window resets) and `RateLimit-Policy`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus, now: DateTime<Utc>) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(status.reset_after_secs(now)));

    let policy = format!("{};w={}", status.limit, status.window_secs);
    if let Ok(value) = HeaderValue::from_str(&policy) {
        headers.insert(RATELIMIT_POLICY, value);
    }
}
