use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// The API server admitted requests are forwarded to.
pub struct Upstream {
    client: reqwest::Client,
    base: String,
    body_limit: usize,
}

impl Upstream {
    pub fn new(base: &str, body_limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            body_limit,
        })
    }

    fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }
}

/// Remove the fixed hop-by-hop headers plus any header the `Connection`
/// header lists as connection-specific.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn gateway_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Forward an admitted request to the upstream API and relay its response.
pub async fn forward(State(upstream): State<Arc<Upstream>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = upstream.url_for(path_and_query);

    let body = match to_bytes(body, upstream.body_limit).await {
        Ok(body) => body,
        Err(_) => return gateway_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"),
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);

    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        if let Ok(value) = HeaderValue::from_str(&peer.ip().to_string()) {
            headers.append("x-forwarded-for", value);
        }
    }

    debug!(method = %parts.method, url = %url, "forwarding request upstream");

    let result = upstream
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream_response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "upstream request failed");
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            return gateway_error(status, "upstream unavailable");
        }
    };

    let status = upstream_response.status();
    let mut headers = upstream_response.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(CONTENT_LENGTH);

    let bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(url = %url, error = %e, "failed to read upstream response");
            return gateway_error(StatusCode::BAD_GATEWAY, "upstream response interrupted");
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Fallback when no upstream is configured.
pub async fn no_upstream() -> Response {
    gateway_error(StatusCode::BAD_GATEWAY, "no upstream configured")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    async fn spawn_backend() -> SocketAddr {
        let backend = Router::new().route(
            "/api/revenue",
            post(|headers: HeaderMap, body: String| async move {
                let forwarded = headers
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                (
                    StatusCode::CREATED,
                    [("x-backend", "revenue")],
                    format!("{}|{}", forwarded, body),
                )
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, backend).await.unwrap();
        });
        addr
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("authorization"));
    }

    #[test]
    fn headers_named_by_connection_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, X-Session-Hint , keep-alive"));
        headers.append("connection", HeaderValue::from_static("x-debug-trace"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert("x-debug-trace", HeaderValue::from_static("1"));
        headers.insert("x-request-id", HeaderValue::from_static("r-1"));

        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key("x-session-hint"));
        assert!(!headers.contains_key("x-debug-trace"));
        assert!(!headers.contains_key("connection"));
        assert_eq!(headers["x-request-id"], "r-1");
    }

    #[test]
    fn urls_join_without_double_slash() {
        let upstream = Upstream::new("http://api.internal:3001/", 1024).unwrap();
        assert_eq!(
            upstream.url_for("/api/deals?page=2"),
            "http://api.internal:3001/api/deals?page=2"
        );
    }

    #[tokio::test]
    async fn forwards_requests_and_relays_responses() {
        let addr = spawn_backend().await;
        let upstream = Arc::new(Upstream::new(&format!("http://{}", addr), 1024).unwrap());
        let app = Router::new().fallback(forward).with_state(upstream);

        let req = Request::builder()
            .method("POST")
            .uri("/api/revenue")
            .extension(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5000))))
            .body(Body::from("amount=10"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()["x-backend"], "revenue");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"192.0.2.1|amount=10");
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let upstream = Arc::new(Upstream::new("http://127.0.0.1:9", 4).unwrap());
        let app = Router::new().fallback(forward).with_state(upstream);

        let req = Request::builder()
            .method("POST")
            .uri("/api/revenue")
            .body(Body::from("way too long"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn missing_upstream_is_a_bad_gateway() {
        let app: Router = Router::new().fallback(no_upstream);
        let req = Request::builder().uri("/api/x").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
