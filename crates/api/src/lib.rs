pub mod classify;
pub mod client_ip;
pub mod guard;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use creatorgate_common::{AppConfig, GateResult};
use tower_http::cors::{Any, CorsLayer};

pub use classify::{Classification, RouteClassifier};
pub use client_ip::Principal;
pub use state::{AppState, GateMetrics, SharedState};

/// Wrap application routes with the admission guard.
///
/// The guard runs before every route and the fallback, so no handler executes
/// for a request that is over quota.
pub fn guard_router(app: Router, state: SharedState) -> Router {
    app.layer(middleware::from_fn_with_state(state, guard::enforce))
}

/// Build the admin API router.
pub fn build_admin_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(routes::health::health_check))
        // Prometheus metrics
        .route("/api/metrics", get(routes::metrics::get_metrics))
        // Traffic statistics
        .route("/api/stats", get(routes::stats::get_stats))
        // Policy inspection and runtime tuning
        .route("/api/policies", get(routes::policies::list_policies))
        .route(
            "/api/policies/{name}",
            axum::routing::put(routes::policies::update_policy),
        )
        // Per-identity counters
        .route(
            "/api/counters/{policy}/{key}",
            get(routes::counters::get_counter).delete(routes::counters::reset_counter),
        )
        .with_state(state)
        .layer(cors)
}

/// Start the admin API server on the specified address.
///
/// This function will block until the server is shut down.
pub async fn run_admin_server(state: SharedState, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_admin_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("admin API server listening on {}", listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience function to create a SharedState from an AppConfig.
pub fn new_shared_state(config: AppConfig) -> GateResult<SharedState> {
    Ok(Arc::new(AppState::new(config)?))
}
