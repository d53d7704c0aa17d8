mod config;
mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use creatorgate_api::{guard_router, run_admin_server, SharedState};
use creatorgate_common::AppConfig;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::GatewayConfig;
use crate::upstream::Upstream;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    // Parse command-line args for config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/creatorgate.yaml".to_string());

    info!(config_path = %config_path, "starting creatorgate");

    let gateway_config = GatewayConfig::load(&config_path)?;
    let app_config = gateway_config.config.clone();

    let state = creatorgate_api::new_shared_state(app_config.clone())?;
    info!(
        config = %gateway_config.config_path.display(),
        failure_mode = ?app_config.rate_limit.failure_mode,
        policies = state.limiter.policies().policies().len(),
        "rate limiter ready"
    );

    let sweeper = state.limiter.start_sweep_task(gateway_config.sweep_interval());

    // Launch admin API in background
    let admin = if app_config.server.admin.enabled {
        let admin_state = state.clone();
        let listen_addr = app_config.server.admin.listen.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_admin_server(admin_state, &listen_addr).await {
                error!(error = %e, "admin API server failed");
            }
        }))
    } else {
        None
    };

    let app = build_gateway(&app_config, state)?;
    let listener = tokio::net::TcpListener::bind(&app_config.server.listen).await?;
    info!(addr = %app_config.server.listen, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    if let Some(admin) = admin {
        admin.abort();
    }
    info!("creatorgate stopped");
    Ok(())
}

/// Gateway router: admitted requests are forwarded to the upstream API.
fn build_gateway(config: &AppConfig, state: SharedState) -> Result<Router> {
    let app = match config.server.upstream {
        Some(ref base) => {
            info!(upstream = %base, "forwarding admitted requests");
            let upstream = Arc::new(Upstream::new(base, config.server.request_body_limit)?);
            Router::new()
                .fallback(upstream::forward)
                .with_state(upstream)
        }
        None => {
            warn!("no upstream configured, admitted requests will receive 502");
            Router::new().fallback(upstream::no_upstream)
        }
    };

    Ok(guard_router(app, state).layer(TraceLayer::new_for_http()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
