//! HTTP server startup and routing.

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::config::Config;
use crate::metrics;
use crate::shared_state::AppState;
use crate::telemetry;

/// Request bodies carry one question; anything larger is refused.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Extra time past the orchestration budget for persistence and encoding.
const RESPONSE_SLACK: Duration = Duration::from_secs(30);

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    telemetry::init_tracing("info");
    metrics::init_metrics();
    cfg.print_config();

    let addr = cfg.api_addr()?;
    let state = AppState::from_config(cfg)?;
    let shutdown = state.shutdown.clone();

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, cancelling in-flight orchestrations");
            shutdown.cancel();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);
    let request_timeout = state.config.orchestration_budget() + RESPONSE_SLACK;

    Router::new()
        .route("/api/orchestrate", post(crate::api::orchestrate))
        .route("/api/conversations", get(crate::api::get_conversations))
        .route("/api/conversations/:id/messages", get(crate::api::get_conversation_messages))
        .route("/api/dbcheck", get(crate::api::dbcheck))
        .route("/api/ping", post(crate::api::ping))
        .route("/healthz", get(crate::api::healthz))
        .route("/metrics", get(metrics::get_metrics))
        .layer(middleware::from_fn(track_requests))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    metrics::inc_request(&route, response.status().as_str());
    response
}
