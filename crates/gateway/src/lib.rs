//! HTTP API gateway for OpsLoop.
//!
//! Puts the loop supervisor behind a small REST surface: queries go in
//! through `POST /v1/query` and come back as an answer or a failure report,
//! while live loops, tools and trace statistics can be inspected and loops
//! cancelled.
//!
//! Built on Axum.

pub mod api;
pub mod validation;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Router, extract::State, response::Json, routing::get};
use chrono::{DateTime, Utc};
use opsloop_config::{AppConfig, GatewayConfig};
use opsloop_runtime::LoopSupervisor;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use api::{SharedState, status_for};
pub use validation::{QueryRejection, validate_query};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub supervisor: Arc<LoopSupervisor>,
    pub max_query_length: usize,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(supervisor: Arc<LoopSupervisor>, max_query_length: usize) -> Self {
        Self {
            supervisor,
            max_query_length,
            started_at: Utc::now(),
        }
    }
}

/// Build the router with every gateway route.
///
/// Layers applied:
/// - Request body size limit (1 MB)
/// - CORS restricted to same-origin callers
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the supervisor described by `config` and serve it.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let supervisor = opsloop_runtime::build_supervisor(&config)?;
    serve(&config.gateway, supervisor).await
}

/// Serve an already assembled supervisor until Ctrl-C.
pub async fn serve(
    gateway: &GatewayConfig,
    supervisor: LoopSupervisor,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", gateway.host, gateway.port);
    let state = Arc::new(GatewayState::new(
        Arc::new(supervisor),
        gateway.max_query_length,
    ));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "OpsLoop gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; serve until the process is killed.
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    backend: String,
    live_loops: usize,
    uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.supervisor.backend_name().to_string(),
        live_loops: state.supervisor.live_count(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}
