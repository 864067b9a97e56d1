//! SafeTrail API Server
//!
//! HTTP surface over the safety core: enrollment, telemetry ingestion,
//! resolve/panic signals, ledger audit queries and Prometheus metrics.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use dispatcher::LoggingAdapter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use safety_monitor::SafetyMonitor;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::GovernorLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod error;
pub mod rate_limit;
mod routes;

pub use crate::config::{AppConfig, LogFormat, LoggingConfig, ServerConfig};
pub use error::ApiError;
pub use rate_limit::RateLimitConfig;

/// Application state shared across handlers
pub struct AppState {
    pub monitor: SafetyMonitor,
    pub version: String,
    pub start_time: std::time::Instant,
    /// Prometheus recorder handle, when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(monitor: SafetyMonitor, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            monitor,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            metrics,
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    pub subjects: usize,
    pub ledger_entries: Option<usize>,
    pub operator_alerts: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, limits: &RateLimitConfig) -> Router {
    let mut ingest = Router::new().route("/api/v1/telemetry", post(routes::ingest::ingest));
    match rate_limit::create_governor_config(limits) {
        Some(config) => ingest = ingest.layer(GovernorLayer { config }),
        None => warn!(?limits, "Invalid rate limit, telemetry ingestion is unthrottled"),
    }

    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route(
            "/api/v1/subjects/:id",
            put(routes::subjects::enroll)
                .get(routes::subjects::status)
                .delete(routes::subjects::retire),
        )
        .route(
            "/api/v1/subjects/:id/contacts",
            put(routes::subjects::set_contacts).get(routes::subjects::get_contacts),
        )
        .route("/api/v1/subjects/:id/resolve", post(routes::subjects::resolve))
        .route("/api/v1/subjects/:id/panic", post(routes::subjects::panic))
        .route("/api/v1/ledger", get(routes::audit::query_ledger))
        .route("/api/v1/operator-alerts", get(routes::operator::list_operator_alerts))
        .route("/metrics", get(metrics_handler))
        .merge(ingest)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ledger_entries = match state.monitor.ledger().len().await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "Ledger unavailable for health check");
            None
        }
    };

    Json(HealthResponse {
        status: if ledger_entries.is_some() { "healthy" } else { "degraded" },
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        subjects: state.monitor.subject_count(),
        ledger_entries,
        operator_alerts: state.monitor.operator_alerts().len(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    match config.format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

/// Run the server until ctrl-c
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let metrics = if config.server.metrics_enabled {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    // Real push/SMS/voice providers plug in through `ChannelAdapter`
    let monitor = SafetyMonitor::new(config.monitor.clone(), Arc::new(LoggingAdapter));
    let sweeper = monitor.spawn_sweeper();

    let state = Arc::new(AppState::new(monitor, metrics));
    let app = create_router(state, &config.rate_limit);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!("Starting API server on {}", config.server.bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
