//! HTTP surface: exposition text for scrapers plus JSON views for dashboards.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};

use crate::agent::MonitoringAgent;
use crate::error::NavigatorResult;
use crate::models::HealthLevel;

pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn metrics(State(agent): State<MonitoringAgent>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        agent.registry().export_prometheus_format(),
    )
}

async fn health(State(agent): State<MonitoringAgent>) -> impl IntoResponse {
    let report = agent.get_health_status();
    let status = if report.status == HealthLevel::Critical {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}

async fn summary(State(agent): State<MonitoringAgent>) -> impl IntoResponse {
    Json(agent.get_monitoring_summary())
}

async fn agents(State(agent): State<MonitoringAgent>) -> impl IntoResponse {
    Json(json!({
        "agents": agent.get_agent_metrics(),
        "running": agent.tracker().running_executions(),
        "long_running": agent.long_running_executions(),
    }))
}

async fn trends(State(agent): State<MonitoringAgent>) -> impl IntoResponse {
    Json(agent.analyze_trends())
}

async fn alerts(State(agent): State<MonitoringAgent>) -> impl IntoResponse {
    Json(agent.maintenance_alerts())
}

async fn diagnosis(State(agent): State<MonitoringAgent>) -> impl IntoResponse {
    Json(agent.diagnose().await)
}

pub fn router(agent: MonitoringAgent) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/summary", get(summary))
        .route("/agents", get(agents))
        .route("/trends", get(trends))
        .route("/alerts", get(alerts))
        .route("/diagnosis", post(diagnosis))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(trace::DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(agent)
}

pub async fn serve(
    agent: MonitoringAgent,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> NavigatorResult<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(agent, listener, shutdown).await
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve_with_listener(
    agent: MonitoringAgent,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> NavigatorResult<()> {
    let local = listener.local_addr()?;
    info!("Metrics endpoint listening on http://{}/metrics", local);

    axum::serve(listener, router(agent))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
