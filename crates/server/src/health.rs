use std::sync::Arc;

use arbiter_agent::runtime::DispatchRuntime;
use arbiter_core::domain::worker::Worker;
use arbiter_core::metrics::SystemMetrics;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    runtime: Arc<DispatchRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub store: HealthCheck,
    pub workers: Vec<Worker>,
    pub metrics: Option<SystemMetrics>,
    pub checked_at: String,
}

pub fn router(runtime: Arc<DispatchRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { runtime })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    runtime: Arc<DispatchRuntime>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(runtime)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let (store, metrics) = match state.runtime.metrics().await {
        Ok(metrics) => (
            HealthCheck { status: "ready", detail: "request history readable".to_string() },
            Some(metrics),
        ),
        Err(error) => (
            HealthCheck { status: "degraded", detail: format!("request history unavailable: {error}") },
            None,
        ),
    };
    let ready = store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "arbiter-server runtime initialized".to_string(),
        },
        store,
        workers: state.runtime.load().snapshot(),
        metrics,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
