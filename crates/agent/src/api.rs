//! HTTP API for health checks, Prometheus metrics, and hook dispatch
//!
//! The hook route is the in-process boundary handed to whatever transport
//! fronts the container runtime; the request/response bodies are this
//! agent's own structures, not the runtime's wire schema.

use agent_lib::{
    health::{ComponentStatus, HealthRegistry},
    hooks::HookDispatcher,
    models::{HookRequest, HookResponse},
    observability::AgentMetrics,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    pub dispatcher: Arc<HookDispatcher>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AgentMetrics,
        dispatcher: Arc<HookDispatcher>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            dispatcher,
        }
    }
}

/// One plugin failure, serialized for the dispatch reply
#[derive(Debug, Serialize, Deserialize)]
pub struct FailureDetail {
    pub plugin: String,
    pub error: String,
}

/// Reply to a hook dispatch: the sparse response plus any plugin failures.
/// Failures are informational; the caller proceeds with creation anyway.
#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchReply {
    pub response: HookResponse,
    pub failures: Vec<FailureDetail>,
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health();

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Dispatch one pod-sandbox lifecycle request through the plugin chain
async fn pod_sandbox_hook(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HookRequest>,
) -> impl IntoResponse {
    let (response, failures) = state.dispatcher.dispatch(&request);
    let reply = DispatchReply {
        response,
        failures: failures
            .into_iter()
            .map(|f| FailureDetail {
                plugin: f.plugin.to_string(),
                error: f.error.to_string(),
            })
            .collect(),
    };
    (StatusCode::OK, Json(reply))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/hooks/pod-sandbox", post(pod_sandbox_hook))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
