//! Integration tests for the agent API endpoints

use agent_lib::{
    cgroup::{init_knob_file, CgroupKnob, FsCgroupAccessor},
    health::{components, ComponentStatus, HealthRegistry},
    hooks::{CpuBvtPlugin, HookDispatcher},
    models::{HookRequest, POD_QOS_CLASS_LABEL},
    observability::AgentMetrics,
    probe::CapabilityProbe,
    rule::RuleStore,
};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    pub dispatcher: Arc<HookDispatcher>,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health();
    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness();
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

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

async fn pod_sandbox_hook(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HookRequest>,
) -> impl IntoResponse {
    let (response, failures) = state.dispatcher.dispatch(&request);
    let failures: Vec<serde_json::Value> = failures
        .into_iter()
        .map(|f| serde_json::json!({"plugin": f.plugin, "error": f.error.to_string()}))
        .collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({"response": response, "failures": failures})),
    )
}

fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/hooks/pod-sandbox", post(pod_sandbox_hook))
        .with_state(state)
}

fn setup_test_app() -> (TempDir, Router, Arc<AppState>) {
    let tmp = TempDir::new().unwrap();
    for dir in ["kubepods", "kubepods/besteffort", "kubepods/besteffort/pod-x"] {
        init_knob_file(tmp.path(), dir, CgroupKnob::CpuBvtWarpNs, "0").unwrap();
    }
    let accessor = Arc::new(FsCgroupAccessor::new(tmp.path()));

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DISPATCHER);
    health_registry.register(components::RECONCILER);

    let metrics = AgentMetrics::new();
    let mut dispatcher = HookDispatcher::new(metrics.clone());
    dispatcher.register(Arc::new(CpuBvtPlugin::new(
        Arc::new(RuleStore::new()),
        Arc::new(CapabilityProbe::new(accessor)),
    )));

    let state = Arc::new(AppState {
        health_registry,
        metrics,
        dispatcher: Arc::new(dispatcher),
    });
    let router = create_test_router(state.clone());

    (tmp, router, state)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (_tmp, app, _state) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (_tmp, app, state) = setup_test_app();

    state
        .health_registry
        .set_unhealthy(components::DISPATCHER, "Failed to access cgroups");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (_tmp, app, _state) = setup_test_app();

    // By default, agent is not ready
    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (_tmp, app, state) = setup_test_app();

    state.health_registry.set_ready(true);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (_tmp, app, state) = setup_test_app();

    state.metrics.observe_dispatch_latency(0.001);
    state.metrics.observe_reconcile_latency(0.002);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("qos_hook_agent_dispatch_latency_seconds"));
    assert!(metrics_text.contains("qos_hook_agent_reconcile_latency_seconds"));
}

#[tokio::test]
async fn test_pod_sandbox_hook_stages_bvt_value() {
    let (_tmp, app, _state) = setup_test_app();

    let request = HookRequest {
        labels: HashMap::from([(POD_QOS_CLASS_LABEL.to_string(), "BE".to_string())]),
        cgroup_parent: "kubepods/besteffort/pod-x".to_string(),
        ..Default::default()
    };

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/hooks/pod-sandbox")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(reply["response"]["resources"]["cpu.bvt_warpns"], -1);
    assert_eq!(reply["failures"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_pod_sandbox_hook_empty_when_unlabeled_guaranteed() {
    let (_tmp, app, _state) = setup_test_app();

    // Unlabeled guaranteed pod still gets the tier-pod default.
    let request = HookRequest {
        cgroup_parent: "kubepods/pod-y".to_string(),
        ..Default::default()
    };

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/hooks/pod-sandbox")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(reply["response"]["resources"]["cpu.bvt_warpns"], 2);
}
