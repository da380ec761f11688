//! QoS Hook Agent - node-level cgroup QoS enforcement
//!
//! This binary runs as a DaemonSet on each Kubernetes node, applying
//! QoS-differentiated cgroup parameters at container creation and
//! reconciling them in the background.

use agent_lib::{
    cgroup::FsCgroupAccessor,
    health::{components, HealthRegistry},
    hooks::{CpuBvtPlugin, HookDispatcher},
    observability::{AgentMetrics, EventLogger},
    probe::CapabilityProbe,
    reconciler::{FsPodScanner, ReconcileConfig, ReconcilerLoop},
    rule::{watch_rule_file, RuleConfig, RuleStore},
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting qos-hook-agent");

    // Load configuration
    let config = config::AgentConfig::load()?;
    info!(node_name = %config.node_name, cgroup_root = %config.cgroup_root, "Agent configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::DISPATCHER);
    health_registry.register(components::RECONCILER);
    health_registry.register(components::RULE_STORE);

    // Initialize metrics and structured logger
    let metrics = AgentMetrics::new();
    let logger = EventLogger::new(&config.node_name);

    // Cgroup access, capability probe, rule storage
    let accessor = Arc::new(FsCgroupAccessor::new(&config.cgroup_root));
    let probe = Arc::new(CapabilityProbe::new(accessor.clone()));
    let rule_store = Arc::new(RuleStore::new());

    // Load the initial rule and keep it hot-reloaded
    let mut _rule_watch = None;
    if let Some(path) = &config.rule_config_path {
        match RuleConfig::from_file(path).and_then(|cfg| rule_store.rebuild(&cfg)) {
            Ok(_) => logger.log_rule_reload(true, path),
            Err(e) => {
                health_registry.set_degraded(components::RULE_STORE, e.to_string());
                logger.log_rule_reload(false, &e.to_string());
            }
        }
        match watch_rule_file(path, rule_store.clone()) {
            Ok(handle) => _rule_watch = Some(handle),
            Err(e) => warn!(error = %e, "Rule config watch unavailable, using last loaded rule"),
        }
    }

    // Register the plugin chain
    let mut dispatcher = HookDispatcher::new(metrics.clone());
    dispatcher.register(Arc::new(CpuBvtPlugin::new(
        rule_store.clone(),
        probe.clone(),
    )));
    let dispatcher = Arc::new(dispatcher);
    logger.log_startup(AGENT_VERSION, &dispatcher.plugin_names());

    // Shutdown fan-out for background tasks
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    // Start the reconciler loop
    let reconciler = ReconcilerLoop::new(
        dispatcher.clone(),
        accessor.clone(),
        Arc::new(FsPodScanner::new(&config.cgroup_root)),
        ReconcileConfig {
            interval: Duration::from_secs(config.reconcile_interval_secs),
        },
        metrics.clone(),
        logger.clone(),
    );
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_tx.subscribe()));

    // Create shared application state and start the API server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        dispatcher.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Mark agent as ready after initialization
    health_registry.set_ready(true);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    let _ = reconciler_handle.await;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
