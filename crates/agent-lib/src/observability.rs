//! Observability infrastructure for the QoS hook agent
//!
//! Provides:
//! - Prometheus metrics (dispatch latency, reconcile latency, drift counts)
//! - Structured JSON event logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    dispatch_latency_seconds: Histogram,
    reconcile_latency_seconds: Histogram,
    drift_corrections_total: IntCounter,
    dispatch_errors_total: IntCounter,
    reconcile_errors_total: IntCounter,
    reconcile_targets: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            dispatch_latency_seconds: register_histogram!(
                "qos_hook_agent_dispatch_latency_seconds",
                "Time spent running the plugin chain for one lifecycle event",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register dispatch_latency_seconds"),

            reconcile_latency_seconds: register_histogram!(
                "qos_hook_agent_reconcile_latency_seconds",
                "Time spent on one full reconciliation pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            drift_corrections_total: register_int_counter!(
                "qos_hook_agent_drift_corrections_total",
                "Cgroup writes that corrected a drifted value"
            )
            .expect("Failed to register drift_corrections_total"),

            dispatch_errors_total: register_int_counter!(
                "qos_hook_agent_dispatch_errors_total",
                "Plugin failures during hook dispatch"
            )
            .expect("Failed to register dispatch_errors_total"),

            reconcile_errors_total: register_int_counter!(
                "qos_hook_agent_reconcile_errors_total",
                "Plugin failures during reconciliation"
            )
            .expect("Failed to register reconcile_errors_total"),

            reconcile_targets: register_int_gauge!(
                "qos_hook_agent_reconcile_targets",
                "Targets covered by the most recent reconciliation pass"
            )
            .expect("Failed to register reconcile_targets"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record the latency of one hook dispatch
    pub fn observe_dispatch_latency(&self, duration_secs: f64) {
        self.inner().dispatch_latency_seconds.observe(duration_secs);
    }

    /// Record the latency of one reconciliation pass
    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.inner().reconcile_latency_seconds.observe(duration_secs);
    }

    /// Count drift corrections applied by the reconciler
    pub fn inc_drift_corrections(&self, count: u64) {
        self.inner().drift_corrections_total.inc_by(count);
    }

    /// Count plugin failures seen during dispatch
    pub fn inc_dispatch_errors(&self, count: u64) {
        self.inner().dispatch_errors_total.inc_by(count);
    }

    /// Count plugin failures seen during reconciliation
    pub fn inc_reconcile_errors(&self, count: u64) {
        self.inner().reconcile_errors_total.inc_by(count);
    }

    /// Update the reconcile target gauge
    pub fn set_reconcile_targets(&self, count: i64) {
        self.inner().reconcile_targets.set(count);
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for dispatches, drift
/// corrections, and lifecycle events.
#[derive(Clone)]
pub struct EventLogger {
    node_name: String,
}

impl EventLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, plugins: &[&str]) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            plugins = ?plugins,
            "QoS hook agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "QoS hook agent shutting down"
        );
    }

    /// Log a drift correction applied by the reconciler
    pub fn log_drift_correction(&self, cgroup_path: &str, knob: &str, previous: &str) {
        info!(
            event = "drift_corrected",
            node = %self.node_name,
            cgroup = %cgroup_path,
            knob = %knob,
            previous = %previous,
            "Corrected drifted cgroup value"
        );
    }

    /// Log the outcome of a rule rebuild
    pub fn log_rule_reload(&self, success: bool, detail: &str) {
        if success {
            info!(
                event = "rule_reloaded",
                node = %self.node_name,
                detail = %detail,
                "QoS rule reloaded"
            );
        } else {
            warn!(
                event = "rule_reload_failed",
                node = %self.node_name,
                detail = %detail,
                "QoS rule reload rejected, keeping previous rule"
            );
        }
    }
}
