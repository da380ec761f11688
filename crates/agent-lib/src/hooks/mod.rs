//! Runtime hook plugins and dispatch
//!
//! Plugins implement one resource knob each and are invoked through a
//! fixed-order chain. The same chain serves both execution paths: the
//! dispatcher feeds it proxy contexts built from intercepted lifecycle
//! requests, the reconciler feeds it contexts for on-disk targets.

mod cpu_bvt;


pub use cpu_bvt::CpuBvtPlugin;

use crate::cgroup::CgroupError;
use crate::models::{HookRequest, HookResponse};
use crate::observability::AgentMetrics;
use crate::protocol::{PodContext, ResourceContext};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Errors a single plugin invocation can raise.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Cgroup(#[from] CgroupError),
}

/// One plugin's failure inside a chain run. Failures are aggregated, never
/// short-circuited: knob failures are independent of each other.
#[derive(Debug)]
pub struct PluginFailure {
    pub plugin: &'static str,
    pub error: HookError,
}

/// A named unit tuning one or more resource knobs.
///
/// Implementations must be pure functions of context plus current rule:
/// no per-invocation state, no branching on context origin.
pub trait HookPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute the effective value for this target and deliver it through
    /// the context.
    fn compute(&self, ctx: &mut dyn ResourceContext) -> Result<(), HookError>;
}

/// Fixed-order plugin registry shared by both execution paths.
pub struct HookDispatcher {
    plugins: Vec<Arc<dyn HookPlugin>>,
    metrics: AgentMetrics,
}

impl HookDispatcher {
    pub fn new(metrics: AgentMetrics) -> Self {
        Self {
            plugins: Vec::new(),
            metrics,
        }
    }

    /// Append a plugin to the chain. Registration order is invocation
    /// order; plugins are expected to own disjoint knobs, so ordering is a
    /// determinism concern, not a correctness one.
    pub fn register(&mut self, plugin: Arc<dyn HookPlugin>) {
        debug!(plugin = plugin.name(), "Registered hook plugin");
        self.plugins.push(plugin);
    }

    /// Synchronous entry point for one intercepted lifecycle event.
    ///
    /// Runs the full chain even when a plugin fails, then returns the
    /// sparse response together with the aggregated failures. The caller
    /// proceeds with container creation either way: these knobs are
    /// optimizations, not preconditions.
    pub fn dispatch(&self, request: &HookRequest) -> (HookResponse, Vec<PluginFailure>) {
        let start = Instant::now();

        let mut ctx = PodContext::from_request(request);
        let failures = self.run_chain(&mut ctx);

        let mut response = HookResponse::default();
        ctx.finish(&mut response);

        self.metrics
            .observe_dispatch_latency(start.elapsed().as_secs_f64());
        if !failures.is_empty() {
            self.metrics.inc_dispatch_errors(failures.len() as u64);
            warn!(
                pod = %request.pod_meta.name,
                failed_plugins = failures.len(),
                "Hook dispatch completed with plugin failures"
            );
        }

        (response, failures)
    }

    /// Run every registered plugin against one context, collecting
    /// failures instead of stopping at the first.
    pub fn run_chain(&self, ctx: &mut dyn ResourceContext) -> Vec<PluginFailure> {
        let mut failures = Vec::new();
        for plugin in &self.plugins {
            if let Err(error) = plugin.compute(ctx) {
                warn!(
                    plugin = plugin.name(),
                    cgroup = ctx.cgroup_path(),
                    error = %error,
                    "Hook plugin failed"
                );
                failures.push(PluginFailure {
                    plugin: plugin.name(),
                    error,
                });
            }
        }
        failures
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}
