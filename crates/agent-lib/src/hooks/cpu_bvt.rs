//! Group-identity (cpu.bvt_warpns) hook plugin
//!
//! Biases the CPU scheduler for or against a cgroup: positive values favor
//! latency-sensitive workloads, -1 marks best-effort groups as reclaimable.
//! On kernels without the knob the plugin degrades to a no-op.

use super::{HookError, HookPlugin};
use crate::cgroup::CgroupKnob;
use crate::models::QosClass;
use crate::probe::CapabilityProbe;
use crate::protocol::{ResourceContext, TargetKind};
use crate::rule::{BvtRule, RuleStore};
use std::sync::Arc;
use tracing::debug;

pub const PLUGIN_NAME: &str = "cpu-bvt";

/// Reference knob plugin: resolves a group-identity value from the current
/// rule and delivers it through the context.
pub struct CpuBvtPlugin {
    rule_store: Arc<RuleStore>,
    probe: Arc<CapabilityProbe>,
}

impl CpuBvtPlugin {
    pub fn new(rule_store: Arc<RuleStore>, probe: Arc<CapabilityProbe>) -> Self {
        Self { rule_store, probe }
    }
}

impl HookPlugin for CpuBvtPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn compute(&self, ctx: &mut dyn ResourceContext) -> Result<(), HookError> {
        if !self.probe.is_supported(CgroupKnob::CpuBvtWarpNs) {
            return Ok(());
        }

        let rule = self.rule_store.current();
        let value = match resolve_value(&rule, ctx.qos_class(), ctx) {
            Some(value) => value,
            None => {
                debug!(cgroup = ctx.cgroup_path(), "No bvt value for target, skipping");
                return Ok(());
            }
        };

        ctx.set_value(CgroupKnob::CpuBvtWarpNs, value)?;
        Ok(())
    }
}

/// Value resolution precedence: the platform class label is the more
/// specific signal and wins over the Kubernetes-native tier. System-class
/// pods are never tuned. A missing or unparameterized class falls through
/// to the tier default for the target kind.
fn resolve_value(
    rule: &BvtRule,
    class: Option<QosClass>,
    ctx: &dyn ResourceContext,
) -> Option<i64> {
    if class == Some(QosClass::System) {
        return None;
    }
    if let Some(value) = class.and_then(|c| rule.value_for_class(c)) {
        return Some(value);
    }
    match ctx.target_kind() {
        TargetKind::Pod => rule.value_for_tier_pod(ctx.qos_tier()),
        TargetKind::TierRoot => rule.value_for_tier_dir(ctx.qos_tier()),
    }
}
