//! Dual-origin request/response carriers for hook plugins
//!
//! Plugins see one abstract surface (`ResourceContext`) regardless of
//! whether the invocation came from an intercepted lifecycle request or
//! from a reconciliation scan. Origin only decides how a computed value is
//! delivered: the proxy context stages it into the outbound response for
//! the runtime to apply, the reconciler context writes it straight through
//! the cgroup accessor.

use crate::cgroup::{CgroupAccessor, CgroupError, CgroupKnob, WriteOutcome};
use crate::models::{HookRequest, HookResponse, KubeQosTier, QosClass};
use std::collections::HashMap;
use std::sync::Arc;

/// What kind of cgroup directory an invocation targets.
///
/// Tier root directories take different default parameters than pod
/// directories, so plugins need to know which one they are tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A pod's cgroup directory
    Pod,
    /// A kube-QoS tier root directory (kubepods, burstable, besteffort)
    TierRoot,
}

/// Read/mutate surface exposed to plugins.
///
/// Implementations must make `set_value` deliver the same effective value
/// for equivalent resolved inputs; plugins never branch on origin.
pub trait ResourceContext {
    /// Platform QoS class, if one was resolvable from labels.
    fn qos_class(&self) -> Option<QosClass>;

    /// Kubernetes-native QoS tier of the target.
    fn qos_tier(&self) -> KubeQosTier;

    /// Relative cgroup path of the target.
    fn cgroup_path(&self) -> &str;

    /// Whether the target is a pod directory or a tier root.
    fn target_kind(&self) -> TargetKind;

    /// Deliver a computed knob value.
    fn set_value(&mut self, knob: CgroupKnob, value: i64) -> Result<(), CgroupError>;
}

/// Proxy-origin context built from an intercepted lifecycle request.
///
/// Values are staged; the runtime applies them after dispatch returns.
#[derive(Debug)]
pub struct PodContext {
    qos_class: Option<QosClass>,
    qos_tier: KubeQosTier,
    cgroup_parent: String,
    staged: HashMap<CgroupKnob, i64>,
}

impl PodContext {
    /// Parse an inbound request: tier from the declared cgroup parent,
    /// class from the pod labels if present.
    pub fn from_request(request: &HookRequest) -> PodContext {
        PodContext {
            qos_class: QosClass::from_labels(&request.labels),
            qos_tier: KubeQosTier::from_cgroup_parent(&request.cgroup_parent),
            cgroup_parent: request.cgroup_parent.clone(),
            staged: HashMap::new(),
        }
    }

    /// Copy staged values into the outbound response.
    pub fn finish(&self, response: &mut HookResponse) {
        for (knob, value) in &self.staged {
            response.resources.insert(*knob, *value);
        }
    }

    /// Staged value for a knob, if any plugin set one.
    pub fn staged(&self, knob: CgroupKnob) -> Option<i64> {
        self.staged.get(&knob).copied()
    }
}

impl ResourceContext for PodContext {
    fn qos_class(&self) -> Option<QosClass> {
        self.qos_class
    }

    fn qos_tier(&self) -> KubeQosTier {
        self.qos_tier
    }

    fn cgroup_path(&self) -> &str {
        &self.cgroup_parent
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::Pod
    }

    fn set_value(&mut self, knob: CgroupKnob, value: i64) -> Result<(), CgroupError> {
        self.staged.insert(knob, value);
        Ok(())
    }
}

/// Reconciler-origin context for a resolved on-disk target.
///
/// Writes go straight through the accessor; completion is a no-op. The
/// recorded outcomes let the caller classify drift corrections.
pub struct ReconcilerContext {
    qos_class: Option<QosClass>,
    qos_tier: KubeQosTier,
    cgroup_path: String,
    target_kind: TargetKind,
    accessor: Arc<dyn CgroupAccessor>,
    outcomes: Vec<(CgroupKnob, WriteOutcome)>,
}

impl ReconcilerContext {
    /// Context for a kube-QoS tier root directory.
    pub fn for_tier_root(tier: KubeQosTier, accessor: Arc<dyn CgroupAccessor>) -> Self {
        Self {
            qos_class: None,
            qos_tier: tier,
            cgroup_path: tier.cgroup_dir().to_string(),
            target_kind: TargetKind::TierRoot,
            accessor,
            outcomes: Vec::new(),
        }
    }

    /// Context for a live pod's cgroup directory.
    pub fn for_pod(
        qos_class: Option<QosClass>,
        cgroup_path: impl Into<String>,
        accessor: Arc<dyn CgroupAccessor>,
    ) -> Self {
        let cgroup_path = cgroup_path.into();
        Self {
            qos_class,
            qos_tier: KubeQosTier::from_cgroup_parent(&cgroup_path),
            target_kind: TargetKind::Pod,
            cgroup_path,
            accessor,
            outcomes: Vec::new(),
        }
    }

    /// Writes already happened; nothing to flush.
    pub fn finish(&self) {}

    /// How many writes actually changed an on-disk value.
    pub fn corrections(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, WriteOutcome::Changed { .. }))
            .count()
    }

    /// Write outcomes recorded so far, in delivery order.
    pub fn outcomes(&self) -> &[(CgroupKnob, WriteOutcome)] {
        &self.outcomes
    }
}

impl ResourceContext for ReconcilerContext {
    fn qos_class(&self) -> Option<QosClass> {
        self.qos_class
    }

    fn qos_tier(&self) -> KubeQosTier {
        self.qos_tier
    }

    fn cgroup_path(&self) -> &str {
        &self.cgroup_path
    }

    fn target_kind(&self) -> TargetKind {
        self.target_kind
    }

    fn set_value(&mut self, knob: CgroupKnob, value: i64) -> Result<(), CgroupError> {
        let outcome = self
            .accessor
            .write(&self.cgroup_path, knob, &value.to_string())?;
        self.outcomes.push((knob, outcome));
        Ok(())
    }
}
