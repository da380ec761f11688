//! Core data models for the QoS hook agent

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pod label carrying the platform QoS class.
pub const POD_QOS_CLASS_LABEL: &str = "colocation.qos/pod-class";

/// Platform-level QoS class attached to a pod via labels.
///
/// This is orthogonal to the Kubernetes-native QoS tier: the platform can
/// mark a burstable pod as latency-sensitive, or a guaranteed pod as
/// best-effort for colocation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QosClass {
    /// Latency-sensitive with reserved resources
    #[serde(rename = "LSR")]
    LatencySensitiveReserved,
    /// Latency-sensitive
    #[serde(rename = "LS")]
    LatencySensitive,
    /// Best-effort, first to be throttled
    #[serde(rename = "BE")]
    BestEffort,
    /// Node system daemons, never tuned by hooks
    #[serde(rename = "SYSTEM")]
    System,
}

impl QosClass {
    /// Parse a label value into a QoS class.
    ///
    /// Unknown or empty values resolve to `None` so callers fall back to
    /// the Kubernetes-native tier.
    pub fn from_label_value(value: &str) -> Option<QosClass> {
        match value {
            "LSR" => Some(QosClass::LatencySensitiveReserved),
            "LS" => Some(QosClass::LatencySensitive),
            "BE" => Some(QosClass::BestEffort),
            "SYSTEM" => Some(QosClass::System),
            _ => None,
        }
    }

    /// Resolve the QoS class from a pod label map.
    pub fn from_labels(labels: &HashMap<String, String>) -> Option<QosClass> {
        labels
            .get(POD_QOS_CLASS_LABEL)
            .and_then(|v| Self::from_label_value(v))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QosClass::LatencySensitiveReserved => "LSR",
            QosClass::LatencySensitive => "LS",
            QosClass::BestEffort => "BE",
            QosClass::System => "SYSTEM",
        }
    }
}

/// Kubernetes-native QoS tier derived from resource requests/limits.
///
/// The kubelet encodes the tier in the pod's cgroup parent: best-effort and
/// burstable pods live under a tier subdirectory, guaranteed pods directly
/// under the kubepods root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KubeQosTier {
    Guaranteed,
    Burstable,
    BestEffort,
}

impl KubeQosTier {
    /// Classify a declared cgroup-parent path by segment inspection.
    ///
    /// Handles both the cgroupfs driver ("kubepods/besteffort/pod<uid>")
    /// and the systemd driver ("kubepods-besteffort.slice/...") naming.
    pub fn from_cgroup_parent(cgroup_parent: &str) -> KubeQosTier {
        if cgroup_parent.contains("besteffort") {
            KubeQosTier::BestEffort
        } else if cgroup_parent.contains("burstable") {
            KubeQosTier::Burstable
        } else {
            KubeQosTier::Guaranteed
        }
    }

    /// Relative cgroup directory for this tier under the cgroup root.
    pub fn cgroup_dir(&self) -> &'static str {
        match self {
            KubeQosTier::Guaranteed => "kubepods",
            KubeQosTier::Burstable => "kubepods/burstable",
            KubeQosTier::BestEffort => "kubepods/besteffort",
        }
    }

    /// All tiers, in reconciliation order (parent directory first).
    pub fn all() -> [KubeQosTier; 3] {
        [
            KubeQosTier::Guaranteed,
            KubeQosTier::Burstable,
            KubeQosTier::BestEffort,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KubeQosTier::Guaranteed => "guaranteed",
            KubeQosTier::Burstable => "burstable",
            KubeQosTier::BestEffort => "besteffort",
        }
    }
}

/// Pod identity carried on a lifecycle request, used for logging only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

/// Inbound container-lifecycle request intercepted before the runtime
/// finalizes pod sandbox creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookRequest {
    #[serde(default)]
    pub pod_meta: PodMeta,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub cgroup_parent: String,
}

/// Outbound response applied by the runtime after dispatch returns.
///
/// Knob entries are sparse: a knob is present only if a plugin staged a
/// value for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResponse {
    #[serde(default)]
    pub resources: HashMap<crate::cgroup::CgroupKnob, i64>,
}

impl HookResponse {
    /// Staged group-identity value, if any plugin set one.
    pub fn cpu_bvt(&self) -> Option<i64> {
        self.resources
            .get(&crate::cgroup::CgroupKnob::CpuBvtWarpNs)
            .copied()
    }
}
