//! Periodic cgroup reconciliation
//!
//! The hook path only fires when the runtime creates a container. Values
//! drift anyway: a node reboot, a runtime restart, a manual echo into the
//! control file, or a rule change all leave cgroups stale. The reconciler
//! re-runs the identical plugin chain over every known target on a fixed
//! period and corrects whatever no longer matches the rule.

use crate::cgroup::{CgroupAccessor, CgroupError, WriteOutcome};
use crate::hooks::{HookDispatcher, HookError, PluginFailure};
use crate::models::{KubeQosTier, QosClass};
use crate::observability::{AgentMetrics, EventLogger};
use crate::protocol::{ReconcilerContext, ResourceContext};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// A live pod and its resolved cgroup directory, as reported by the
/// pod-state collaborator.
#[derive(Debug, Clone)]
pub struct PodCgroupRef {
    pub name: String,
    pub namespace: String,
    /// Relative cgroup path, e.g. "kubepods/besteffort/pod<uid>"
    pub cgroup_path: String,
    pub labels: HashMap<String, String>,
}

/// Enumerates currently known pods for the per-pod reconciliation pass.
#[async_trait]
pub trait PodStateProvider: Send + Sync {
    async fn list_pods(&self) -> Result<Vec<PodCgroupRef>>;
}

/// Pod enumeration by scanning the kubepods hierarchy on disk.
///
/// Used when no richer pod-state source is wired in; pods found this way
/// carry no labels, so class-based rules fall back to tier defaults.
pub struct FsPodScanner {
    cgroup_root: PathBuf,
}

impl FsPodScanner {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }
}

#[async_trait]
impl PodStateProvider for FsPodScanner {
    async fn list_pods(&self) -> Result<Vec<PodCgroupRef>> {
        let mut pods = Vec::new();
        for tier in KubeQosTier::all() {
            let dir = self.cgroup_root.join(tier.cgroup_dir());
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.starts_with("pod") || !entry.path().is_dir() {
                    continue;
                }
                pods.push(PodCgroupRef {
                    name: name.clone(),
                    namespace: String::new(),
                    cgroup_path: format!("{}/{}", tier.cgroup_dir(), name),
                    labels: HashMap::new(),
                });
            }
        }
        Ok(pods)
    }
}

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Tick period (default: 30 seconds)
    pub interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Counters for one reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Targets the chain actually ran against
    pub targets: usize,
    /// Writes that corrected drift
    pub corrected: usize,
    /// Writes that found the value already right
    pub unchanged: usize,
    /// Targets skipped because their cgroup path no longer exists
    pub skipped: usize,
    /// Plugin failures other than vanished targets
    pub errors: usize,
}

impl PassSummary {
    fn absorb(&mut self, ctx: &ReconcilerContext, failures: Vec<PluginFailure>) {
        self.targets += 1;
        let corrected = ctx.corrections();
        self.corrected += corrected;
        self.unchanged += ctx.outcomes().len() - corrected;
        for failure in failures {
            // A target that vanished between enumeration and write is a
            // skip, not a fault.
            match failure.error {
                HookError::Cgroup(CgroupError::NotFound(_)) => self.skipped += 1,
                _ => self.errors += 1,
            }
        }
    }
}

/// Periodic background task driving the plugin chain over on-disk targets.
pub struct ReconcilerLoop {
    dispatcher: Arc<HookDispatcher>,
    accessor: Arc<dyn CgroupAccessor>,
    pods: Arc<dyn PodStateProvider>,
    config: ReconcileConfig,
    metrics: AgentMetrics,
    logger: EventLogger,
}

impl ReconcilerLoop {
    pub fn new(
        dispatcher: Arc<HookDispatcher>,
        accessor: Arc<dyn CgroupAccessor>,
        pods: Arc<dyn PodStateProvider>,
        config: ReconcileConfig,
        metrics: AgentMetrics,
        logger: EventLogger,
    ) -> Self {
        Self {
            dispatcher,
            accessor,
            pods,
            config,
            metrics,
            logger,
        }
    }

    /// Run until the shutdown channel fires. Cancellation takes effect at
    /// the next tick boundary; an in-progress pass always completes.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            plugins = ?self.dispatcher.plugin_names(),
            "Starting reconciler loop"
        );

        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let summary = self.reconcile_pass().await;
                    let elapsed = start.elapsed();

                    self.metrics.observe_reconcile_latency(elapsed.as_secs_f64());
                    self.metrics.set_reconcile_targets(summary.targets as i64);

                    debug!(
                        targets = summary.targets,
                        corrected = summary.corrected,
                        unchanged = summary.unchanged,
                        skipped = summary.skipped,
                        errors = summary.errors,
                        elapsed_ms = elapsed.as_millis(),
                        "Reconcile pass complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciler loop");
                    break;
                }
            }
        }
    }

    /// One full pass: the fixed kube-QoS tier roots first, then every pod
    /// the collaborator knows about. Per-target failures never abort the
    /// pass.
    pub async fn reconcile_pass(&self) -> PassSummary {
        let mut summary = PassSummary::default();

        for tier in KubeQosTier::all() {
            if !self.accessor.path_exists(tier.cgroup_dir()) {
                summary.skipped += 1;
                continue;
            }
            let mut ctx = ReconcilerContext::for_tier_root(tier, self.accessor.clone());
            let failures = self.dispatcher.run_chain(&mut ctx);
            ctx.finish();
            self.record_corrections(&ctx);
            summary.absorb(&ctx, failures);
        }

        let pods = match self.pods.list_pods().await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate pods, reconciling tier roots only");
                self.metrics.inc_reconcile_errors(1);
                return summary;
            }
        };

        for pod in pods {
            if !self.accessor.path_exists(&pod.cgroup_path) {
                debug!(pod = %pod.name, cgroup = %pod.cgroup_path, "Pod cgroup gone, skipping");
                summary.skipped += 1;
                continue;
            }
            let class = QosClass::from_labels(&pod.labels);
            let mut ctx =
                ReconcilerContext::for_pod(class, pod.cgroup_path.clone(), self.accessor.clone());
            let failures = self.dispatcher.run_chain(&mut ctx);
            ctx.finish();
            self.record_corrections(&ctx);
            summary.absorb(&ctx, failures);
        }

        if summary.errors > 0 {
            self.metrics.inc_reconcile_errors(summary.errors as u64);
        }
        if summary.corrected > 0 {
            self.metrics.inc_drift_corrections(summary.corrected as u64);
        }
        summary
    }

    fn record_corrections(&self, ctx: &ReconcilerContext) {
        for (knob, outcome) in ctx.outcomes() {
            if let WriteOutcome::Changed { previous } = outcome {
                self.logger
                    .log_drift_correction(ctx.cgroup_path(), knob.file_name(), previous);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::{init_knob_file, CgroupKnob, FsCgroupAccessor};
    use crate::hooks::CpuBvtPlugin;
    use crate::probe::CapabilityProbe;
    use crate::rule::RuleStore;
    use tempfile::TempDir;

    struct StaticPods(Vec<PodCgroupRef>);

    #[async_trait]
    impl PodStateProvider for StaticPods {
        async fn list_pods(&self) -> Result<Vec<PodCgroupRef>> {
            Ok(self.0.clone())
        }
    }

    fn pod(name: &str, cgroup_path: &str, class: Option<&str>) -> PodCgroupRef {
        let mut labels = HashMap::new();
        if let Some(value) = class {
            labels.insert(
                crate::models::POD_QOS_CLASS_LABEL.to_string(),
                value.to_string(),
            );
        }
        PodCgroupRef {
            name: name.to_string(),
            namespace: "default".to_string(),
            cgroup_path: cgroup_path.to_string(),
            labels,
        }
    }

    fn build_loop(
        tmp: &TempDir,
        pods: Vec<PodCgroupRef>,
        config: ReconcileConfig,
    ) -> (Arc<FsCgroupAccessor>, ReconcilerLoop) {
        let accessor = Arc::new(FsCgroupAccessor::new(tmp.path()));
        let rule_store = Arc::new(RuleStore::new());
        let probe = Arc::new(CapabilityProbe::new(accessor.clone()));

        let mut dispatcher = HookDispatcher::new(AgentMetrics::new());
        dispatcher.register(Arc::new(CpuBvtPlugin::new(rule_store, probe)));

        let reconciler = ReconcilerLoop::new(
            Arc::new(dispatcher),
            accessor.clone(),
            Arc::new(StaticPods(pods)),
            config,
            AgentMetrics::new(),
            EventLogger::new("test-node"),
        );
        (accessor, reconciler)
    }

    fn seed_tier_roots(tmp: &TempDir) {
        for dir in ["kubepods", "kubepods/burstable", "kubepods/besteffort"] {
            init_knob_file(tmp.path(), dir, CgroupKnob::CpuBvtWarpNs, "0").unwrap();
        }
    }

    #[tokio::test]
    async fn test_pass_corrects_tier_roots_and_pods() {
        let tmp = TempDir::new().unwrap();
        seed_tier_roots(&tmp);
        init_knob_file(
            tmp.path(),
            "kubepods/besteffort/pod-c",
            CgroupKnob::CpuBvtWarpNs,
            "0",
        )
        .unwrap();

        let (accessor, reconciler) = build_loop(
            &tmp,
            vec![pod("pod-c", "kubepods/besteffort/pod-c", None)],
            ReconcileConfig::default(),
        );

        let summary = reconciler.reconcile_pass().await;
        assert_eq!(summary.targets, 4);
        assert_eq!(summary.errors, 0);
        // Guaranteed root already held its dir default of 0.
        assert_eq!(summary.corrected, 3);

        assert_eq!(
            accessor.read("kubepods", CgroupKnob::CpuBvtWarpNs).unwrap(),
            "0"
        );
        assert_eq!(
            accessor
                .read("kubepods/burstable", CgroupKnob::CpuBvtWarpNs)
                .unwrap(),
            "2"
        );
        assert_eq!(
            accessor
                .read("kubepods/besteffort/pod-c", CgroupKnob::CpuBvtWarpNs)
                .unwrap(),
            "-1"
        );
    }

    #[tokio::test]
    async fn test_second_pass_reports_no_drift() {
        let tmp = TempDir::new().unwrap();
        seed_tier_roots(&tmp);

        let (_accessor, reconciler) = build_loop(&tmp, vec![], ReconcileConfig::default());

        let first = reconciler.reconcile_pass().await;
        assert!(first.corrected > 0);

        let second = reconciler.reconcile_pass().await;
        assert_eq!(second.corrected, 0);
        assert_eq!(second.unchanged, first.corrected + first.unchanged);
    }

    #[tokio::test]
    async fn test_missing_pod_skipped_without_failing_tick() {
        let tmp = TempDir::new().unwrap();
        seed_tier_roots(&tmp);
        init_knob_file(
            tmp.path(),
            "kubepods/burstable/pod-alive",
            CgroupKnob::CpuBvtWarpNs,
            "0",
        )
        .unwrap();

        let (accessor, reconciler) = build_loop(
            &tmp,
            vec![
                pod("pod-gone", "kubepods/burstable/pod-gone", None),
                pod("pod-alive", "kubepods/burstable/pod-alive", None),
            ],
            ReconcileConfig::default(),
        );

        let summary = reconciler.reconcile_pass().await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(
            accessor
                .read("kubepods/burstable/pod-alive", CgroupKnob::CpuBvtWarpNs)
                .unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn test_pod_class_label_applied_on_reconcile() {
        let tmp = TempDir::new().unwrap();
        seed_tier_roots(&tmp);
        init_knob_file(
            tmp.path(),
            "kubepods/pod-lsr",
            CgroupKnob::CpuBvtWarpNs,
            "0",
        )
        .unwrap();

        let (accessor, reconciler) = build_loop(
            &tmp,
            vec![pod("pod-lsr", "kubepods/pod-lsr", Some("LSR"))],
            ReconcileConfig::default(),
        );

        reconciler.reconcile_pass().await;
        assert_eq!(
            accessor
                .read("kubepods/pod-lsr", CgroupKnob::CpuBvtWarpNs)
                .unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_at_tick_boundary() {
        let tmp = TempDir::new().unwrap();
        seed_tier_roots(&tmp);

        let (_accessor, reconciler) = build_loop(
            &tmp,
            vec![],
            ReconcileConfig {
                interval: Duration::from_millis(10),
            },
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(reconciler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exited after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_fs_pod_scanner_finds_pod_dirs() {
        let tmp = TempDir::new().unwrap();
        seed_tier_roots(&tmp);
        init_knob_file(
            tmp.path(),
            "kubepods/besteffort/pod-x",
            CgroupKnob::CpuBvtWarpNs,
            "0",
        )
        .unwrap();
        init_knob_file(
            tmp.path(),
            "kubepods/pod-y",
            CgroupKnob::CpuBvtWarpNs,
            "0",
        )
        .unwrap();

        let scanner = FsPodScanner::new(tmp.path());
        let mut pods = scanner.list_pods().await.unwrap();
        pods.sort_by(|a, b| a.name.cmp(&b.name));

        let paths: Vec<_> = pods.iter().map(|p| p.cgroup_path.as_str()).collect();
        assert_eq!(paths, vec!["kubepods/besteffort/pod-x", "kubepods/pod-y"]);
    }
}
