//! Kernel capability probing
//!
//! Not every kernel or cgroup driver exposes the knobs this agent tunes.
//! The probe checks once per knob whether the control file is present at
//! the kubepods root and caches the verdict; an unsupported knob turns the
//! owning plugin into a no-op instead of an error source.

use crate::cgroup::{CgroupAccessor, CgroupKnob};
use crate::models::KubeQosTier;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Cached per-knob capability state.
///
/// A missing cache entry means "unknown"; the first `is_supported` call
/// resolves it against the filesystem. Probe failures (including plain
/// absence of the file) resolve to unsupported rather than surfacing an
/// error, so a diagnostic feature can never block container startup.
pub struct CapabilityProbe {
    accessor: Arc<dyn CgroupAccessor>,
    cache: DashMap<CgroupKnob, bool>,
}

impl CapabilityProbe {
    pub fn new(accessor: Arc<dyn CgroupAccessor>) -> Self {
        Self {
            accessor,
            cache: DashMap::new(),
        }
    }

    /// Whether the host exposes the given knob. Probes on first call,
    /// cached afterwards.
    pub fn is_supported(&self, knob: CgroupKnob) -> bool {
        if let Some(cached) = self.cache.get(&knob) {
            return *cached;
        }

        let supported = self
            .accessor
            .knob_exists(KubeQosTier::Guaranteed.cgroup_dir(), knob);
        info!(
            knob = knob.file_name(),
            supported, "Resolved kernel capability"
        );
        self.cache.insert(knob, supported);
        supported
    }

    /// Forget a cached verdict so the next call reprobes. Test hook, also
    /// usable after a detected environment change.
    pub fn reset(&self, knob: CgroupKnob) {
        self.cache.remove(&knob);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::{CgroupError, WriteOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accessor stub that counts existence probes
    struct CountingAccessor {
        present: bool,
        probes: AtomicUsize,
    }

    impl CountingAccessor {
        fn new(present: bool) -> Self {
            Self {
                present,
                probes: AtomicUsize::new(0),
            }
        }
    }

    impl CgroupAccessor for CountingAccessor {
        fn read(&self, _path: &str, _knob: CgroupKnob) -> Result<String, CgroupError> {
            unimplemented!("probe never reads")
        }

        fn write(
            &self,
            _path: &str,
            _knob: CgroupKnob,
            _value: &str,
        ) -> Result<WriteOutcome, CgroupError> {
            unimplemented!("probe never writes")
        }

        fn knob_exists(&self, _path: &str, _knob: CgroupKnob) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.present
        }

        fn path_exists(&self, _path: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_probe_caches_supported() {
        let accessor = Arc::new(CountingAccessor::new(true));
        let probe = CapabilityProbe::new(accessor.clone());

        assert!(probe.is_supported(CgroupKnob::CpuBvtWarpNs));
        assert!(probe.is_supported(CgroupKnob::CpuBvtWarpNs));
        assert_eq!(accessor.probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_caches_unsupported() {
        let accessor = Arc::new(CountingAccessor::new(false));
        let probe = CapabilityProbe::new(accessor.clone());

        assert!(!probe.is_supported(CgroupKnob::CpuBvtWarpNs));
        assert!(!probe.is_supported(CgroupKnob::CpuBvtWarpNs));
        assert_eq!(accessor.probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_triggers_reprobe() {
        let accessor = Arc::new(CountingAccessor::new(true));
        let probe = CapabilityProbe::new(accessor.clone());

        probe.is_supported(CgroupKnob::CpuBvtWarpNs);
        probe.reset(CgroupKnob::CpuBvtWarpNs);
        probe.is_supported(CgroupKnob::CpuBvtWarpNs);
        assert_eq!(accessor.probes.load(Ordering::SeqCst), 2);
    }
}
