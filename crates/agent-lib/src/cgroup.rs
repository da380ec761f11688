//! Cgroup control-file access
//!
//! Thin wrapper over the cgroup filesystem used by both hook paths.
//! Writes are read-compared first so callers can distinguish a drift
//! correction from a no-op re-apply.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A kernel knob this agent knows how to tune.
///
/// Each variant maps to exactly one control file; plugins are expected to
/// own disjoint knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CgroupKnob {
    /// Group-identity scheduling bias (Anolis/Alibaba Cloud Linux kernels)
    #[serde(rename = "cpu.bvt_warpns")]
    CpuBvtWarpNs,
}

impl CgroupKnob {
    /// Control-file name inside a cgroup directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            CgroupKnob::CpuBvtWarpNs => "cpu.bvt_warpns",
        }
    }
}

/// Outcome of a knob write, used to classify drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The on-disk value differed and was corrected.
    Changed { previous: String },
    /// The on-disk value already matched.
    Unchanged,
}

/// Errors raised by cgroup filesystem access.
#[derive(Debug, thiserror::Error)]
pub enum CgroupError {
    #[error("cgroup path not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CgroupError {
    fn from_io(path: PathBuf, source: io::Error) -> CgroupError {
        if source.kind() == io::ErrorKind::NotFound {
            CgroupError::NotFound(path)
        } else {
            CgroupError::Io { path, source }
        }
    }
}

/// Access surface over the cgroup filesystem.
///
/// Paths are relative to the mounted hierarchy root (e.g.
/// "kubepods/besteffort/pod1234"). All writes are local and fast but still
/// fallible: a pod can disappear between enumeration and write.
pub trait CgroupAccessor: Send + Sync {
    /// Read the current value of a knob, trimmed.
    fn read(&self, cgroup_path: &str, knob: CgroupKnob) -> Result<String, CgroupError>;

    /// Write a knob value, reporting whether anything actually changed.
    fn write(&self, cgroup_path: &str, knob: CgroupKnob, value: &str)
        -> Result<WriteOutcome, CgroupError>;

    /// Whether the knob's control file exists under the given path.
    fn knob_exists(&self, cgroup_path: &str, knob: CgroupKnob) -> bool;

    /// Whether the cgroup directory itself exists.
    fn path_exists(&self, cgroup_path: &str) -> bool;
}

/// Filesystem-backed accessor rooted at a cgroup hierarchy mount.
///
/// For cgroup v1 the root includes the subsystem, e.g. "/sys/fs/cgroup/cpu".
/// Tests point the root at a temporary directory instead.
pub struct FsCgroupAccessor {
    cgroup_root: PathBuf,
}

impl FsCgroupAccessor {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Build the absolute control-file path for a relative cgroup path.
    fn knob_path(&self, cgroup_path: &str, knob: CgroupKnob) -> PathBuf {
        self.dir_path(cgroup_path).join(knob.file_name())
    }

    fn dir_path(&self, cgroup_path: &str) -> PathBuf {
        self.cgroup_root.join(cgroup_path.trim_matches('/'))
    }
}

impl CgroupAccessor for FsCgroupAccessor {
    fn read(&self, cgroup_path: &str, knob: CgroupKnob) -> Result<String, CgroupError> {
        let path = self.knob_path(cgroup_path, knob);
        let content =
            fs::read_to_string(&path).map_err(|e| CgroupError::from_io(path.clone(), e))?;
        Ok(content.trim().to_string())
    }

    fn write(
        &self,
        cgroup_path: &str,
        knob: CgroupKnob,
        value: &str,
    ) -> Result<WriteOutcome, CgroupError> {
        let current = self.read(cgroup_path, knob)?;
        if current == value {
            return Ok(WriteOutcome::Unchanged);
        }

        let path = self.knob_path(cgroup_path, knob);
        fs::write(&path, value).map_err(|e| CgroupError::from_io(path.clone(), e))?;
        Ok(WriteOutcome::Changed { previous: current })
    }

    fn knob_exists(&self, cgroup_path: &str, knob: CgroupKnob) -> bool {
        self.knob_path(cgroup_path, knob).exists()
    }

    fn path_exists(&self, cgroup_path: &str) -> bool {
        self.dir_path(cgroup_path).is_dir()
    }
}

/// Create a knob file with an initial value, building parent directories.
///
/// Test helper for assembling fake cgroup hierarchies; also used at startup
/// probes in environments where the hierarchy is pre-created.
pub fn init_knob_file(root: &Path, cgroup_path: &str, knob: CgroupKnob, value: &str)
    -> io::Result<()> {
    let dir = root.join(cgroup_path.trim_matches('/'));
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(knob.file_name()), value)
}
