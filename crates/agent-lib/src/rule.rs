//! QoS parameter rules with lock-free hot swap
//!
//! A rule maps QoS classification to the value a plugin writes. Rules are
//! immutable once published: configuration changes build a fresh rule and
//! swap an atomic pointer, so the hook and reconciler paths always read a
//! complete, consistent rule without taking a lock.

use crate::models::{KubeQosTier, QosClass};
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Valid range for the group-identity knob.
const BVT_VALUE_MIN: i64 = -1;
const BVT_VALUE_MAX: i64 = 2;

/// Rule-building failures. A rejected rebuild leaves the previously
/// published rule active.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("value {value} for {key} outside [{BVT_VALUE_MIN}, {BVT_VALUE_MAX}]")]
    ValueOutOfRange { key: String, value: i64 },

    #[error("failed to read rule config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Group-identity parameters, the serialized payload of a
/// configuration-change notification.
///
/// Three maps cover the three target shapes: platform class for labeled
/// pods, tier defaults for unlabeled pods, and tier defaults for the QoS
/// root directories themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_class_params")]
    pub class_params: HashMap<QosClass, i64>,
    #[serde(default = "default_tier_pod_params")]
    pub tier_pod_params: HashMap<KubeQosTier, i64>,
    #[serde(default = "default_tier_dir_params")]
    pub tier_dir_params: HashMap<KubeQosTier, i64>,
}

fn default_class_params() -> HashMap<QosClass, i64> {
    HashMap::from([
        (QosClass::LatencySensitiveReserved, 2),
        (QosClass::LatencySensitive, 2),
        (QosClass::BestEffort, -1),
    ])
}

fn default_tier_pod_params() -> HashMap<KubeQosTier, i64> {
    HashMap::from([
        (KubeQosTier::Guaranteed, 2),
        (KubeQosTier::Burstable, 2),
        (KubeQosTier::BestEffort, -1),
    ])
}

fn default_tier_dir_params() -> HashMap<KubeQosTier, i64> {
    HashMap::from([
        (KubeQosTier::Guaranteed, 0),
        (KubeQosTier::Burstable, 2),
        (KubeQosTier::BestEffort, -1),
    ])
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            class_params: default_class_params(),
            tier_pod_params: default_tier_pod_params(),
            tier_dir_params: default_tier_dir_params(),
        }
    }
}

impl RuleConfig {
    /// Load a rule config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<RuleConfig, RuleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RuleError::ReadConfig {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| RuleError::ParseConfig {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Immutable, fully-built group-identity rule.
#[derive(Debug, Clone, PartialEq)]
pub struct BvtRule {
    class_params: HashMap<QosClass, i64>,
    tier_pod_params: HashMap<KubeQosTier, i64>,
    tier_dir_params: HashMap<KubeQosTier, i64>,
}

impl BvtRule {
    /// Validate a config and build the rule. Pure: no I/O, no publication.
    pub fn from_config(config: &RuleConfig) -> Result<BvtRule, RuleError> {
        for (class, value) in &config.class_params {
            validate_value(class.as_str(), *value)?;
        }
        for (tier, value) in config
            .tier_pod_params
            .iter()
            .chain(config.tier_dir_params.iter())
        {
            validate_value(tier.as_str(), *value)?;
        }

        Ok(BvtRule {
            class_params: config.class_params.clone(),
            tier_pod_params: config.tier_pod_params.clone(),
            tier_dir_params: config.tier_dir_params.clone(),
        })
    }

    /// Value for a platform-classed pod, if the class has a parameter.
    pub fn value_for_class(&self, class: QosClass) -> Option<i64> {
        self.class_params.get(&class).copied()
    }

    /// Default value for an unlabeled pod of the given tier.
    pub fn value_for_tier_pod(&self, tier: KubeQosTier) -> Option<i64> {
        self.tier_pod_params.get(&tier).copied()
    }

    /// Value for the tier's root directory.
    pub fn value_for_tier_dir(&self, tier: KubeQosTier) -> Option<i64> {
        self.tier_dir_params.get(&tier).copied()
    }
}

impl Default for BvtRule {
    fn default() -> Self {
        // The default config is within range by construction.
        Self::from_config(&RuleConfig::default()).unwrap_or(BvtRule {
            class_params: HashMap::new(),
            tier_pod_params: HashMap::new(),
            tier_dir_params: HashMap::new(),
        })
    }
}

fn validate_value(key: &str, value: i64) -> Result<(), RuleError> {
    if !(BVT_VALUE_MIN..=BVT_VALUE_MAX).contains(&value) {
        return Err(RuleError::ValueOutOfRange {
            key: key.to_string(),
            value,
        });
    }
    Ok(())
}

/// Holds the current rule behind an atomic pointer.
///
/// Readers (`current`) never block. Rebuilds are serialized among
/// themselves; with concurrent rebuilds the last writer wins, which is
/// acceptable since every candidate rule is internally consistent.
pub struct RuleStore {
    current: ArcSwap<BvtRule>,
    rebuild_lock: Mutex<()>,
}

impl RuleStore {
    /// Create a store publishing the built-in default rule.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(BvtRule::default()),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Latest published rule. Lock-free, safe on the dispatch hot path.
    pub fn current(&self) -> Arc<BvtRule> {
        self.current.load_full()
    }

    /// Validate, build, and atomically publish a new rule.
    ///
    /// On validation failure nothing is published and the previous rule
    /// stays active.
    pub fn rebuild(&self, config: &RuleConfig) -> Result<Arc<BvtRule>, RuleError> {
        let _serialized = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let rule = Arc::new(BvtRule::from_config(config)?);
        self.current.store(rule.clone());
        info!("Published rebuilt QoS rule");
        Ok(rule)
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a filesystem watcher and its processing task alive.
///
/// Dropping the handle stops watching.
pub struct RuleWatchHandle {
    _watcher: RecommendedWatcher,
    _task: tokio::task::JoinHandle<()>,
}

/// Watch a rule-config file and rebuild the store on every change.
///
/// A config that fails to parse or validate is rejected with a warning and
/// the active rule is left untouched.
pub fn watch_rule_file(
    path: impl Into<PathBuf>,
    store: Arc<RuleStore>,
) -> anyhow::Result<RuleWatchHandle> {
    let path = path.into();
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&path, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "Watching rule config file");

    let task = tokio::task::spawn_blocking(move || {
        while let Ok(event) = rx.recv() {
            if !event.kind.is_modify() && !event.kind.is_create() {
                continue;
            }
            match RuleConfig::from_file(&path) {
                Ok(config) => match store.rebuild(&config) {
                    Ok(_) => info!(path = %path.display(), "Reloaded rule config"),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e,
                            "Rejected rule config, keeping previous rule");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e,
                        "Failed to load rule config, keeping previous rule");
                }
            }
        }
    });

    Ok(RuleWatchHandle {
        _watcher: watcher,
        _task: task,
    })
}
