//! Agent configuration

use anyhow::Result;
use serde::Deserialize;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics and hook dispatch
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Root of the cgroup hierarchy carrying the tuned knobs.
    /// For cgroup v1 this includes the subsystem directory.
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: String,

    /// Optional JSON file with QoS rule parameters, hot-reloaded on change
    #[serde(default)]
    pub rule_config_path: Option<String>,

    /// Reconciliation interval in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_cgroup_root() -> String {
    "/sys/fs/cgroup/cpu".to_string()
}

fn default_reconcile_interval() -> u64 {
    30
}

impl AgentConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| AgentConfig {
            node_name: default_node_name(),
            api_port: default_api_port(),
            cgroup_root: default_cgroup_root(),
            rule_config_path: None,
            reconcile_interval_secs: default_reconcile_interval(),
        }))
    }
}
