//! Agent library for node-level QoS cgroup enforcement
//!
//! This crate provides the core functionality for:
//! - Runtime hook dispatch on container lifecycle events
//! - Periodic reconciliation of QoS cgroup parameters
//! - Lock-free rule storage with hot reload
//! - Kernel capability probing
//! - Health checks and observability

pub mod cgroup;
pub mod health;
pub mod hooks;
pub mod models;
pub mod observability;
pub mod probe;
pub mod protocol;
pub mod reconciler;
pub mod rule;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, EventLogger};
