//! Node refiner library
//!
//! This crate provides the core functionality for:
//! - Scoring node utilization from pod requests
//! - Estimating excess cluster capacity
//! - Deciding when a node may be drained
//! - Cordoning, draining and rolling back nodes
//! - Watching nodes, pods and the policy ConfigMap
//! - Health checks and observability

pub mod cluster;
pub mod controller;
pub mod drainer;
pub mod format;
pub mod gate;
pub mod health;
pub mod informer;
pub mod models;
pub mod observability;
pub mod policy;
pub mod quantity;
pub mod selector;
pub mod store;
pub mod utilization;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{excess_nodes, ClusterSnapshot};
pub use controller::{RefinerController, TickDecision, TickSummary};
pub use drainer::{
    ApiError, ClusterApi, CordonDrainer, DrainError, DrainOutcome, DrainPhase, DrainReport,
    KubeClusterApi,
};
pub use gate::{DenyReason, GateDecision};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, LivenessResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{RefinerMetrics, StructuredLogger};
pub use policy::{ConfigError, DrainerPolicy, PolicyStore};
pub use selector::{select_candidate, SelectionError};
pub use store::{DrainState, EntityStore};
