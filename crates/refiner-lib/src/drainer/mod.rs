//! Node drain protocol
//!
//! A scale-down moves one node through
//! `Schedulable -> Cordoned -> Draining -> Drained | DrainFailed`, and a
//! failed drain is rolled back to `Uncordoned`. Evictions run as one task
//! per pod sharing a cancellation signal and a completion channel.

mod api;
mod kube_api;
mod protocol;

#[cfg(test)]
mod tests;

pub use api::{ApiError, ClusterApi};
pub use kube_api::KubeClusterApi;
pub use protocol::{
    effective_grace_period, CordonDrainer, DrainError, DrainOutcome, DrainPhase, DrainReport,
    ProtocolTiming, DELETION_POLL_INTERVAL, THROTTLE_RETRY_INTERVAL,
};
