//! Cluster API seam used by the drain protocol

use crate::models::{NodeRecord, PodIdentity};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("request throttled: {0}")]
    Throttled(String),
    #[error("cluster api error: {0}")]
    Api(String),
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::NotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, ApiError::Throttled(_))
    }
}

/// Operations the drainer needs from the cluster
///
/// `evict_pod` returning `Ok` means the eviction was accepted; throttling
/// and a missing pod are reported as [`ApiError::Throttled`] and
/// [`ApiError::NotFound`].
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, ApiError>;

    async fn patch_node_schedulable(&self, name: &str, unschedulable: bool)
        -> Result<(), ApiError>;

    async fn list_pods_on_node(&self, name: &str) -> Result<Vec<PodIdentity>, ApiError>;

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ApiError>;

    async fn get_pod_identity(&self, namespace: &str, name: &str)
        -> Result<PodIdentity, ApiError>;
}
