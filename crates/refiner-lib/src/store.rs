//! Entity store for observed nodes and pods
//!
//! Lifecycle callbacks from the watchers and node-state updates from the
//! drainer all go through a single lock, and each tick reads nodes, pods and
//! drain timestamps under one read guard so the snapshot is consistent.

use crate::models::{pod_key, NodeRecord, PodRecord, Resources, Utilization};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Timestamps consulted by the drain gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainState {
    /// Creation time of the newest node observed
    pub last_node_addition: Option<DateTime<Utc>>,
    /// Start of the most recent scale-down attempt
    pub last_scale_down: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    nodes: BTreeMap<String, NodeRecord>,
    pods: BTreeMap<String, PodRecord>,
    drain_state: DrainState,
}

impl StoreInner {
    fn observe_addition(&mut self, node: &NodeRecord) {
        let newer = self
            .drain_state
            .last_node_addition
            .map_or(true, |last| last < node.created_at);
        if newer {
            info!(
                node = %node.name,
                creation_timestamp = %node.created_at,
                "Updated the newest node addition time"
            );
            self.drain_state.last_node_addition = Some(node.created_at);
        }
    }

    fn insert_node(&mut self, mut node: NodeRecord) {
        node.pods.clear();
        node.requested = Resources::default();
        node.utilization = Utilization::default();
        self.observe_addition(&node);
        self.nodes.insert(node.name.clone(), node);
    }
}

/// Shared handle to the node and pod maps
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_node_added(&self, node: NodeRecord) {
        debug!(node = %node.name, "Node added");
        self.inner.write().await.insert_node(node);
    }

    /// Replace a node record if a relevant field changed
    ///
    /// Returns true when the stored record was replaced. Unknown nodes are
    /// treated as additions.
    pub async fn on_node_updated(&self, node: NodeRecord) -> bool {
        let mut inner = self.inner.write().await;
        let changed = inner
            .nodes
            .get(&node.name)
            .map_or(true, |existing| existing.has_relevant_change(&node));
        if changed {
            info!(node = %node.name, "Update took place for node");
            inner.insert_node(node);
        }
        changed
    }

    pub async fn on_node_deleted(&self, name: &str) -> Option<NodeRecord> {
        info!(node = %name, "Node was deleted");
        self.inner.write().await.nodes.remove(name)
    }

    pub async fn on_pod_added(&self, pod: PodRecord) {
        self.inner.write().await.pods.insert(pod.key(), pod);
    }

    /// Replace a pod record if its container count or node changed
    pub async fn on_pod_updated(&self, pod: PodRecord) -> bool {
        let mut inner = self.inner.write().await;
        let key = pod.key();
        let changed = inner
            .pods
            .get(&key)
            .map_or(true, |existing| existing.has_relevant_change(&pod));
        if changed {
            inner.pods.insert(key, pod);
        }
        changed
    }

    pub async fn on_pod_deleted(&self, namespace: &str, name: &str) -> Option<PodRecord> {
        self.inner.write().await.pods.remove(&pod_key(namespace, name))
    }

    /// Replace the node set after a watch restart
    pub async fn reconcile_nodes(&self, nodes: Vec<NodeRecord>) {
        let mut inner = self.inner.write().await;
        let seen: HashSet<String> = nodes.iter().map(|n| n.name.clone()).collect();
        inner.nodes.retain(|name, _| seen.contains(name));
        for node in nodes {
            let replace = inner
                .nodes
                .get(&node.name)
                .map_or(true, |existing| existing.has_relevant_change(&node));
            if replace {
                inner.insert_node(node);
            }
        }
        debug!(nodes = inner.nodes.len(), "Reconciled node records");
    }

    /// Replace the pod set after a watch restart
    pub async fn reconcile_pods(&self, pods: Vec<PodRecord>) {
        let mut inner = self.inner.write().await;
        inner.pods = pods.into_iter().map(|p| (p.key(), p)).collect();
        debug!(pods = inner.pods.len(), "Reconciled pod records");
    }

    /// Record a schedulable-flag change made by the drainer
    pub async fn set_unschedulable(&self, name: &str, unschedulable: bool) -> bool {
        let mut inner = self.inner.write().await;
        match inner.nodes.get(name) {
            Some(existing) => {
                let mut replacement = existing.clone();
                replacement.unschedulable = unschedulable;
                inner.nodes.insert(name.to_string(), replacement);
                true
            }
            None => false,
        }
    }

    pub async fn record_scale_down(&self, at: DateTime<Utc>) {
        self.inner.write().await.drain_state.last_scale_down = Some(at);
    }

    pub async fn drain_state(&self) -> DrainState {
        self.inner.read().await.drain_state
    }

    pub async fn contains_node(&self, name: &str) -> bool {
        self.inner.read().await.nodes.contains_key(name)
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    pub async fn pod_count(&self) -> usize {
        self.inner.read().await.pods.len()
    }

    /// Pods, optionally restricted to one namespace, in key order
    pub async fn pods(&self, namespace: Option<&str>) -> Vec<PodRecord> {
        self.inner
            .read()
            .await
            .pods
            .values()
            .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
            .cloned()
            .collect()
    }

    /// Node records with pods assigned and utilization scored
    ///
    /// Totals are rebuilt from the current pod map on every call. Pods bound
    /// to a node the store does not know about are left out. Nodes are
    /// returned in name order.
    pub async fn snapshot(&self) -> Vec<NodeRecord> {
        let inner = self.inner.read().await;

        let mut nodes: BTreeMap<&str, NodeRecord> = inner
            .nodes
            .iter()
            .map(|(name, node)| {
                let mut node = node.clone();
                node.pods.clear();
                (name.as_str(), node)
            })
            .collect();

        for pod in inner.pods.values() {
            if let Some(node) = pod.node_name.as_deref().and_then(|n| nodes.get_mut(n)) {
                node.pods.push(pod.clone());
            }
        }

        nodes
            .into_values()
            .map(|mut node| {
                node.requested = node.pods.iter().map(|p| p.requests).sum();
                node.utilization = Utilization::compute(&node.requested, &node.allocatable);
                node
            })
            .collect()
    }
}

/// Container images used by pods in `namespace`
pub fn images_in_namespace(pods: &[PodRecord], namespace: &str) -> Vec<String> {
    pods.iter()
        .filter(|p| p.namespace == namespace)
        .flat_map(|p| p.images.iter().cloned())
        .collect()
}
