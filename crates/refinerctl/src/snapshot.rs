//! One-shot view of the live cluster
//!
//! Lists nodes and active pods once, converts them with the same rules the
//! watchers use, and loads them into a fresh [`EntityStore`].

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kube::api::ListParams;
use kube::{Api, Client};
use refiner_lib::informer::{convert, ACTIVE_POD_SELECTOR};
use refiner_lib::{DrainerPolicy, EntityStore, NodeRecord, PodRecord, PolicyStore};

use crate::output::print_warning;

pub struct ClusterView {
    pub store: EntityStore,
    /// Scored nodes in name order
    pub nodes: Vec<NodeRecord>,
}

impl ClusterView {
    pub async fn load(client: &Client) -> Result<Self> {
        let nodes: Api<Node> = Api::all(client.clone());
        let node_list = nodes
            .list(&ListParams::default())
            .await
            .context("Failed to list nodes")?;

        let pods: Api<Pod> = Api::all(client.clone());
        let pod_list = pods
            .list(&ListParams::default().fields(ACTIVE_POD_SELECTOR))
            .await
            .context("Failed to list pods")?;

        let node_records: Vec<NodeRecord> = node_list
            .items
            .iter()
            .filter_map(|node| match convert::node_record(node) {
                Ok(record) => Some(record),
                Err(e) => {
                    print_warning(&format!("Skipping node: {}", e));
                    None
                }
            })
            .collect();

        let pod_records: Vec<PodRecord> = pod_list
            .items
            .iter()
            .filter(|pod| !convert::is_terminal_phase(pod_phase(pod)))
            .filter_map(|pod| convert::pod_record(pod).ok())
            .collect();

        let store = EntityStore::new();
        store.reconcile_nodes(node_records).await;
        store.reconcile_pods(pod_records).await;
        let nodes = store.snapshot().await;

        Ok(Self { store, nodes })
    }

    pub async fn pods(&self, namespace: Option<&str>) -> Vec<PodRecord> {
        self.store.pods(namespace).await
    }
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Current drainer policy as the service would read it
///
/// A missing ConfigMap means defaults. Fields that fail to parse keep their
/// default and are reported as a warning.
pub async fn load_policy(client: &Client, namespace: &str, name: &str) -> Result<DrainerPolicy> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let configmap = configmaps
        .get_opt(name)
        .await
        .with_context(|| format!("Failed to read ConfigMap {}/{}", namespace, name))?;

    let policy = PolicyStore::default();
    match configmap {
        Some(configmap) => {
            let data = configmap.data.unwrap_or_default();
            if let Err(e) = policy.apply(&data).await {
                print_warning(&e.to_string());
            }
        }
        None => print_warning(&format!(
            "ConfigMap {}/{} not found, using default policy",
            namespace, name
        )),
    }

    Ok(policy.snapshot().await)
}
