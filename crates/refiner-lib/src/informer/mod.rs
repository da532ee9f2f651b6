//! Watch streams feeding the entity and policy stores
//!
//! Each watched resource kind has an [`EventSink`] that translates watcher
//! events into store callbacks. A watch restart delivers the full object
//! list, which replaces whatever the sink held before.

pub mod convert;

use crate::health::HealthRegistry;
use crate::models::{NodeRecord, PodRecord};
use crate::observability::StructuredLogger;
use crate::policy::PolicyStore;
use crate::store::EntityStore;
use async_trait::async_trait;
use convert::{is_terminal_phase, node_record, pod_record};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Field selector excluding pods that no longer hold node resources
pub const ACTIVE_POD_SELECTOR: &str =
    "status.phase!=Succeeded,status.phase!=Failed,status.phase!=Unknown";

/// Receives translated watcher events for one resource kind
#[async_trait]
pub trait EventSink<K: Send + 'static>: Send + Sync {
    async fn applied(&self, object: K);
    async fn deleted(&self, object: K);
    async fn restarted(&self, objects: Vec<K>);

    async fn handle(&self, event: Event<K>) {
        match event {
            Event::Applied(object) => self.applied(object).await,
            Event::Deleted(object) => self.deleted(object).await,
            Event::Restarted(objects) => self.restarted(objects).await,
        }
    }
}

pub struct NodeSink {
    store: EntityStore,
}

impl NodeSink {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventSink<Node> for NodeSink {
    async fn applied(&self, node: Node) {
        match node_record(&node) {
            Ok(record) => {
                self.store.on_node_updated(record).await;
            }
            Err(e) => warn!(error = %e, "Ignoring node event"),
        }
    }

    async fn deleted(&self, node: Node) {
        if let Some(name) = node.metadata.name.as_deref() {
            self.store.on_node_deleted(name).await;
        }
    }

    async fn restarted(&self, nodes: Vec<Node>) {
        let records: Vec<NodeRecord> = nodes.iter().filter_map(|n| node_record(n).ok()).collect();
        info!(nodes = records.len(), "Node watch (re)started");
        self.store.reconcile_nodes(records).await;
    }
}

pub struct PodSink {
    store: EntityStore,
}

impl PodSink {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventSink<Pod> for PodSink {
    async fn applied(&self, pod: Pod) {
        let record = match pod_record(&pod) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Ignoring pod event");
                return;
            }
        };

        if is_terminal_phase(record.phase.as_deref()) {
            self.store
                .on_pod_deleted(&record.namespace, &record.name)
                .await;
        } else {
            self.store.on_pod_updated(record).await;
        }
    }

    async fn deleted(&self, pod: Pod) {
        if let Ok(record) = pod_record(&pod) {
            debug!(pod = %record.key(), "Pod deleted");
            self.store
                .on_pod_deleted(&record.namespace, &record.name)
                .await;
        }
    }

    async fn restarted(&self, pods: Vec<Pod>) {
        let records: Vec<PodRecord> = pods
            .iter()
            .filter_map(|p| pod_record(p).ok())
            .filter(|p| !is_terminal_phase(p.phase.as_deref()))
            .collect();
        info!(pods = records.len(), "Pod watch (re)started");
        self.store.reconcile_pods(records).await;
    }
}

/// Applies the refiner ConfigMap to the policy store
pub struct PolicySink {
    policy: PolicyStore,
    logger: StructuredLogger,
}

impl PolicySink {
    pub fn new(policy: PolicyStore, logger: StructuredLogger) -> Self {
        Self { policy, logger }
    }

    async fn apply(&self, data: &BTreeMap<String, String>) {
        match self.policy.apply(data).await {
            Ok(changes) => self.logger.log_policy_updated(changes.len(), 0),
            Err(e) => {
                warn!(error = %e, "Some drainer settings were rejected");
                self.logger.log_policy_updated(0, e.errors.len());
            }
        }
    }
}

#[async_trait]
impl EventSink<ConfigMap> for PolicySink {
    async fn applied(&self, config_map: ConfigMap) {
        self.apply(&config_map.data.unwrap_or_default()).await;
    }

    async fn deleted(&self, config_map: ConfigMap) {
        info!(
            configmap = ?config_map.metadata.name,
            "Refiner ConfigMap deleted, keeping current settings"
        );
    }

    async fn restarted(&self, config_maps: Vec<ConfigMap>) {
        if let Some(config_map) = config_maps.into_iter().next() {
            self.apply(&config_map.data.unwrap_or_default()).await;
        }
    }
}

/// Drive a watch stream into `sink` until shutdown
///
/// Stream errors mark the component degraded; the watcher backs off and
/// resumes on its own.
pub async fn drive<K, S, St>(
    stream: St,
    sink: S,
    health: HealthRegistry,
    component: &'static str,
    mut shutdown: broadcast::Receiver<()>,
) where
    K: Send + 'static,
    S: EventSink<K>,
    St: Stream<Item = Result<Event<K>, watcher::Error>> + Send,
{
    health.register(component).await;
    futures::pin_mut!(stream);
    let mut degraded = false;

    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    if degraded {
                        health.set_healthy(component).await;
                        degraded = false;
                    }
                    sink.handle(event).await;
                }
                Some(Err(e)) => {
                    warn!(watcher = component, error = %e, "Watch stream error");
                    health.set_degraded(component, e.to_string()).await;
                    degraded = true;
                }
                None => {
                    warn!(watcher = component, "Watch stream ended");
                    health.set_unhealthy(component, "watch stream ended").await;
                    break;
                }
            },
            _ = shutdown.recv() => {
                info!(watcher = component, "Watcher shutting down");
                break;
            }
        }
    }
}

/// Handles for starting the three watchers against a live cluster
#[derive(Clone)]
pub struct Informers {
    client: Client,
    store: EntityStore,
    policy: PolicyStore,
    health: HealthRegistry,
    logger: StructuredLogger,
    policy_namespace: String,
    policy_configmap: String,
}

impl Informers {
    pub fn new(
        client: Client,
        store: EntityStore,
        policy: PolicyStore,
        health: HealthRegistry,
    ) -> Self {
        Self {
            client,
            store,
            policy,
            health,
            logger: StructuredLogger::default(),
            policy_namespace: "kube-system".to_string(),
            policy_configmap: "node-refiner-cm".to_string(),
        }
    }

    pub fn policy_source(
        mut self,
        namespace: impl Into<String>,
        configmap: impl Into<String>,
    ) -> Self {
        self.policy_namespace = namespace.into();
        self.policy_configmap = configmap.into();
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub async fn watch_nodes(self, shutdown: broadcast::Receiver<()>) {
        let api: Api<Node> = Api::all(self.client.clone());
        let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
        drive(
            stream,
            NodeSink::new(self.store.clone()),
            self.health.clone(),
            crate::health::components::NODE_WATCHER,
            shutdown,
        )
        .await;
    }

    pub async fn watch_pods(self, shutdown: broadcast::Receiver<()>) {
        let api: Api<Pod> = Api::all(self.client.clone());
        let config = watcher::Config::default().fields(ACTIVE_POD_SELECTOR);
        let stream = watcher::watcher(api, config).default_backoff();
        drive(
            stream,
            PodSink::new(self.store.clone()),
            self.health.clone(),
            crate::health::components::POD_WATCHER,
            shutdown,
        )
        .await;
    }

    pub async fn watch_policy(self, shutdown: broadcast::Receiver<()>) {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.policy_namespace);
        let config =
            watcher::Config::default().fields(&format!("metadata.name={}", self.policy_configmap));
        let stream = watcher::watcher(api, config).default_backoff();
        drive(
            stream,
            PolicySink::new(self.policy.clone(), self.logger.clone()),
            self.health.clone(),
            crate::health::components::POLICY_WATCHER,
            shutdown,
        )
        .await;
    }

    /// Spawn every watcher on the runtime
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().watch_nodes(shutdown.subscribe())),
            tokio::spawn(self.clone().watch_pods(shutdown.subscribe())),
            tokio::spawn(self.watch_policy(shutdown.subscribe())),
        ]
    }
}
