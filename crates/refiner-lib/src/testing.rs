//! Scripted in-memory cluster used by unit tests

use crate::drainer::{ApiError, ClusterApi};
use crate::models::{pod_key, NodeRecord, PodIdentity};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetNode(String),
    Patch(String, bool),
    ListPods(String),
    Evict(String, i64),
    GetPod(String),
}

#[derive(Default)]
struct MockState {
    nodes: HashMap<String, NodeRecord>,
    pods: HashMap<String, (String, PodIdentity)>,
    eviction_errors: HashMap<String, VecDeque<ApiError>>,
    stuck: HashSet<String>,
    replacements: HashMap<String, String>,
    patch_error: Option<ApiError>,
    uncordon_error: Option<ApiError>,
    list_error: Option<ApiError>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct MockClusterApi {
    state: Mutex<MockState>,
}

impl MockClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, node: NodeRecord) -> Self {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(node.name.clone(), node);
        self
    }

    pub fn with_pod(self, node: &str, pod: PodIdentity) -> Self {
        let key = pod_key(&pod.namespace, &pod.name);
        self.state
            .lock()
            .unwrap()
            .pods
            .insert(key, (node.to_string(), pod));
        self
    }

    /// Errors returned by successive evictions of `key` before one succeeds
    pub fn with_eviction_errors(self, key: &str, errors: Vec<ApiError>) -> Self {
        self.state
            .lock()
            .unwrap()
            .eviction_errors
            .insert(key.to_string(), errors.into());
        self
    }

    /// Accept evictions of `key` without ever deleting the pod
    pub fn with_stuck_pod(self, key: &str) -> Self {
        self.state.lock().unwrap().stuck.insert(key.to_string());
        self
    }

    /// Replace `key` with a same-named pod carrying `uid` once evicted
    pub fn with_replacement_pod(self, key: &str, uid: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .replacements
            .insert(key.to_string(), uid.to_string());
        self
    }

    /// Fail only patches that make a node schedulable again
    pub fn with_uncordon_error(self, error: ApiError) -> Self {
        self.state.lock().unwrap().uncordon_error = Some(error);
        self
    }

    pub fn with_patch_error(self, error: ApiError) -> Self {
        self.state.lock().unwrap().patch_error = Some(error);
        self
    }

    pub fn with_list_error(self, error: ApiError) -> Self {
        self.state.lock().unwrap().list_error = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn patches(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Patch(node, unschedulable) => Some((node, unschedulable)),
                _ => None,
            })
            .collect()
    }

    pub fn evictions(&self, key: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Evict(k, _) if k == key))
            .count()
    }

    pub fn node(&self, name: &str) -> Option<NodeRecord> {
        self.state.lock().unwrap().nodes.get(name).cloned()
    }

    pub fn has_pod(&self, key: &str) -> bool {
        self.state.lock().unwrap().pods.contains_key(key)
    }
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetNode(name.to_string()));
        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("node {}", name)))
    }

    async fn patch_node_schedulable(
        &self,
        name: &str,
        unschedulable: bool,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Patch(name.to_string(), unschedulable));
        if let Some(error) = state.patch_error.clone() {
            return Err(error);
        }
        if !unschedulable {
            if let Some(error) = state.uncordon_error.clone() {
                return Err(error);
            }
        }
        match state.nodes.get_mut(name) {
            Some(node) => {
                node.unschedulable = unschedulable;
                Ok(())
            }
            None => Err(ApiError::not_found(format!("node {}", name))),
        }
    }

    async fn list_pods_on_node(&self, name: &str) -> Result<Vec<PodIdentity>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListPods(name.to_string()));
        if let Some(error) = state.list_error.clone() {
            return Err(error);
        }
        let mut pods: Vec<PodIdentity> = state
            .pods
            .values()
            .filter(|(node, _)| node == name)
            .map(|(_, pod)| pod.clone())
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pods)
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ApiError> {
        let key = pod_key(namespace, name);
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Evict(key.clone(), grace_period_seconds));

        if let Some(error) = state
            .eviction_errors
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        if !state.pods.contains_key(&key) {
            return Err(ApiError::not_found(format!("pod {}", key)));
        }
        if let Some(uid) = state.replacements.remove(&key) {
            if let Some((_, pod)) = state.pods.get_mut(&key) {
                pod.uid = Some(uid);
            }
        } else if !state.stuck.contains(&key) {
            state.pods.remove(&key);
        }
        Ok(())
    }

    async fn get_pod_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PodIdentity, ApiError> {
        let key = pod_key(namespace, name);
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetPod(key.clone()));
        state
            .pods
            .get(&key)
            .map(|(_, pod)| pod.clone())
            .ok_or_else(|| ApiError::not_found(format!("pod {}", key)))
    }
}
