use super::api::{ApiError, ClusterApi};
use crate::informer::convert::{node_record, pod_identity};
use crate::models::{NodeRecord, PodIdentity};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::{debug, warn};

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_error(what: String, err: kube::Error) -> ApiError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ApiError::NotFound { what },
        // Evictions blocked by a disruption budget come back as 429
        kube::Error::Api(resp) if resp.code == 429 => ApiError::Throttled(resp.message),
        other => ApiError::Api(other.to_string()),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, ApiError> {
        let node = self
            .nodes()
            .get(name)
            .await
            .map_err(|e| map_error(format!("node {}", name), e))?;
        node_record(&node).map_err(|e| ApiError::Api(e.to_string()))
    }

    async fn patch_node_schedulable(
        &self,
        name: &str,
        unschedulable: bool,
    ) -> Result<(), ApiError> {
        let patch = json!({ "spec": { "unschedulable": unschedulable } });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map_err(|e| map_error(format!("node {}", name), e))?;
        Ok(())
    }

    async fn list_pods_on_node(&self, name: &str) -> Result<Vec<PodIdentity>, ApiError> {
        let params = ListParams::default().fields(&format!("spec.nodeName={}", name));
        let pods = Api::<Pod>::all(self.client.clone())
            .list(&params)
            .await
            .map_err(|e| map_error(format!("pods on node {}", name), e))?;

        let mut identities = Vec::with_capacity(pods.items.len());
        for pod in &pods.items {
            match pod_identity(pod) {
                Ok(identity) => identities.push(identity),
                Err(e) => warn!(node = %name, error = %e, "Skipping pod without identity"),
            }
        }
        debug!(node = %name, pods = identities.len(), "Listed pods on node");
        Ok(identities)
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), ApiError> {
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: u32::try_from(grace_period_seconds.max(0)).ok(),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.pods(namespace)
            .evict(name, &params)
            .await
            .map_err(|e| map_error(format!("pod {}/{}", namespace, name), e))?;
        Ok(())
    }

    async fn get_pod_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PodIdentity, ApiError> {
        let pod = self
            .pods(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(format!("pod {}/{}", namespace, name), e))?;
        pod_identity(&pod).map_err(|e| ApiError::Api(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            map_error("pod default/a".into(), api_error(404, "not found")),
            ApiError::not_found("pod default/a")
        );
        assert_eq!(
            map_error("pod default/a".into(), api_error(429, "budget")),
            ApiError::Throttled("budget".into())
        );
        assert!(matches!(
            map_error("node n1".into(), api_error(500, "boom")),
            ApiError::Api(_)
        ));
    }
}
