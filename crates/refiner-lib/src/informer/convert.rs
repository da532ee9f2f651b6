//! Conversion from Kubernetes objects into store records

use crate::models::{NodeRecord, PodIdentity, PodRecord, Resources};
use crate::quantity::{parse_cpu_millis, parse_memory_bytes};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("{kind} object has no name")]
    MissingName { kind: &'static str },
}

/// CPU and memory from a resource list; unparseable values count as zero
fn resources(list: Option<&BTreeMap<String, Quantity>>, owner: &str) -> Resources {
    let Some(list) = list else {
        return Resources::default();
    };

    let cpu = list.get("cpu").map_or(0, |q| {
        parse_cpu_millis(&q.0).unwrap_or_else(|e| {
            debug!(object = %owner, error = %e, "Ignoring unparseable cpu quantity");
            0
        })
    });
    let memory = list.get("memory").map_or(0, |q| {
        parse_memory_bytes(&q.0).unwrap_or_else(|e| {
            debug!(object = %owner, error = %e, "Ignoring unparseable memory quantity");
            0
        })
    });

    Resources::new(cpu, memory)
}

pub fn node_record(node: &Node) -> Result<NodeRecord, ConvertError> {
    let name = node
        .metadata
        .name
        .clone()
        .ok_or(ConvertError::MissingName { kind: "node" })?;

    let allocatable = resources(
        node.status.as_ref().and_then(|s| s.allocatable.as_ref()),
        &name,
    );
    // Missing creation time sorts as the oldest possible node
    let created_at: DateTime<Utc> = node
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_default();

    let spec = node.spec.as_ref();
    let taints = spec
        .and_then(|s| s.taints.as_ref())
        .map_or(0, |t| t.len());
    let unschedulable = spec.and_then(|s| s.unschedulable).unwrap_or(false);

    Ok(NodeRecord::new(name, allocatable, created_at)
        .with_taints(taints)
        .with_unschedulable(unschedulable))
}

pub fn pod_record(pod: &Pod) -> Result<PodRecord, ConvertError> {
    let name = pod
        .metadata
        .name
        .clone()
        .ok_or(ConvertError::MissingName { kind: "pod" })?;
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let owner = format!("{}/{}", namespace, name);

    let mut record = PodRecord::new(namespace, name);
    if let Some(spec) = &pod.spec {
        record.node_name = spec.node_name.clone();
        record.container_count = spec.containers.len();
        record.images = spec
            .containers
            .iter()
            .filter_map(|c| c.image.clone())
            .collect();
        record.requests = spec
            .containers
            .iter()
            .map(|c| {
                resources(
                    c.resources.as_ref().and_then(|r| r.requests.as_ref()),
                    &owner,
                )
            })
            .sum();
    }
    record.phase = pod.status.as_ref().and_then(|s| s.phase.clone());

    Ok(record)
}

pub fn pod_identity(pod: &Pod) -> Result<PodIdentity, ConvertError> {
    let name = pod
        .metadata
        .name
        .clone()
        .ok_or(ConvertError::MissingName { kind: "pod" })?;

    Ok(PodIdentity {
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        name,
        uid: pod.metadata.uid.clone(),
        termination_grace_period_seconds: pod
            .spec
            .as_ref()
            .and_then(|s| s.termination_grace_period_seconds),
    })
}

/// Phases whose pods no longer hold node resources
pub fn is_terminal_phase(phase: Option<&str>) -> bool {
    matches!(phase, Some("Succeeded" | "Failed" | "Unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeSpec, NodeStatus, PodSpec, PodStatus, ResourceRequirements, Taint,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    }

    fn container(image: &str, cpu: &str, memory: &str) -> Container {
        Container {
            name: image.to_string(),
            image: Some(image.to_string()),
            resources: Some(ResourceRequirements {
                requests: Some(quantities(cpu, memory)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_record() {
        let created = Utc::now();
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".into()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(true),
                taints: Some(vec![Taint {
                    key: "dedicated".into(),
                    effect: "NoSchedule".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                allocatable: Some(quantities("3920m", "15Gi")),
                ..Default::default()
            }),
        };

        let record = node_record(&node).unwrap();
        assert_eq!(record.name, "worker-1");
        assert_eq!(record.allocatable, Resources::new(3920, 15 * 1024 * 1024 * 1024));
        assert_eq!(record.taint_count, 1);
        assert!(record.unschedulable);
        assert_eq!(record.created_at, created);
    }

    #[test]
    fn test_node_without_name() {
        assert_eq!(
            node_record(&Node::default()),
            Err(ConvertError::MissingName { kind: "node" })
        );
    }

    #[test]
    fn test_pod_record_sums_containers() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".into()),
                namespace: Some("shop".into()),
                uid: Some("abc".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("worker-1".into()),
                containers: vec![
                    container("nginx:1.25", "250m", "128Mi"),
                    container("sidecar:2", "0.5", "64Mi"),
                ],
                termination_grace_period_seconds: Some(45),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                ..Default::default()
            }),
        };

        let record = pod_record(&pod).unwrap();
        assert_eq!(record.key(), "shop/web-0");
        assert_eq!(record.node_name.as_deref(), Some("worker-1"));
        assert_eq!(record.container_count, 2);
        assert_eq!(record.images, vec!["nginx:1.25", "sidecar:2"]);
        assert_eq!(record.requests, Resources::new(750, 192 * 1024 * 1024));

        let identity = pod_identity(&pod).unwrap();
        assert_eq!(identity.uid.as_deref(), Some("abc"));
        assert_eq!(identity.termination_grace_period_seconds, Some(45));
    }

    #[test]
    fn test_bad_quantity_counts_as_zero() {
        let mut c = container("app", "lots", "1Gi");
        c.name = "app".into();
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("p".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![c],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(pod_record(&pod).unwrap().requests, Resources::new(0, 1024 * 1024 * 1024));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(is_terminal_phase(Some("Succeeded")));
        assert!(is_terminal_phase(Some("Failed")));
        assert!(is_terminal_phase(Some("Unknown")));
        assert!(!is_terminal_phase(Some("Running")));
        assert!(!is_terminal_phase(None));
    }
}
