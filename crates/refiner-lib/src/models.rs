//! Core data models for the node refiner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// CPU and memory amounts in integral sub-units
///
/// CPU is tracked in millicores and memory in bytes so that small requests
/// (e.g. `10m`) never lose precision when summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
}

impl Resources {
    pub fn new(cpu_millis: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    /// True when either dimension has no capacity
    pub fn has_zero_dimension(&self) -> bool {
        self.cpu_millis == 0 || self.memory_bytes == 0
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis + rhs.cpu_millis,
            memory_bytes: self.memory_bytes + rhs.memory_bytes,
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        self.cpu_millis += rhs.cpu_millis;
        self.memory_bytes += rhs.memory_bytes;
    }
}

impl Sum for Resources {
    fn sum<I: Iterator<Item = Resources>>(iter: I) -> Self {
        iter.fold(Resources::default(), |acc, r| acc + r)
    }
}

/// Percentage of requested over allocatable resources, plus a weighted score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub score: f64,
}

/// A workload instance as observed by the pod watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    /// Node the pod is bound to, if scheduled
    pub node_name: Option<String>,
    /// Sum of all container requests
    pub requests: Resources,
    pub container_count: usize,
    pub images: Vec<String>,
    pub phase: Option<String>,
}

impl PodRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            node_name: None,
            requests: Resources::default(),
            container_count: 0,
            images: Vec::new(),
            phase: None,
        }
    }

    pub fn on_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_requests(mut self, requests: Resources) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self.container_count = self.images.len();
        self
    }

    /// Store key, unique across namespaces
    pub fn key(&self) -> String {
        pod_key(&self.namespace, &self.name)
    }

    /// Whether `other` differs in a way that affects placement accounting
    pub fn has_relevant_change(&self, other: &PodRecord) -> bool {
        self.container_count != other.container_count || self.node_name != other.node_name
    }
}

pub fn pod_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// A node as observed by the node watcher, with derived placement totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub allocatable: Resources,
    pub taint_count: usize,
    pub unschedulable: bool,
    pub created_at: DateTime<Utc>,
    /// Pods assigned during the current tick
    #[serde(default)]
    pub pods: Vec<PodRecord>,
    /// Sum of `pods` requests, recomputed every tick
    #[serde(default)]
    pub requested: Resources,
    #[serde(default)]
    pub utilization: Utilization,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>, allocatable: Resources, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            allocatable,
            taint_count: 0,
            unschedulable: false,
            created_at,
            pods: Vec::new(),
            requested: Resources::default(),
            utilization: Utilization::default(),
        }
    }

    pub fn with_taints(mut self, taint_count: usize) -> Self {
        self.taint_count = taint_count;
        self
    }

    pub fn with_unschedulable(mut self, unschedulable: bool) -> Self {
        self.unschedulable = unschedulable;
        self
    }

    /// Tainted or cordoned nodes are excluded from healthy capacity
    pub fn is_tainted(&self) -> bool {
        self.taint_count > 0 || self.unschedulable
    }

    /// Whether `other` differs in a way that requires replacing the record
    pub fn has_relevant_change(&self, other: &NodeRecord) -> bool {
        self.unschedulable != other.unschedulable
            || self.allocatable != other.allocatable
            || self.taint_count != other.taint_count
    }
}

/// Identity of a pod targeted for eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
    /// Changes when a controller replaces the pod with a same-named object
    pub uid: Option<String>,
    pub termination_grace_period_seconds: Option<i64>,
}

impl PodIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
            termination_grace_period_seconds: None,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_grace_period(mut self, seconds: i64) -> Self {
        self.termination_grace_period_seconds = Some(seconds);
        self
    }
}

impl std::fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
