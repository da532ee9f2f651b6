//! Cluster-wide aggregation and excess capacity estimation

use crate::models::{NodeRecord, Resources, Utilization};
use serde::{Deserialize, Serialize};

/// Cluster totals for a single tick
///
/// Requested and allocatable totals only cover non-tainted, schedulable
/// nodes. Node and pod counts cover every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub node_count: usize,
    pub non_tainted_node_count: usize,
    pub unschedulable_node_count: usize,
    pub pod_count: usize,
    pub requested: Resources,
    pub allocatable: Resources,
    pub utilization: Utilization,
    pub excess_nodes: f64,
}

impl ClusterSnapshot {
    /// Fold scored node records into cluster totals
    pub fn aggregate(nodes: &[NodeRecord]) -> Self {
        let mut snapshot = ClusterSnapshot {
            node_count: nodes.len(),
            ..Default::default()
        };

        for node in nodes {
            if !node.is_tainted() {
                snapshot.non_tainted_node_count += 1;
                snapshot.requested += node.requested;
                snapshot.allocatable += node.allocatable;
            }
            if node.unschedulable {
                snapshot.unschedulable_node_count += 1;
            }
            snapshot.pod_count += node.pods.len();
        }

        snapshot.utilization = Utilization::compute(&snapshot.requested, &snapshot.allocatable);
        snapshot
    }

    /// Estimate excess nodes shaped like `sample` and store the result
    pub fn estimate_excess(&mut self, sample: &Resources) -> f64 {
        self.excess_nodes = excess_nodes(&self.allocatable, &self.requested, sample);
        self.excess_nodes
    }
}

/// Slack capacity measured in sample nodes, bounded by the scarcer resource
///
/// The result may be negative (over-subscribed) or fractional and is not
/// clamped. A sample without capacity in either dimension yields 0.
pub fn excess_nodes(allocatable: &Resources, requested: &Resources, sample: &Resources) -> f64 {
    if sample.has_zero_dimension() {
        return 0.0;
    }

    let excess_cpu =
        (allocatable.cpu_millis - requested.cpu_millis) as f64 / sample.cpu_millis as f64;
    let excess_ram =
        (allocatable.memory_bytes - requested.memory_bytes) as f64 / sample.memory_bytes as f64;

    excess_cpu.min(excess_ram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PodRecord;
    use chrono::Utc;

    fn node(name: &str, alloc: Resources, requested: Resources, pods: usize) -> NodeRecord {
        let mut n = NodeRecord::new(name, alloc, Utc::now());
        n.requested = requested;
        n.pods = (0..pods)
            .map(|i| PodRecord::new("default", format!("{}-pod-{}", name, i)))
            .collect();
        n
    }

    #[test]
    fn test_excess_uses_tighter_resource() {
        let excess = excess_nodes(
            &Resources::new(10, 10),
            &Resources::new(5, 8),
            &Resources::new(1, 2),
        );
        assert_eq!(excess, 1.0);
    }

    #[test]
    fn test_excess_can_be_negative_and_fractional() {
        let negative = excess_nodes(
            &Resources::new(10, 10),
            &Resources::new(12, 5),
            &Resources::new(4, 4),
        );
        assert_eq!(negative, -0.5);

        let fractional = excess_nodes(
            &Resources::new(10, 10),
            &Resources::new(9, 0),
            &Resources::new(4, 4),
        );
        assert_eq!(fractional, 0.25);
    }

    #[test]
    fn test_excess_with_empty_sample() {
        assert_eq!(
            excess_nodes(&Resources::new(10, 10), &Resources::default(), &Resources::default()),
            0.0
        );
    }

    #[test]
    fn test_aggregate_excludes_tainted_capacity() {
        let nodes = vec![
            node("a", Resources::new(4000, 8000), Resources::new(1000, 2000), 2),
            node("b", Resources::new(4000, 8000), Resources::new(3000, 2000), 3).with_taints(1),
            node("c", Resources::new(4000, 8000), Resources::new(1000, 6000), 1)
                .with_unschedulable(true),
            node("d", Resources::new(4000, 8000), Resources::new(1000, 2000), 0),
        ];

        let snapshot = ClusterSnapshot::aggregate(&nodes);
        assert_eq!(snapshot.node_count, 4);
        assert_eq!(snapshot.non_tainted_node_count, 2);
        assert_eq!(snapshot.unschedulable_node_count, 1);
        assert_eq!(snapshot.pod_count, 6);
        assert_eq!(snapshot.allocatable, Resources::new(8000, 16000));
        assert_eq!(snapshot.requested, Resources::new(2000, 4000));
        assert!((snapshot.utilization.cpu_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty_cluster() {
        let snapshot = ClusterSnapshot::aggregate(&[]);
        assert_eq!(snapshot, ClusterSnapshot::default());
    }

    #[test]
    fn test_estimate_excess_stores_result() {
        let nodes = vec![
            node("a", Resources::new(1000, 1000), Resources::new(100, 100), 1),
            node("b", Resources::new(1000, 1000), Resources::new(100, 100), 1),
            node("c", Resources::new(1000, 1000), Resources::new(100, 100), 1),
        ];
        let mut snapshot = ClusterSnapshot::aggregate(&nodes);
        let excess = snapshot.estimate_excess(&Resources::new(1000, 1000));
        assert!((excess - 2.7).abs() < 1e-9);
        assert_eq!(snapshot.excess_nodes, excess);
    }
}
