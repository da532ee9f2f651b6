//! Observability infrastructure for the refiner
//!
//! Provides:
//! - Prometheus counters for cordon, drain and uncordon attempts
//! - Cluster gauges republished once per tick
//! - Event-tagged structured logging with tracing

use crate::cluster::ClusterSnapshot;
use crate::gate::DenyReason;
use crate::models::NodeRecord;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

const TICK_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

static GLOBAL_METRICS: OnceLock<RefinerMetricsInner> = OnceLock::new();

struct RefinerMetricsInner {
    nodes_cordoned: IntCounter,
    nodes_drained: IntCounter,
    nodes_uncordoned: IntCounter,
    drain_outcomes: IntCounterVec,
    cluster_nodes: IntGauge,
    cluster_pods: IntGauge,
    cluster_non_tainted_nodes: IntGauge,
    cluster_unschedulable_nodes: IntGauge,
    cluster_excess_nodes: Gauge,
    cluster_cpu_utilization: Gauge,
    cluster_memory_utilization: Gauge,
    tick_duration_seconds: Histogram,
}

impl RefinerMetricsInner {
    fn new() -> Self {
        Self {
            nodes_cordoned: register_int_counter!(
                "node_refiner_nodes_cordoned",
                "Number of cordon attempts"
            )
            .expect("Failed to register nodes_cordoned"),

            nodes_drained: register_int_counter!(
                "node_refiner_nodes_drained",
                "Number of drain attempts"
            )
            .expect("Failed to register nodes_drained"),

            nodes_uncordoned: register_int_counter!(
                "node_refiner_nodes_uncordoned",
                "Number of uncordon attempts"
            )
            .expect("Failed to register nodes_uncordoned"),

            drain_outcomes: register_int_counter_vec!(
                "node_refiner_drain_outcomes_total",
                "Finished drains by outcome",
                &["outcome"]
            )
            .expect("Failed to register drain_outcomes"),

            cluster_nodes: register_int_gauge!(
                "node_refiner_cluster_nodes",
                "Number of nodes in the cluster"
            )
            .expect("Failed to register cluster_nodes"),

            cluster_pods: register_int_gauge!(
                "node_refiner_cluster_pods",
                "Number of pods assigned to known nodes"
            )
            .expect("Failed to register cluster_pods"),

            cluster_non_tainted_nodes: register_int_gauge!(
                "node_refiner_cluster_non_tainted_nodes",
                "Number of nodes without taints that accept new pods"
            )
            .expect("Failed to register cluster_non_tainted_nodes"),

            cluster_unschedulable_nodes: register_int_gauge!(
                "node_refiner_cluster_unschedulable_nodes",
                "Number of nodes marked unschedulable"
            )
            .expect("Failed to register cluster_unschedulable_nodes"),

            cluster_excess_nodes: register_gauge!(
                "node_refiner_cluster_excess_nodes",
                "Estimated number of removable nodes"
            )
            .expect("Failed to register cluster_excess_nodes"),

            cluster_cpu_utilization: register_gauge!(
                "node_refiner_cluster_cpu_utilization",
                "Requested CPU as a percentage of allocatable CPU"
            )
            .expect("Failed to register cluster_cpu_utilization"),

            cluster_memory_utilization: register_gauge!(
                "node_refiner_cluster_memory_utilization",
                "Requested memory as a percentage of allocatable memory"
            )
            .expect("Failed to register cluster_memory_utilization"),

            tick_duration_seconds: register_histogram!(
                "node_refiner_tick_duration_seconds",
                "Time spent in one decision loop pass",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),
        }
    }
}

/// Handle to the process-wide refiner metrics
///
/// Clones share the same registered collectors.
#[derive(Clone, Copy)]
pub struct RefinerMetrics {
    inner: &'static RefinerMetricsInner,
}

impl Default for RefinerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RefinerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinerMetrics").finish_non_exhaustive()
    }
}

impl RefinerMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(RefinerMetricsInner::new),
        }
    }

    pub fn inc_nodes_cordoned(&self) {
        self.inner.nodes_cordoned.inc();
    }

    pub fn inc_nodes_drained(&self) {
        self.inner.nodes_drained.inc();
    }

    pub fn inc_nodes_uncordoned(&self) {
        self.inner.nodes_uncordoned.inc();
    }

    pub fn record_drain_outcome(&self, outcome: &str) {
        self.inner.drain_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn observe_tick(&self, duration_secs: f64) {
        self.inner.tick_duration_seconds.observe(duration_secs);
    }

    /// Republish the cluster gauges from one tick's snapshot
    pub fn publish_cluster(&self, snapshot: &ClusterSnapshot) {
        let m = self.inner;
        m.cluster_nodes.set(snapshot.node_count as i64);
        m.cluster_pods.set(snapshot.pod_count as i64);
        m.cluster_non_tainted_nodes.set(snapshot.non_tainted_node_count as i64);
        m.cluster_unschedulable_nodes.set(snapshot.unschedulable_node_count as i64);
        m.cluster_excess_nodes.set(snapshot.excess_nodes);
        m.cluster_cpu_utilization.set(snapshot.utilization.cpu_percent);
        m.cluster_memory_utilization.set(snapshot.utilization.ram_percent);
    }

    pub fn nodes_cordoned(&self) -> u64 {
        self.inner.nodes_cordoned.get()
    }

    pub fn nodes_drained(&self) -> u64 {
        self.inner.nodes_drained.get()
    }

    pub fn nodes_uncordoned(&self) -> u64 {
        self.inner.nodes_uncordoned.get()
    }
}

/// Structured logger for refiner events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    component: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("node-refiner")
    }
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_cluster_state(&self, snapshot: &ClusterSnapshot) {
        info!(
            event = "cluster_state",
            component = %self.component,
            nodes = snapshot.node_count,
            non_tainted_nodes = snapshot.non_tainted_node_count,
            unschedulable_nodes = snapshot.unschedulable_node_count,
            pods = snapshot.pod_count,
            cpu_percent = snapshot.utilization.cpu_percent,
            ram_percent = snapshot.utilization.ram_percent,
            excess_nodes = snapshot.excess_nodes,
            "Cluster state"
        );
    }

    /// Per-node summary, only emitted at debug level
    pub fn log_node_summary(&self, node: &NodeRecord) {
        debug!(
            event = "node_state",
            component = %self.component,
            node = %node.name,
            tainted = node.is_tainted(),
            pods = node.pods.len(),
            cpu_percent = node.utilization.cpu_percent,
            ram_percent = node.utilization.ram_percent,
            score = node.utilization.score,
            "Node state"
        );
    }

    pub fn log_drain_candidate(&self, node: &NodeRecord) {
        info!(
            event = "drain_candidate",
            component = %self.component,
            node = %node.name,
            score = node.utilization.score,
            pods = node.pods.len(),
            "Selected drain candidate"
        );
    }

    pub fn log_drain_denied(&self, node: &str, reason: &DenyReason) {
        info!(
            event = "drain_denied",
            component = %self.component,
            node = %node,
            reason = reason.label(),
            details = %reason,
            "Drain not authorized"
        );
    }

    pub fn log_drain_completed(&self, node: &str, evicted_pods: usize, elapsed_secs: f64) {
        info!(
            event = "drain_completed",
            component = %self.component,
            node = %node,
            evicted_pods = evicted_pods,
            elapsed_secs = elapsed_secs,
            "Node drained"
        );
    }

    pub fn log_drain_failed(&self, node: &str, cause: &str, rolled_back: bool) {
        if rolled_back {
            warn!(
                event = "drain_failed",
                component = %self.component,
                node = %node,
                cause = %cause,
                rolled_back = true,
                "Drain failed, node uncordoned"
            );
        } else {
            error!(
                event = "drain_failed",
                component = %self.component,
                node = %node,
                cause = %cause,
                rolled_back = false,
                "Drain failed and node left cordoned"
            );
        }
    }

    pub fn log_startup(&self, version: &str, tick_interval_secs: u64) {
        info!(
            event = "refiner_started",
            component = %self.component,
            version = %version,
            tick_interval_secs = tick_interval_secs,
            "Node refiner started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "refiner_shutdown",
            component = %self.component,
            reason = %reason,
            "Node refiner shutting down"
        );
    }

    pub fn log_policy_updated(&self, changed: usize, failed: usize) {
        if failed == 0 {
            info!(
                event = "policy_updated",
                component = %self.component,
                changed = changed,
                "Drainer policy updated"
            );
        } else {
            warn!(
                event = "policy_updated",
                component = %self.component,
                changed = changed,
                failed = failed,
                "Drainer policy partially updated"
            );
        }
    }
}
