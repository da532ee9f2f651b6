use super::api::{ApiError, ClusterApi};
use crate::models::PodIdentity;
use crate::observability::RefinerMetrics;
use crate::policy::PolicyStore;
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const THROTTLE_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const DELETION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Retry and poll intervals used by eviction workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    pub throttle_retry: Duration,
    pub deletion_poll: Duration,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            throttle_retry: THROTTLE_RETRY_INTERVAL,
            deletion_poll: DELETION_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPhase {
    Schedulable,
    Cordoned,
    Draining,
    Drained,
    DrainFailed,
    Uncordoned,
}

impl fmt::Display for DrainPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DrainPhase::Schedulable => "schedulable",
            DrainPhase::Cordoned => "cordoned",
            DrainPhase::Draining => "draining",
            DrainPhase::Drained => "drained",
            DrainPhase::DrainFailed => "drain_failed",
            DrainPhase::Uncordoned => "uncordoned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DrainError {
    #[error("failed to cordon node {node}: {source}")]
    Cordon {
        node: String,
        #[source]
        source: ApiError,
    },
    #[error("failed to uncordon node {node}: {source}")]
    Uncordon {
        node: String,
        #[source]
        source: ApiError,
    },
    #[error("failed to list pods on node {node}: {source}")]
    ListPods {
        node: String,
        #[source]
        source: ApiError,
    },
    #[error("failed to evict pod {pod}: {source}")]
    Eviction {
        pod: String,
        #[source]
        source: ApiError,
    },
    #[error("failed to confirm deletion of pod {pod}: {source}")]
    DeletionCheck {
        pod: String,
        #[source]
        source: ApiError,
    },
    #[error("pod {pod} still present after {timeout:?}")]
    DeletionTimeout { pod: String, timeout: Duration },
    #[error("eviction of pod {pod} aborted")]
    Aborted { pod: String },
    #[error("drain of node {node} did not finish within {timeout:?}")]
    Timeout { node: String, timeout: Duration },
    #[error("eviction workers exited before reporting results")]
    WorkerLost,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    Drained { evicted: usize },
    CordonFailed { error: DrainError },
    RolledBack { cause: DrainError },
    RollbackFailed { cause: DrainError, rollback: DrainError },
}

impl DrainOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DrainOutcome::Drained { .. } => "drained",
            DrainOutcome::CordonFailed { .. } => "cordon_failed",
            DrainOutcome::RolledBack { .. } => "rolled_back",
            DrainOutcome::RollbackFailed { .. } => "rollback_failed",
        }
    }
}

/// Record of one scale-down attempt
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Every state the node passed through, in order
    pub phases: Vec<DrainPhase>,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DrainOutcome::Drained { .. })
    }

    pub fn final_phase(&self) -> Option<DrainPhase> {
        self.phases.last().copied()
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Grace period for an eviction, capped at `max_grace_period`
pub fn effective_grace_period(pod_grace_seconds: Option<i64>, max_grace_period: Duration) -> i64 {
    let max = i64::try_from(max_grace_period.as_secs()).unwrap_or(i64::MAX);
    pod_grace_seconds.map_or(max, |g| g.min(max))
}

/// Runs the cordon, drain and rollback steps against a [`ClusterApi`]
pub struct CordonDrainer<A> {
    api: Arc<A>,
    store: EntityStore,
    policy: PolicyStore,
    metrics: Option<RefinerMetrics>,
    timing: ProtocolTiming,
}

impl<A> Clone for CordonDrainer<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: self.store.clone(),
            policy: self.policy.clone(),
            metrics: self.metrics,
            timing: self.timing,
        }
    }
}

impl<A: ClusterApi> CordonDrainer<A> {
    pub fn new(api: Arc<A>, store: EntityStore, policy: PolicyStore) -> Self {
        Self {
            api,
            store,
            policy,
            metrics: None,
            timing: ProtocolTiming::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: RefinerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_timing(mut self, timing: ProtocolTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Mark the node unschedulable
    ///
    /// The scale-down timestamp is recorded before anything else, so a
    /// failed cordon still starts the cool-down.
    pub async fn cordon(&self, node: &str) -> Result<(), DrainError> {
        if let Some(metrics) = &self.metrics {
            metrics.inc_nodes_cordoned();
        }
        self.store.record_scale_down(Utc::now()).await;

        self.set_node_schedulable(node, false)
            .await
            .map_err(|source| DrainError::Cordon {
                node: node.to_string(),
                source,
            })
    }

    pub async fn uncordon(&self, node: &str) -> Result<(), DrainError> {
        if let Some(metrics) = &self.metrics {
            metrics.inc_nodes_uncordoned();
        }

        self.set_node_schedulable(node, true)
            .await
            .map_err(|source| DrainError::Uncordon {
                node: node.to_string(),
                source,
            })
    }

    async fn set_node_schedulable(&self, name: &str, schedulable: bool) -> Result<(), ApiError> {
        let unschedulable = !schedulable;
        let node = self.api.get_node(name).await?;
        if node.unschedulable == unschedulable {
            debug!(node = %name, unschedulable, "Node already in requested state");
            return Ok(());
        }

        self.api.patch_node_schedulable(name, unschedulable).await?;
        self.store.set_unschedulable(name, unschedulable).await;
        info!(node = %name, unschedulable, "Patched node schedulable state");
        Ok(())
    }

    /// Evict every pod on the node, returning how many were dispatched
    ///
    /// Fails on the first worker error or when the deletion timeout elapses;
    /// in both cases the remaining workers are told to stop.
    pub async fn drain(&self, node: &str) -> Result<usize, DrainError> {
        if let Some(metrics) = &self.metrics {
            metrics.inc_nodes_drained();
        }

        let policy = self.policy.snapshot().await;
        let pods = self
            .api
            .list_pods_on_node(node)
            .await
            .map_err(|source| DrainError::ListPods {
                node: node.to_string(),
                source,
            })?;

        let count = pods.len();
        if count == 0 {
            info!(node = %node, "No pods to evict");
            return Ok(0);
        }

        let timeout = policy.deletion_timeout();
        info!(node = %node, pods = count, timeout_secs = timeout.as_secs(), "Evicting pods");

        let (abort_tx, abort_rx) = watch::channel(false);
        let (result_tx, mut result_rx) = mpsc::channel(count);

        for pod in pods {
            let worker = EvictionWorker {
                api: Arc::clone(&self.api),
                grace_period_seconds: effective_grace_period(
                    pod.termination_grace_period_seconds,
                    policy.max_grace_period,
                ),
                pod,
                deletion_timeout: timeout,
                timing: self.timing,
                abort: abort_rx.clone(),
            };
            let tx = result_tx.clone();
            tokio::spawn(async move {
                let result = worker.run().await;
                let _ = tx.send(result).await;
            });
        }
        drop(result_tx);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut completed = 0;
        let result = loop {
            if completed == count {
                break Ok(count);
            }
            tokio::select! {
                received = result_rx.recv() => match received {
                    Some(Ok(())) => completed += 1,
                    Some(Err(e)) => break Err(e),
                    None => break Err(DrainError::WorkerLost),
                },
                _ = &mut deadline => {
                    break Err(DrainError::Timeout {
                        node: node.to_string(),
                        timeout,
                    });
                }
            }
        };

        if result.is_err() {
            let _ = abort_tx.send(true);
        }
        result
    }

    /// Full cordon, drain and rollback sequence for one node
    pub async fn scale_down(&self, node: &str) -> DrainReport {
        let started_at = Utc::now();
        let mut phases = vec![DrainPhase::Schedulable];

        let outcome = match self.cordon(node).await {
            Err(error) => {
                warn!(node = %node, error = %error, "Cordon failed, skipping drain");
                DrainOutcome::CordonFailed { error }
            }
            Ok(()) => {
                phases.push(DrainPhase::Cordoned);
                phases.push(DrainPhase::Draining);

                match self.drain(node).await {
                    Ok(evicted) => {
                        phases.push(DrainPhase::Drained);
                        DrainOutcome::Drained { evicted }
                    }
                    Err(cause) => {
                        phases.push(DrainPhase::DrainFailed);
                        error!(node = %node, error = %cause, "Drain failed, uncordoning node");
                        match self.uncordon(node).await {
                            Ok(()) => {
                                phases.push(DrainPhase::Uncordoned);
                                DrainOutcome::RolledBack { cause }
                            }
                            Err(rollback) => {
                                error!(node = %node, error = %rollback, "Rollback failed, node stays cordoned");
                                DrainOutcome::RollbackFailed { cause, rollback }
                            }
                        }
                    }
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_drain_outcome(outcome.label());
        }

        DrainReport {
            node: node.to_string(),
            started_at,
            finished_at: Utc::now(),
            phases,
            outcome,
        }
    }
}

struct EvictionWorker<A> {
    api: Arc<A>,
    pod: PodIdentity,
    grace_period_seconds: i64,
    deletion_timeout: Duration,
    timing: ProtocolTiming,
    abort: watch::Receiver<bool>,
}

impl<A: ClusterApi> EvictionWorker<A> {
    async fn run(mut self) -> Result<(), DrainError> {
        let pod = self.pod.to_string();

        loop {
            if *self.abort.borrow() {
                return Err(DrainError::Aborted { pod });
            }

            let evicted = self
                .api
                .evict_pod(&self.pod.namespace, &self.pod.name, self.grace_period_seconds)
                .await;
            match evicted {
                Ok(()) => break,
                Err(ApiError::NotFound { .. }) => {
                    debug!(pod = %pod, "Pod already gone");
                    return Ok(());
                }
                Err(ApiError::Throttled(reason)) => {
                    debug!(pod = %pod, reason = %reason, "Eviction throttled, retrying");
                    if self.pause(self.timing.throttle_retry).await {
                        return Err(DrainError::Aborted { pod });
                    }
                }
                Err(source) => return Err(DrainError::Eviction { pod, source }),
            }
        }

        self.await_deletion(pod).await
    }

    /// Poll until the pod is gone or replaced by a new object
    async fn await_deletion(&mut self, pod: String) -> Result<(), DrainError> {
        let deadline = Instant::now() + self.deletion_timeout;

        loop {
            let current = self
                .api
                .get_pod_identity(&self.pod.namespace, &self.pod.name)
                .await;
            match current {
                Err(ApiError::NotFound { .. }) => return Ok(()),
                Ok(current) if current.uid != self.pod.uid => return Ok(()),
                Ok(_) => {}
                Err(source) => return Err(DrainError::DeletionCheck { pod, source }),
            }

            if Instant::now() >= deadline {
                return Err(DrainError::DeletionTimeout {
                    pod,
                    timeout: self.deletion_timeout,
                });
            }
            if self.pause(self.timing.deletion_poll).await {
                return Err(DrainError::Aborted { pod });
            }
        }
    }

    /// Sleep for `interval`, returning true if the drain was aborted meanwhile
    async fn pause(&mut self, interval: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(interval) => *self.abort.borrow(),
            changed = self.abort.changed() => changed.is_err() || *self.abort.borrow(),
        }
    }
}
