//! Decision loop
//!
//! Once per interval the controller scores every node, aggregates the
//! cluster, picks the least utilized node and asks the gate whether it may
//! be drained. An authorized drain runs as a separate task whose report is
//! collected on a later tick; only one drain is in flight at a time.

use crate::cluster::ClusterSnapshot;
use crate::drainer::{ClusterApi, CordonDrainer, DrainOutcome, DrainReport};
use crate::gate::{self, DenyReason, GateDecision};
use crate::health::{components, HealthRegistry};
use crate::observability::{RefinerMetrics, StructuredLogger};
use crate::policy::PolicyStore;
use crate::selector::{select_candidate, SelectionError};
use crate::store::EntityStore;
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum TickDecision {
    NoCandidate(SelectionError),
    Denied { node: String, reason: DenyReason },
    Dispatched { node: String },
    DrainInFlight { node: String },
}

#[derive(Debug, Clone)]
pub struct TickSummary {
    pub snapshot: ClusterSnapshot,
    pub decision: TickDecision,
    /// Report of a drain that finished since the previous tick
    pub finished: Option<DrainReport>,
}

struct InFlightDrain {
    node: String,
    handle: JoinHandle<DrainReport>,
}

pub struct RefinerController<A> {
    store: EntityStore,
    policy: PolicyStore,
    drainer: CordonDrainer<A>,
    health: HealthRegistry,
    metrics: RefinerMetrics,
    logger: StructuredLogger,
    tick_interval: Duration,
    in_flight: Option<InFlightDrain>,
}

impl<A: ClusterApi> RefinerController<A> {
    pub fn new(
        store: EntityStore,
        policy: PolicyStore,
        drainer: CordonDrainer<A>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            store,
            policy,
            drainer,
            health,
            metrics: RefinerMetrics::new(),
            logger: StructuredLogger::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            in_flight: None,
        }
    }

    pub fn builder() -> RefinerControllerBuilder<A> {
        RefinerControllerBuilder::new()
    }

    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run ticks until shutdown is signalled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            "Starting decision loop"
        );
        self.health.register(components::CONTROLLER).await;
        self.health.register(components::DRAINER).await;

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    if let Some(drain) = &self.in_flight {
                        warn!(node = %drain.node, "Shutting down with a drain in flight");
                    }
                    info!("Decision loop shutting down");
                    break;
                }
            }
        }
    }

    /// One pass of the decision loop
    pub async fn tick(&mut self) -> TickSummary {
        let started = Instant::now();
        let finished = self.reap().await;

        let nodes = self.store.snapshot().await;
        for node in &nodes {
            self.logger.log_node_summary(node);
        }
        let mut snapshot = ClusterSnapshot::aggregate(&nodes);

        let candidate = match select_candidate(&nodes) {
            Ok(candidate) => {
                snapshot.estimate_excess(&candidate.allocatable);
                self.logger.log_drain_candidate(candidate);
                Ok(candidate.name.clone())
            }
            Err(e) => Err(e),
        };

        self.metrics.publish_cluster(&snapshot);
        self.logger.log_cluster_state(&snapshot);

        let decision = match candidate {
            Err(e) => {
                info!(error = %e, "No drain candidate this tick");
                TickDecision::NoCandidate(e)
            }
            Ok(node) => self.decide(&snapshot, node).await,
        };

        self.health.heartbeat().await;
        self.health.set_healthy(components::CONTROLLER).await;
        self.metrics.observe_tick(started.elapsed().as_secs_f64());

        TickSummary {
            snapshot,
            decision,
            finished,
        }
    }

    async fn decide(&mut self, snapshot: &ClusterSnapshot, node: String) -> TickDecision {
        if let Some(drain) = &self.in_flight {
            debug!(node = %drain.node, "Drain still in flight");
            return TickDecision::DrainInFlight {
                node: drain.node.clone(),
            };
        }

        let policy = self.policy.snapshot().await;
        let state = self.store.drain_state().await;

        match gate::evaluate(snapshot, &policy, &state, Utc::now()) {
            GateDecision::Deny(reason) => {
                self.logger.log_drain_denied(&node, &reason);
                TickDecision::Denied { node, reason }
            }
            GateDecision::Authorize => {
                info!(node = %node, "Drain authorized");
                let drainer = self.drainer.clone();
                let target = node.clone();
                let handle = tokio::spawn(async move { drainer.scale_down(&target).await });
                self.in_flight = Some(InFlightDrain {
                    node: node.clone(),
                    handle,
                });
                TickDecision::Dispatched { node }
            }
        }
    }

    /// Collect the report of a finished drain, if any
    async fn reap(&mut self) -> Option<DrainReport> {
        if !self.in_flight.as_ref()?.handle.is_finished() {
            return None;
        }
        let drain = self.in_flight.take()?;

        match drain.handle.await {
            Ok(report) => {
                self.record(&report).await;
                Some(report)
            }
            Err(e) => {
                error!(node = %drain.node, error = %e, "Drain task did not complete");
                self.health
                    .set_degraded(components::DRAINER, format!("drain task failed: {}", e))
                    .await;
                None
            }
        }
    }

    async fn record(&self, report: &DrainReport) {
        let elapsed = report.elapsed().as_secs_f64();
        match &report.outcome {
            DrainOutcome::Drained { evicted } => {
                self.logger
                    .log_drain_completed(&report.node, *evicted, elapsed);
                self.health.set_healthy(components::DRAINER).await;
            }
            DrainOutcome::CordonFailed { error } => {
                self.logger
                    .log_drain_failed(&report.node, &error.to_string(), true);
                self.health.set_healthy(components::DRAINER).await;
            }
            DrainOutcome::RolledBack { cause } => {
                self.logger
                    .log_drain_failed(&report.node, &cause.to_string(), true);
                self.health.set_healthy(components::DRAINER).await;
            }
            DrainOutcome::RollbackFailed { cause, rollback } => {
                self.logger
                    .log_drain_failed(&report.node, &cause.to_string(), false);
                self.health
                    .set_degraded(components::DRAINER, rollback.to_string())
                    .await;
            }
        }
    }
}

/// Builder for [`RefinerController`]
pub struct RefinerControllerBuilder<A> {
    store: Option<EntityStore>,
    policy: Option<PolicyStore>,
    drainer: Option<CordonDrainer<A>>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
    tick_interval: Duration,
}

impl<A: ClusterApi> RefinerControllerBuilder<A> {
    pub fn new() -> Self {
        Self {
            store: None,
            policy: None,
            drainer: None,
            health: None,
            logger: StructuredLogger::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn store(mut self, store: EntityStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(mut self, policy: PolicyStore) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn drainer(mut self, drainer: CordonDrainer<A>) -> Self {
        self.drainer = Some(drainer);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn build(self) -> Result<RefinerController<A>> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Entity store is required"))?;
        let policy = self
            .policy
            .ok_or_else(|| anyhow::anyhow!("Policy store is required"))?;
        let drainer = self
            .drainer
            .ok_or_else(|| anyhow::anyhow!("Drainer is required"))?;

        Ok(RefinerController::new(store, policy, drainer, self.health.unwrap_or_default())
            .logger(self.logger)
            .tick_interval(self.tick_interval))
    }
}

impl<A: ClusterApi> Default for RefinerControllerBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}
