//! Health tracking for the refiner
//!
//! Component statuses back the readiness probe. The decision loop also
//! stamps a heartbeat on every tick, and liveness fails once that heartbeat
//! is older than the configured maximum loop time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DEFAULT_MAX_LOOP_TIME: Duration = Duration::from_secs(180);

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub max_loop_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const CONTROLLER: &str = "controller";
    pub const DRAINER: &str = "drainer";
    pub const NODE_WATCHER: &str = "node_watcher";
    pub const POD_WATCHER: &str = "pod_watcher";
    pub const POLICY_WATCHER: &str = "policy_watcher";
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
    heartbeat: Arc<RwLock<Option<DateTime<Utc>>>>,
    max_loop_time: Duration,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_max_loop_time(DEFAULT_MAX_LOOP_TIME)
    }

    pub fn with_max_loop_time(max_loop_time: Duration) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
            heartbeat: Arc::new(RwLock::new(None)),
            max_loop_time,
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    /// Stamp the decision loop heartbeat
    pub async fn heartbeat(&self) {
        self.heartbeat_at(Utc::now()).await;
    }

    pub async fn heartbeat_at(&self, at: DateTime<Utc>) {
        *self.heartbeat.write().await = Some(at);
    }

    pub async fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.heartbeat.read().await
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Refiner not yet initialized".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }

    pub async fn liveness(&self) -> LivenessResponse {
        self.liveness_at(Utc::now()).await
    }

    /// Liveness as of `now`
    ///
    /// Before the first heartbeat the process counts as alive so a slow
    /// start is not killed.
    pub async fn liveness_at(&self, now: DateTime<Utc>) -> LivenessResponse {
        let last_heartbeat = self.last_heartbeat().await;
        let status = self.health().await.status;
        let max_loop_secs = self.max_loop_time.as_secs();

        let reason = if status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy".to_string())
        } else {
            last_heartbeat.and_then(|beat| {
                let age = (now - beat).to_std().unwrap_or(Duration::ZERO);
                (age > self.max_loop_time).then(|| {
                    format!(
                        "last heartbeat {}s ago exceeds the {}s loop limit",
                        age.as_secs(),
                        max_loop_secs
                    )
                })
            })
        };

        LivenessResponse {
            alive: reason.is_none(),
            last_heartbeat,
            max_loop_secs,
            reason,
        }
    }
}
