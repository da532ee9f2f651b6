//! Hot-reloadable drainer policy
//!
//! Policy values arrive as a string map (the data of the refiner ConfigMap).
//! Every recognised key is parsed on its own; a malformed value leaves that
//! field untouched while the remaining fields are still applied. Readers get
//! whole-value copies, never a partially applied update.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

pub const DEFAULT_MAX_GRACE_PERIOD: Duration = Duration::from_secs(8 * 60);
pub const DEFAULT_EVICTION_HEADROOM: Duration = Duration::from_secs(30);
pub const DEFAULT_TIME_GAP: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_TIME_SINCE_LAST_ADDITION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MINIMUM_NODES: usize = 3;
pub const DEFAULT_MINIMUM_NON_TAINTED_NODES: usize = 3;
pub const DEFAULT_EXCESS_NODES_THRESHOLD: f64 = 2.0;

/// Recognised configuration keys
pub mod keys {
    pub const DRAINER_ENABLED: &str = "drainer_enabled";
    pub const TIME_GAP: &str = "time_gap";
    pub const TIME_SINCE_LAST_ADDITION: &str = "time_since_last_addition";
    pub const EXCESS_NODES_THRESHOLD: &str = "excess_nodes_threshold";
    pub const MINIMUM_NODES: &str = "minimum_nodes";
    pub const MINIMUM_NON_TAINTED_NODES: &str = "minimum_non_tainted_nodes";
}

/// Settings consumed by the drain gate and the drain protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainerPolicy {
    pub enabled: bool,
    /// Upper bound on a pod's termination grace period
    pub max_grace_period: Duration,
    /// Extra time budget on top of the grace period
    pub eviction_headroom: Duration,
    /// Minimum gap between two scale-down attempts
    pub time_gap: Duration,
    /// Minimum time since the newest node was added
    pub min_time_since_addition: Duration,
    pub minimum_nodes: usize,
    pub minimum_non_tainted_nodes: usize,
    pub excess_nodes_threshold: f64,
}

impl Default for DrainerPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_grace_period: DEFAULT_MAX_GRACE_PERIOD,
            eviction_headroom: DEFAULT_EVICTION_HEADROOM,
            time_gap: DEFAULT_TIME_GAP,
            min_time_since_addition: DEFAULT_TIME_SINCE_LAST_ADDITION,
            minimum_nodes: DEFAULT_MINIMUM_NODES,
            minimum_non_tainted_nodes: DEFAULT_MINIMUM_NON_TAINTED_NODES,
            excess_nodes_threshold: DEFAULT_EXCESS_NODES_THRESHOLD,
        }
    }
}

impl DrainerPolicy {
    /// Overall budget for evicting every pod on a node
    pub fn deletion_timeout(&self) -> Duration {
        self.max_grace_period + self.eviction_headroom
    }

    /// Apply parsed values, returning the fields that actually changed
    pub fn merge(&mut self, delta: &PolicyDelta) -> Vec<PolicyChange> {
        let mut changes = Vec::new();

        if let Some(enabled) = delta.enabled {
            if self.enabled != enabled {
                changes.push(PolicyChange::new(keys::DRAINER_ENABLED, self.enabled, enabled));
                self.enabled = enabled;
            }
        }
        if let Some(gap) = delta.time_gap {
            if self.time_gap != gap {
                changes.push(PolicyChange::new(
                    keys::TIME_GAP,
                    minutes(self.time_gap),
                    minutes(gap),
                ));
                self.time_gap = gap;
            }
        }
        if let Some(since) = delta.min_time_since_addition {
            if self.min_time_since_addition != since {
                changes.push(PolicyChange::new(
                    keys::TIME_SINCE_LAST_ADDITION,
                    minutes(self.min_time_since_addition),
                    minutes(since),
                ));
                self.min_time_since_addition = since;
            }
        }
        if let Some(threshold) = delta.excess_nodes_threshold {
            if self.excess_nodes_threshold != threshold {
                changes.push(PolicyChange::new(
                    keys::EXCESS_NODES_THRESHOLD,
                    self.excess_nodes_threshold,
                    threshold,
                ));
                self.excess_nodes_threshold = threshold;
            }
        }
        if let Some(min) = delta.minimum_nodes {
            if self.minimum_nodes != min {
                changes.push(PolicyChange::new(keys::MINIMUM_NODES, self.minimum_nodes, min));
                self.minimum_nodes = min;
            }
        }
        if let Some(min) = delta.minimum_non_tainted_nodes {
            if self.minimum_non_tainted_nodes != min {
                changes.push(PolicyChange::new(
                    keys::MINIMUM_NON_TAINTED_NODES,
                    self.minimum_non_tainted_nodes,
                    min,
                ));
                self.minimum_non_tainted_nodes = min;
            }
        }

        changes
    }
}

fn minutes(d: Duration) -> u64 {
    d.as_secs() / 60
}

/// Successfully parsed values from one configuration update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDelta {
    pub enabled: Option<bool>,
    pub time_gap: Option<Duration>,
    pub min_time_since_addition: Option<Duration>,
    pub excess_nodes_threshold: Option<f64>,
    pub minimum_nodes: Option<usize>,
    pub minimum_non_tainted_nodes: Option<usize>,
}

impl PolicyDelta {
    /// Parse every recognised key independently
    ///
    /// Unknown keys are ignored. Parse failures are collected alongside the
    /// values that did parse.
    pub fn parse(data: &BTreeMap<String, String>) -> (Self, Vec<FieldError>) {
        let mut delta = PolicyDelta::default();
        let mut errors = Vec::new();

        let field = |key: &'static str| data.get(key).map(|v| (key, v.trim()));

        if let Some((key, value)) = field(keys::DRAINER_ENABLED) {
            match parse_bool(value) {
                Some(b) => delta.enabled = Some(b),
                None => errors.push(FieldError::new(key, value, "expected a boolean")),
            }
        }
        if let Some((key, value)) = field(keys::TIME_GAP) {
            match parse_minutes(value) {
                Ok(d) => delta.time_gap = Some(d),
                Err(e) => errors.push(FieldError::new(key, value, e)),
            }
        }
        if let Some((key, value)) = field(keys::TIME_SINCE_LAST_ADDITION) {
            match parse_minutes(value) {
                Ok(d) => delta.min_time_since_addition = Some(d),
                Err(e) => errors.push(FieldError::new(key, value, e)),
            }
        }
        if let Some((key, value)) = field(keys::EXCESS_NODES_THRESHOLD) {
            match value.parse::<f64>() {
                Ok(t) if t.is_finite() => delta.excess_nodes_threshold = Some(t),
                Ok(_) => errors.push(FieldError::new(key, value, "expected a finite number")),
                Err(e) => errors.push(FieldError::new(key, value, e)),
            }
        }
        if let Some((key, value)) = field(keys::MINIMUM_NODES) {
            match value.parse::<usize>() {
                Ok(n) => delta.minimum_nodes = Some(n),
                Err(e) => errors.push(FieldError::new(key, value, e)),
            }
        }
        if let Some((key, value)) = field(keys::MINIMUM_NON_TAINTED_NODES) {
            match value.parse::<usize>() {
                Ok(n) => delta.minimum_non_tainted_nodes = Some(n),
                Err(e) => errors.push(FieldError::new(key, value, e)),
            }
        }

        (delta, errors)
    }
}

/// Whole minutes as a duration
fn parse_minutes(value: &str) -> Result<Duration, String> {
    let minutes = value.parse::<u64>().map_err(|e| e.to_string())?;
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| "value too large".to_string())
}

/// Accepts the same spellings as Go's `strconv.ParseBool`
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// A single field that changed value
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyChange {
    pub key: &'static str,
    pub from: String,
    pub to: String,
}

impl PolicyChange {
    fn new(key: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self {
            key,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// A configuration value that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key}={value:?}: {reason}")]
pub struct FieldError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl FieldError {
    fn new(key: &'static str, value: &str, reason: impl fmt::Display) -> Self {
        Self {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Every field that failed to parse in one update
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ConfigError {
    pub errors: Vec<FieldError>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid drainer settings: ")?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// Shared, hot-reloadable policy
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    inner: Arc<RwLock<DrainerPolicy>>,
}

impl PolicyStore {
    pub fn new(policy: DrainerPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    /// Consistent copy of every policy field
    pub async fn snapshot(&self) -> DrainerPolicy {
        self.inner.read().await.clone()
    }

    /// Apply a configuration update
    ///
    /// Fields that parse are applied even when others fail; the failures are
    /// returned together as one [`ConfigError`].
    pub async fn apply(
        &self,
        data: &BTreeMap<String, String>,
    ) -> Result<Vec<PolicyChange>, ConfigError> {
        let (delta, errors) = PolicyDelta::parse(data);

        let changes = self.inner.write().await.merge(&delta);
        for change in &changes {
            info!(
                setting = change.key,
                from = %change.from,
                to = %change.to,
                "Changing drainer setting"
            );
        }

        if errors.is_empty() {
            info!(changed = changes.len(), "Drainer settings update successful");
            Ok(changes)
        } else {
            Err(ConfigError { errors })
        }
    }
}
