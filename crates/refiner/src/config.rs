//! Refiner process configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const ENV_PREFIX: &str = "REFINER";

/// Refiner configuration
///
/// Drainer policy is not part of this struct; it is read from the policy
/// ConfigMap and reloaded whenever that ConfigMap changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefinerConfig {
    /// Port serving health, readiness and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Port serving the heartbeat liveness probe
    #[serde(default = "default_liveness_port")]
    pub liveness_port: u16,

    /// Decision loop interval in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Liveness fails once the loop has not ticked for this long
    #[serde(default = "default_max_loop")]
    pub max_loop_secs: u64,

    #[serde(default = "default_policy_namespace")]
    pub policy_namespace: String,

    #[serde(default = "default_policy_configmap")]
    pub policy_configmap: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_liveness_port() -> u16 {
    9102
}

fn default_tick_interval() -> u64 {
    60
}

fn default_max_loop() -> u64 {
    180
}

fn default_policy_namespace() -> String {
    "kube-system".to_string()
}

fn default_policy_configmap() -> String {
    "node-refiner-cm".to_string()
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            liveness_port: default_liveness_port(),
            tick_interval_secs: default_tick_interval(),
            max_loop_secs: default_max_loop(),
            policy_namespace: default_policy_namespace(),
            policy_configmap: default_policy_configmap(),
        }
    }
}

impl RefinerConfig {
    /// Load configuration from `REFINER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env)
            .build()
            .context("Failed to read refiner configuration")?;

        let loaded: RefinerConfig = config
            .try_deserialize()
            .context("Invalid refiner configuration")?;
        anyhow::ensure!(loaded.tick_interval_secs > 0, "tick_interval_secs must be positive");
        Ok(loaded)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn max_loop_time(&self) -> Duration {
        Duration::from_secs(self.max_loop_secs)
    }
}
