//! Node refiner - drains under-utilized nodes so the autoscaler can remove them

use anyhow::{Context, Result};
use node_refiner::api::{self, AppState};
use node_refiner::config::RefinerConfig;
use refiner_lib::health::components;
use refiner_lib::informer::Informers;
use refiner_lib::{
    CordonDrainer, EntityStore, HealthRegistry, KubeClusterApi, PolicyStore, RefinerController,
    RefinerMetrics, StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = RefinerConfig::load()?;
    info!(?config, "Loaded configuration");

    let logger = StructuredLogger::new("node-refiner");
    let metrics = RefinerMetrics::new();
    let health_registry = HealthRegistry::with_max_loop_time(config.max_loop_time());
    for component in [
        components::NODE_WATCHER,
        components::POD_WATCHER,
        components::POLICY_WATCHER,
    ] {
        health_registry.register(component).await;
    }

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let store = EntityStore::new();
    let policy = PolicyStore::default();
    let cluster_api = Arc::new(KubeClusterApi::new(client.clone()));
    let drainer =
        CordonDrainer::new(cluster_api, store.clone(), policy.clone()).with_metrics(metrics);

    let controller = RefinerController::builder()
        .store(store.clone())
        .policy(policy.clone())
        .drainer(drainer)
        .health(health_registry.clone())
        .logger(logger.clone())
        .tick_interval(config.tick_interval())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let watchers = Informers::new(client, store, policy, health_registry.clone())
        .policy_source(&config.policy_namespace, &config.policy_configmap)
        .logger(logger.clone())
        .spawn(&shutdown_tx);
    let controller_handle = tokio::spawn(controller.run(shutdown_tx.subscribe()));

    let state = Arc::new(AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, Arc::clone(&state)));
    let liveness_handle = tokio::spawn(api::serve_liveness(config.liveness_port, state));

    health_registry.set_ready(true).await;
    logger.log_startup(VERSION, config.tick_interval_secs);

    shutdown_signal().await;
    logger.log_shutdown("signal received");
    health_registry.set_ready(false).await;

    if shutdown_tx.send(()).is_err() {
        warn!("No tasks were listening for shutdown");
    }
    if let Err(e) = controller_handle.await {
        error!(error = %e, "Decision loop task failed");
    }
    for watcher in watchers {
        if let Err(e) = watcher.await {
            error!(error = %e, "Watcher task failed");
        }
    }

    api_handle.abort();
    liveness_handle.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
