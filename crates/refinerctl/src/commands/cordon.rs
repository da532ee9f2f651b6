//! Cordon and uncordon a single node

use anyhow::{Context, Result};
use kube::Client;
use refiner_lib::{CordonDrainer, EntityStore, KubeClusterApi, PolicyStore};
use serde_json::json;
use std::sync::Arc;

use crate::output::{print_json, print_success, OutputFormat};

fn drainer(client: Client) -> CordonDrainer<KubeClusterApi> {
    CordonDrainer::new(
        Arc::new(KubeClusterApi::new(client)),
        EntityStore::new(),
        PolicyStore::default(),
    )
}

fn report(node: &str, unschedulable: bool, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&json!({ "node": node, "unschedulable": unschedulable })),
        OutputFormat::Table => {
            let action = if unschedulable { "cordoned" } else { "uncordoned" };
            print_success(&format!("Node {} {}", node, action));
            Ok(())
        }
    }
}

/// Mark a node unschedulable; a node that already is stays untouched
pub async fn cordon(client: Client, node: &str, format: OutputFormat) -> Result<()> {
    drainer(client)
        .cordon(node)
        .await
        .with_context(|| format!("Failed to cordon {}", node))?;
    report(node, true, format)
}

pub async fn uncordon(client: Client, node: &str, format: OutputFormat) -> Result<()> {
    drainer(client)
        .uncordon(node)
        .await
        .with_context(|| format!("Failed to uncordon {}", node))?;
    report(node, false, format)
}
