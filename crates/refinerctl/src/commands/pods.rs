//! Pod and image listings

use anyhow::Result;
use colored::Colorize;
use refiner_lib::format::{format_cpu, format_memory};
use refiner_lib::store::images_in_namespace;
use refiner_lib::PodRecord;
use tabled::Tabled;

use crate::output::{print_json, print_table, print_warning, OutputFormat};
use crate::snapshot::ClusterView;

#[derive(Debug, Tabled)]
pub(crate) struct PodRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pod")]
    name: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Containers")]
    containers: usize,
    #[tabled(rename = "CPU Req")]
    cpu_requested: String,
    #[tabled(rename = "Mem Req")]
    memory_requested: String,
}

impl From<&PodRecord> for PodRow {
    fn from(pod: &PodRecord) -> Self {
        Self {
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
            node: pod.node_name.clone().unwrap_or_else(|| "<pending>".to_string()),
            containers: pod.container_count,
            cpu_requested: format_cpu(pod.requests.cpu_millis),
            memory_requested: format_memory(pod.requests.memory_bytes),
        }
    }
}

pub async fn show_pods(
    view: &ClusterView,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let pods = view.pods(namespace.as_deref()).await;

    match format {
        OutputFormat::Json => print_json(&pods)?,
        OutputFormat::Table => {
            print_table(pods.iter().map(PodRow::from).collect());
            println!("\nTotal: {} pods", pods.len());
        }
    }
    Ok(())
}

/// Unique images, sorted
pub(crate) fn unique_images(pods: &[PodRecord], namespace: &str) -> Vec<String> {
    let mut images = images_in_namespace(pods, namespace);
    images.sort();
    images.dedup();
    images
}

pub async fn show_images(view: &ClusterView, namespace: &str, format: OutputFormat) -> Result<()> {
    let pods = view.pods(Some(namespace)).await;
    let images = unique_images(&pods, namespace);

    match format {
        OutputFormat::Json => print_json(&images)?,
        OutputFormat::Table => {
            if images.is_empty() {
                print_warning(&format!("No images found in namespace {}", namespace));
                return Ok(());
            }
            println!("{}", format!("Images in {}", namespace).bold());
            println!("{}", "=".repeat(50));
            for image in &images {
                println!("{}", image);
            }
        }
    }
    Ok(())
}
