//! Per-node utilization table

use anyhow::Result;
use refiner_lib::format::{format_cpu, format_memory, format_percentage};
use refiner_lib::NodeRecord;
use tabled::Tabled;

use crate::output::{color_flag, color_percentage, print_json, print_table, OutputFormat};
use crate::snapshot::ClusterView;

#[derive(Debug, Tabled)]
pub(crate) struct NodeRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "Tainted")]
    tainted: String,
    #[tabled(rename = "Pods")]
    pods: usize,
    #[tabled(rename = "CPU Req")]
    cpu_requested: String,
    #[tabled(rename = "CPU Alloc")]
    cpu_allocatable: String,
    #[tabled(rename = "Mem Req")]
    memory_requested: String,
    #[tabled(rename = "Mem Alloc")]
    memory_allocatable: String,
    #[tabled(rename = "%CPU")]
    cpu_percent: String,
    #[tabled(rename = "%RAM")]
    ram_percent: String,
    #[tabled(rename = "Score")]
    score: String,
}

impl From<&NodeRecord> for NodeRow {
    fn from(node: &NodeRecord) -> Self {
        Self {
            name: node.name.clone(),
            tainted: color_flag(node.is_tainted()),
            pods: node.pods.len(),
            cpu_requested: format_cpu(node.requested.cpu_millis),
            cpu_allocatable: format_cpu(node.allocatable.cpu_millis),
            memory_requested: format_memory(node.requested.memory_bytes),
            memory_allocatable: format_memory(node.allocatable.memory_bytes),
            cpu_percent: color_percentage(node.utilization.cpu_percent),
            ram_percent: color_percentage(node.utilization.ram_percent),
            score: format_percentage(node.utilization.score),
        }
    }
}

pub async fn show_nodes(view: &ClusterView, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&view.nodes)?,
        OutputFormat::Table => {
            print_table(view.nodes.iter().map(NodeRow::from).collect());
            println!("\nTotal: {} nodes", view.nodes.len());
        }
    }
    Ok(())
}
