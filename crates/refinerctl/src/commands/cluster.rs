//! Cluster summary and drain gate preview

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use refiner_lib::format::{format_cpu, format_memory, format_percentage};
use refiner_lib::{
    gate, select_candidate, ClusterSnapshot, DrainState, DrainerPolicy, GateDecision, NodeRecord,
};
use serde::Serialize;

use crate::output::{color_percentage, print_info, print_json, OutputFormat};
use crate::snapshot::ClusterView;

#[derive(Debug, Serialize)]
pub(crate) struct ClusterReport {
    pub snapshot: ClusterSnapshot,
    pub candidate: Option<String>,
    pub candidate_error: Option<String>,
    pub authorized: bool,
    pub deny_reason: Option<String>,
}

/// Same aggregation and gate the decision loop runs on a tick
///
/// The CLI never sees the service's last scale-down time, so that
/// cool-down is not taken into account.
pub(crate) fn build_report(
    nodes: &[NodeRecord],
    policy: &DrainerPolicy,
    state: &DrainState,
    now: DateTime<Utc>,
) -> ClusterReport {
    let mut snapshot = ClusterSnapshot::aggregate(nodes);

    let (candidate, candidate_error) = match select_candidate(nodes) {
        Ok(node) => {
            snapshot.estimate_excess(&node.allocatable);
            (Some(node.name.clone()), None)
        }
        Err(e) => (None, Some(e.to_string())),
    };

    let (authorized, deny_reason) = if candidate.is_some() {
        match gate::evaluate(&snapshot, policy, state, now) {
            GateDecision::Authorize => (true, None),
            GateDecision::Deny(reason) => (false, Some(reason.to_string())),
        }
    } else {
        (false, candidate_error.clone())
    };

    ClusterReport {
        snapshot,
        candidate,
        candidate_error,
        authorized,
        deny_reason,
    }
}

pub async fn show_cluster(
    view: &ClusterView,
    policy: &DrainerPolicy,
    format: OutputFormat,
) -> Result<()> {
    let state = DrainState {
        last_scale_down: None,
        ..view.store.drain_state().await
    };
    let report = build_report(&view.nodes, policy, &state, Utc::now());

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &ClusterReport) {
    let snapshot = &report.snapshot;

    println!("{}", "Cluster Summary".bold());
    println!("{}", "=".repeat(50));
    println!("Nodes:                  {}", snapshot.node_count);
    println!("Non-tainted Nodes:      {}", snapshot.non_tainted_node_count);
    println!("Unschedulable Nodes:    {}", snapshot.unschedulable_node_count);
    println!("Pods:                   {}", snapshot.pod_count);
    println!();
    println!("{}", "Capacity (non-tainted)".bold());
    println!("{}", "-".repeat(50));
    println!(
        "CPU:                    {} / {}",
        format_cpu(snapshot.requested.cpu_millis),
        format_cpu(snapshot.allocatable.cpu_millis)
    );
    println!(
        "Memory:                 {} / {}",
        format_memory(snapshot.requested.memory_bytes),
        format_memory(snapshot.allocatable.memory_bytes)
    );
    println!(
        "CPU Utilization:        {}",
        color_percentage(snapshot.utilization.cpu_percent)
    );
    println!(
        "RAM Utilization:        {}",
        color_percentage(snapshot.utilization.ram_percent)
    );
    println!(
        "Score:                  {}",
        format_percentage(snapshot.utilization.score)
    );
    println!();
    println!("{}", "Drain".bold());
    println!("{}", "-".repeat(50));
    match &report.candidate {
        Some(candidate) => println!("Candidate:              {}", candidate.cyan()),
        None => println!("Candidate:              {}", "none".yellow()),
    }
    println!("Excess Nodes:           {:.2}", snapshot.excess_nodes);
    if report.authorized {
        println!("Gate:                   {}", "authorize".green());
    } else {
        println!("Gate:                   {}", "deny".red());
        if let Some(reason) = &report.deny_reason {
            println!("Reason:                 {}", reason);
        }
    }
    println!();
    print_info("Scale-down cool-down is tracked by the running service and not shown here");
}
