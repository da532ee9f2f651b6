//! Node refiner operator CLI
//!
//! Inspects node utilization and the drain gate against the live cluster,
//! and cordons or uncordons nodes by hand.

mod commands;
mod output;
mod snapshot;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{cluster, cordon, nodes, pods};
use kube::config::KubeConfigOptions;
use kube::Client;
use snapshot::ClusterView;

/// Node refiner operator CLI
#[derive(Parser)]
#[command(name = "refinerctl")]
#[command(author, version, about = "Operator CLI for Node Refiner", long_about = None)]
pub struct Cli {
    /// Kubeconfig context to use (defaults to the current context)
    #[arg(long, env = "REFINERCTL_CONTEXT")]
    pub context: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub output: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show per-node requests, allocatable capacity and utilization score
    Nodes,

    /// List active pods
    Pods {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// List container images used in a namespace
    Images {
        /// Namespace to inspect
        #[arg(long, short)]
        namespace: String,
    },

    /// Show cluster totals, excess capacity and the drain gate decision
    Cluster {
        /// Namespace of the policy ConfigMap
        #[arg(long, env = "REFINER_POLICY_NAMESPACE", default_value = "kube-system")]
        policy_namespace: String,

        /// Name of the policy ConfigMap
        #[arg(long, env = "REFINER_POLICY_CONFIGMAP", default_value = "node-refiner-cm")]
        policy_configmap: String,
    },

    /// Mark a node unschedulable
    Cordon {
        /// Node name
        node: String,
    },

    /// Mark a node schedulable again
    Uncordon {
        /// Node name
        node: String,
    },
}

async fn client(context: Option<String>) -> Result<Client> {
    let client = match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context),
                ..Default::default()
            };
            let config = kube::Config::from_kubeconfig(&options)
                .await
                .context("Failed to load kubeconfig")?;
            Client::try_from(config)?
        }
        None => Client::try_default().await?,
    };
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.output;

    let client = client(cli.context)
        .await
        .context("Failed to create Kubernetes client")?;

    match cli.command {
        Commands::Nodes => {
            let view = ClusterView::load(&client).await?;
            nodes::show_nodes(&view, format).await?;
        }
        Commands::Pods { namespace } => {
            let view = ClusterView::load(&client).await?;
            pods::show_pods(&view, namespace, format).await?;
        }
        Commands::Images { namespace } => {
            let view = ClusterView::load(&client).await?;
            pods::show_images(&view, &namespace, format).await?;
        }
        Commands::Cluster {
            policy_namespace,
            policy_configmap,
        } => {
            let policy =
                snapshot::load_policy(&client, &policy_namespace, &policy_configmap).await?;
            let view = ClusterView::load(&client).await?;
            cluster::show_cluster(&view, &policy, format).await?;
        }
        Commands::Cordon { node } => {
            cordon::cordon(client, &node, format).await?;
        }
        Commands::Uncordon { node } => {
            cordon::uncordon(client, &node, format).await?;
        }
    }

    Ok(())
}
