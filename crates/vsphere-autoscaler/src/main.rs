//! vsphere-autoscaler — operator entry point for the vSphere provider.
//!
//! Builds the provider exactly as the autoscaler would and exposes its
//! operations from the command line.
//!
//! # Usage
//!
//! ```text
//! vsphere-autoscaler --cloud-config /etc/vsphere.toml --nodes 1:5:pool-a status
//! vsphere-autoscaler --cloud-config /etc/vsphere.toml --nodes 1:5:pool-a scale-up --delta 2
//! vsphere-autoscaler --cloud-config /etc/vsphere.toml --nodes 1:5:pool-a watch --interval 10
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};
use vsphere_provider::{
    AutoscalingOptions, CloudProvider, NodeGroup, NodeGroupDiscoveryOptions, ResourceLimiter,
    VsphereCloudProvider, build_vsphere,
};

#[derive(Parser)]
#[command(name = "vsphere-autoscaler", about = "vSphere node group provider", version)]
struct Cli {
    /// Path to the cloud config file.
    #[arg(long, global = true)]
    cloud_config: Option<PathBuf>,

    /// Cluster name, used when the cloud config has none.
    #[arg(long, global = true)]
    cluster_name: Option<String>,

    /// Node group spec <min>:<max>:<name>. Exactly one is supported.
    #[arg(long = "nodes", global = true)]
    nodes: Vec<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show node groups, their target size and live members.
    Status {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Add nodes to the node group.
    ScaleUp {
        #[arg(long)]
        delta: i32,
    },
    /// Refresh periodically and log node group state until Ctrl-C.
    Watch {
        /// Refresh interval in seconds.
        #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
}

#[derive(Serialize)]
struct GroupStatus {
    id: String,
    min_size: u32,
    max_size: u32,
    target_size: u32,
    nodes: Vec<String>,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vsphere=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("vsphere-autoscaler failed: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let opts = AutoscalingOptions {
        cloud_config: cli.cloud_config,
        cluster_name: cli.cluster_name,
    };
    let discovery = NodeGroupDiscoveryOptions {
        node_group_specs: cli.nodes,
    };

    let provider = build_vsphere(&opts, &discovery, ResourceLimiter::default())
        .await
        .context("failed to create vsphere cloud provider")?;
    info!(groups = provider.node_groups().len(), "vsphere cloud provider ready");

    match cli.command {
        Command::Status { format } => status(&provider, &format).await,
        Command::ScaleUp { delta } => scale_up(&provider, delta).await,
        Command::Watch { interval } => watch_groups(&provider, Duration::from_secs(interval)).await,
    }
}

async fn status(provider: &VsphereCloudProvider, format: &str) -> anyhow::Result<()> {
    let mut report = Vec::new();
    for group in provider.node_groups() {
        let nodes = group
            .nodes()
            .await
            .with_context(|| format!("could not get nodes of {}", group.id()))?;
        report.push(GroupStatus {
            id: group.id().to_string(),
            min_size: group.min_size(),
            max_size: group.max_size(),
            target_size: group.target_size()?,
            nodes: nodes.into_iter().map(|n| n.id).collect(),
        });
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            for g in &report {
                println!(
                    "{}  min={} max={} target={} live={}",
                    g.id,
                    g.min_size,
                    g.max_size,
                    g.target_size,
                    g.nodes.len()
                );
                for node in &g.nodes {
                    println!("  {node}");
                }
            }
        }
    }
    Ok(())
}

async fn scale_up(provider: &VsphereCloudProvider, delta: i32) -> anyhow::Result<()> {
    let group = provider
        .node_groups()
        .into_iter()
        .next()
        .context("no node group configured")?;
    group
        .increase_size(delta)
        .await
        .with_context(|| format!("could not increase size of {}", group.id()))?;
    info!(node_group = %group.id(), target = group.target_size()?, "scale-up complete");
    Ok(())
}

async fn watch_groups(provider: &VsphereCloudProvider, interval: Duration) -> anyhow::Result<()> {
    let (shutdown_tx, mut shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(interval_secs = interval.as_secs(), "watching node groups");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = provider.refresh() {
                    error!(error = %e, "refresh failed");
                    continue;
                }
                for group in provider.node_groups() {
                    match group.nodes().await {
                        Ok(nodes) => info!(
                            node_group = %group.id(),
                            target = group.target_size()?,
                            live = nodes.len(),
                            "node group state"
                        ),
                        Err(e) => error!(node_group = %group.id(), error = %e, "membership query failed"),
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("stopping");
                break;
            }
        }
    }
    Ok(())
}
