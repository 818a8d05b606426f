//! # pxproto-cli
//!
//! A small demo client that drives [`pxproto_exchange::ExchangeManager`]
//! through the canonical exchange scenarios against an in-process
//! simulated cluster, using the familiar `clap`-derive-plus-
//! `tracing-subscriber` bootstrap scaled down to the handful of
//! scenarios this protocol actually has — this is a demonstration
//! harness, not a full operator CLI.

use std::collections::HashMap;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use pxproto_core::{ExchangeConfig, GroupId, PartitionId};
use pxproto_exchange::ExchangeManager;
use tracing::info;

/// Drive one partition-exchange scenario against a simulated cluster.
#[derive(Parser)]
#[command(name = "pxproto-cli")]
#[command(about = "Demonstrates partition exchange coordination against a simulated cluster")]
struct Cli {
    /// Which scenario to run.
    #[arg(value_enum, default_value_t = Scenario::Join)]
    scenario: Scenario,

    /// Number of servers to seed the cluster with before running the
    /// scenario.
    #[arg(long, default_value_t = 2)]
    servers: usize,

    /// Number of cache groups to track.
    #[arg(long, default_value_t = 1)]
    groups: u32,

    /// Number of partitions per cache group.
    #[arg(long, default_value_t = 4)]
    partitions: u32,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, ValueEnum)]
enum Scenario {
    /// A server joins an already-running cluster (§8 scenario 1).
    Join,
    /// A server leaves a running cluster.
    Leave,
    /// A server joins, and the coordinator dies mid-exchange (§8 scenario 2).
    Failover,
    /// A client joins; servers treat it as a no-op exchange (§8 scenario 5).
    ClientJoin,
    /// Two join events overlap and get folded into one round (§8 scenario 6).
    Merge,
}

fn new_manager(cli: &Cli) -> ExchangeManager {
    let groups: Vec<GroupId> = (0..cli.groups).collect();
    let partitions: HashMap<GroupId, Vec<PartitionId>> =
        groups.iter().map(|&g| (g, (0..cli.partitions).collect())).collect();
    ExchangeManager::new(ExchangeConfig::default(), groups, partitions)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut manager = new_manager(&cli);
    for _ in 0..cli.servers {
        manager.bootstrap_server();
    }
    info!(servers = cli.servers, groups = cli.groups, partitions = cli.partitions, "cluster bootstrapped");

    match cli.scenario {
        Scenario::Join => {
            let (node, version) = manager.join_server().await;
            info!(%node, %version, "server joined, exchange complete");
        }
        Scenario::Leave => {
            let leaving = manager.bootstrap_server();
            let version = manager.leave_server(leaving).await;
            info!(%leaving, %version, "server left, exchange complete");
        }
        Scenario::Failover => {
            let crd = manager.current_coordinator().expect("cluster must have at least one server");
            let (joined, version) = manager.join_then_coordinator_fails(crd).await;
            info!(%joined, %version, "coordinator failed over mid-exchange, new round complete");
        }
        Scenario::ClientJoin => {
            let client = manager.client_join();
            info!(%client, version = %manager.topology_version(), "client joined, no exchange round needed");
        }
        Scenario::Merge => {
            let (first, second, version) = manager.merged_joins().await;
            info!(%first, %second, %version, "two overlapping joins merged into one round");
        }
    }

    if let Some(summary) = manager.history().last() {
        info!(
            coordinator = %summary.coordinator,
            version = %summary.result_topology_version,
            had_lost_partitions = summary.had_lost_partitions,
            "last finished exchange"
        );
    }

    Ok(())
}
