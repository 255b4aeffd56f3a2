/*
    Paxos solves the problem of getting a set of unreliable processes to agree on one value. Processes may stop and later resume with their memory intact, and messages between them may be lost, delayed or reordered, but never corrupted.

    The protocol runs in numbered ballots. A proposer first asks every acceptor to promise to ignore lower ballots (prepare). Once a majority has promised, the proposer asks them to accept a value (accept). If any acceptor in that majority had already accepted something, the proposer must use the value from the highest such ballot instead of its own. A value accepted by a majority in one ballot is chosen; since any two majorities share an acceptor, every later ballot can only re-propose that same value.

    This binary runs one simulated cluster and reports what each node learned.
*/

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use simple_paxos::{Cluster, ClusterConfig, NodeId, PaxosError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Single-value Paxos over a lossy simulated network")]
struct Cli {
    /// Number of nodes in the cluster
    #[arg(short = 'n', long, default_value_t = 3)]
    nodes: usize,

    /// Proposal to make, as NODE=VALUE. Repeat for competing proposers
    #[arg(short = 'p', long = "propose", value_parser = parse_proposal, default_value = "0=42")]
    proposals: Vec<(NodeId, i64)>,

    /// Probability that any single message is dropped
    #[arg(short = 'l', long, default_value_t = 0.0)]
    loss: f64,

    /// Election timeout in milliseconds
    #[arg(short = 't', long, default_value_t = 50)]
    timeout_ms: u64,

    /// Nodes to crash before proposing
    #[arg(short = 'c', long = "crash", num_args = 1..)]
    crashed: Vec<NodeId>,

    /// Seed for the network and backoff RNGs
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// How long to wait for agreement, in milliseconds
    #[arg(short = 'd', long, default_value_t = 10_000)]
    deadline_ms: u64,
}

fn parse_proposal(raw: &str) -> Result<(NodeId, i64), String> {
    let (node, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NODE=VALUE, got {raw:?}"))?;
    let node = node.trim().parse().map_err(|e| format!("bad node id {node:?}: {e}"))?;
    let value = value.trim().parse().map_err(|e| format!("bad value {value:?}: {e}"))?;
    Ok((node, value))
}

async fn simulate(cli: &Cli) -> Result<i64, PaxosError> {
    let mut config = ClusterConfig::new(cli.nodes)
        .with_election_timeout(Duration::from_millis(cli.timeout_ms))
        .with_loss_probability(cli.loss);
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    let cluster = Cluster::<i64>::new(config)?;
    info!(size = cluster.size(), quorum = cluster.quorum_size(), "starting simulation");
    cluster.run()?;
    for &id in &cli.crashed {
        cluster.crash(id)?;
    }
    for &(id, value) in &cli.proposals {
        info!(node = id, value, "proposing");
        cluster.propose(id, value)?;
    }

    let alive: Vec<NodeId> = (0..cluster.size()).filter(|id| !cli.crashed.contains(id)).collect();
    let outcome = cluster
        .wait_for_agreement(&alive, Duration::from_millis(cli.deadline_ms))
        .await;

    for node in cluster.nodes() {
        match node.learned_value() {
            Some(value) => println!("node {}: {value}", node.id()),
            None => println!("node {}: -", node.id()),
        }
    }
    cluster.shutdown();
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("simple_paxos=info")),
        )
        .init();

    let cli = Cli::parse();
    match simulate(&cli).await {
        Ok(value) => {
            info!(value, "consensus reached");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
