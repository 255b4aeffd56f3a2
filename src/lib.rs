/*
    Single-value Paxos over a simulated network.

    Every node plays proposer, acceptor and learner at once and runs in its
    own tokio task. Nodes talk only through the simulated network, which
    drops messages at a configurable rate and delivers the rest out of order.
    Nodes can be crashed and recovered; a crash stops processing but keeps
    the acceptor's promises and accepted proposal.

    At most one value is ever learned cluster-wide. As long as a majority of
    nodes is alive and the loss rate is below one, every alive node
    eventually learns it.
*/

pub mod cluster;
pub mod common;
pub mod config;
pub mod consensus;
pub mod network;

pub use cluster::Cluster;
pub use common::{ConfigError, NodeError, PaxosError};
pub use config::{BackoffConfig, ClusterConfig, NetworkConfig};
pub use consensus::{Ballot, NodeId, NodeStatus, Value};
pub use network::{node::Node, Network};
