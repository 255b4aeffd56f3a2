use std::time::Duration;

use thiserror::Error;

use crate::consensus::NodeId;

/// Rejected configuration. Raised at construction time, never mid-protocol.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("cluster must contain at least one node")]
    NoNodes,

    #[error("node id {id} is out of range for a cluster of {total}")]
    NodeOutOfRange { id: NodeId, total: usize },

    #[error("node expects {expected} peers but the network has {actual}")]
    ClusterSizeMismatch { expected: usize, actual: usize },

    #[error("election timeout must be non-zero")]
    ZeroElectionTimeout,

    #[error("message loss probability {0} is outside [0, 1]")]
    InvalidLossProbability(f64),

    #[error("delivery delay range {min:?}..={max:?} is empty")]
    InvalidDeliveryDelay { min: Duration, max: Duration },

    #[error("node {0} is already registered with the network")]
    AlreadyRegistered(NodeId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("node {0} is already running")]
    AlreadyRunning(NodeId),

    #[error("node {0} has stopped processing")]
    Stopped(NodeId),

    #[error("no node with id {0}")]
    UnknownNode(NodeId),
}

#[derive(Debug, Error)]
pub enum PaxosError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("no agreement after {waited:?}")]
    Timeout { waited: Duration },

    #[error("node {node} learned {found} but node {first_node} learned {expected}")]
    Disagreement {
        node: NodeId,
        found: String,
        first_node: NodeId,
        expected: String,
    },
}
