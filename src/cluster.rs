use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::info;

use crate::{
    common::{ConfigError, NodeError, PaxosError},
    config::ClusterConfig,
    consensus::{quorum_size, NodeId, Value},
    network::{node::Node, Network},
};

/// A fixed set of nodes sharing one simulated network.
pub struct Cluster<V> {
    network: Network<V>,
    nodes: Vec<Node<V>>,
}

impl<V: Value> Cluster<V> {
    pub fn new(config: ClusterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let network = Network::new(config.nodes, config.network.clone())?;
        let nodes = (0..config.nodes)
            .map(|id| Node::new(id, config.nodes, config.election_timeout, &network))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            nodes = config.nodes,
            quorum = quorum_size(config.nodes),
            timeout = ?config.election_timeout,
            loss = config.network.loss_probability,
            "cluster created"
        );
        Ok(Cluster { network, nodes })
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.nodes.len())
    }

    pub fn run(&self) -> Result<(), NodeError> {
        self.nodes.iter().try_for_each(Node::run)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node<V>, NodeError> {
        self.nodes.get(id).ok_or(NodeError::UnknownNode(id))
    }

    pub fn nodes(&self) -> &[Node<V>] {
        &self.nodes
    }

    pub fn propose(&self, id: NodeId, value: V) -> Result<(), NodeError> {
        self.node(id)?.propose(value)
    }

    pub fn crash(&self, id: NodeId) -> Result<(), NodeError> {
        self.node(id).map(Node::crash)
    }

    pub fn recover(&self, id: NodeId) -> Result<(), NodeError> {
        self.node(id).map(Node::recover)
    }

    /// Applies `p` to every node.
    pub fn set_message_loss_probability(&self, p: f64) -> Result<(), ConfigError> {
        self.network.set_all_loss_probability(p)
    }

    pub fn learned_values(&self) -> Vec<Option<V>> {
        self.nodes.iter().map(Node::learned_value).collect()
    }

    /// Checks that no two nodes learned different values. Returns the value
    /// if at least one node learned it.
    pub fn check_agreement(&self) -> Result<Option<V>, PaxosError> {
        let mut first: Option<(NodeId, V)> = None;
        for (node, learned) in self.learned_values().into_iter().enumerate() {
            let Some(value) = learned else { continue };
            if let Some((first_node, expected)) = &first {
                if *expected != value {
                    return Err(PaxosError::Disagreement {
                        node,
                        found: format!("{value:?}"),
                        first_node: *first_node,
                        expected: format!("{expected:?}"),
                    });
                }
                continue;
            }
            first = Some((node, value));
        }
        Ok(first.map(|(_, value)| value))
    }

    /// Waits until every node in `ids` has learned a value, then checks the
    /// whole cluster agrees. An empty `ids` waits for all nodes.
    pub async fn wait_for_agreement(&self, ids: &[NodeId], deadline: Duration) -> Result<V, PaxosError> {
        let all: Vec<NodeId> = (0..self.nodes.len()).collect();
        let ids = if ids.is_empty() { &all[..] } else { ids };
        let waiting = ids
            .iter()
            .map(|&id| self.node(id))
            .collect::<Result<Vec<_>, _>>()?;

        let started = Instant::now();
        let wait_all = async {
            for node in &waiting {
                node.wait_for_value().await?;
            }
            Ok::<_, NodeError>(())
        };
        timeout(deadline, wait_all)
            .await
            .map_err(|_| PaxosError::Timeout { waited: started.elapsed() })??;

        let agreed = self.check_agreement()?;
        info!(?agreed, elapsed = ?started.elapsed(), "nodes agree");
        agreed.ok_or(PaxosError::Timeout { waited: started.elapsed() })
    }

    pub fn shutdown(&self) {
        self.nodes.iter().for_each(Node::shutdown);
    }
}
